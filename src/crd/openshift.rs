//! OpenShift identity kinds from `user.openshift.io/v1`
//!
//! These are not custom resources of this operator and they carry their data
//! at the top level rather than under `spec`, so `Resource` is implemented by
//! hand instead of derived.

use std::borrow::Cow;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ClusterResourceScope;
use kube::Resource;
use serde::{Deserialize, Serialize};

pub const USER_GROUP: &str = "user.openshift.io";
pub const USER_VERSION: &str = "v1";

/// An OpenShift user
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Identities in the form `<provider>:<provider user name>`.
    /// The API server sends `null` rather than omitting empty lists.
    #[serde(default)]
    pub identities: Option<Vec<String>>,

    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

impl User {
    /// Whether the user has an identity issued by the given provider
    pub fn has_identity_from(&self, provider: &str) -> bool {
        self.identities
            .iter()
            .flatten()
            .filter_map(|identity| identity.split_once(':'))
            .any(|(p, _)| p == provider)
    }
}

/// An OpenShift group
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub users: Option<Vec<String>>,
}

macro_rules! openshift_resource {
    ($ty:ty, $kind:literal, $plural:literal) => {
        impl Resource for $ty {
            type DynamicType = ();
            type Scope = ClusterResourceScope;

            fn kind(_: &()) -> Cow<'_, str> {
                Cow::Borrowed($kind)
            }

            fn group(_: &()) -> Cow<'_, str> {
                Cow::Borrowed(USER_GROUP)
            }

            fn version(_: &()) -> Cow<'_, str> {
                Cow::Borrowed(USER_VERSION)
            }

            fn plural(_: &()) -> Cow<'_, str> {
                Cow::Borrowed($plural)
            }

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

openshift_resource!(User, "User", "users");
openshift_resource!(Group, "Group", "groups");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_deserializes_from_api_shape() {
        let user: User = serde_json::from_value(serde_json::json!({
            "apiVersion": "user.openshift.io/v1",
            "kind": "User",
            "metadata": {"name": "alice"},
            "identities": ["corp-ldap:alice", "github:alice-gh"]
        }))
        .unwrap();
        assert_eq!(user.metadata.name.as_deref(), Some("alice"));
        assert!(user.groups.is_none());
        assert!(user.has_identity_from("corp-ldap"));
        assert!(user.has_identity_from("github"));
        assert!(!user.has_identity_from("corp"));
    }

    #[test]
    fn user_with_null_groups_decodes() {
        let user: User = serde_json::from_value(serde_json::json!({
            "apiVersion": "user.openshift.io/v1",
            "kind": "User",
            "metadata": {"name": "alice"},
            "identities": ["htpasswd:alice"],
            "groups": null
        }))
        .unwrap();
        assert!(user.groups.is_none());
        assert!(user.has_identity_from("htpasswd"));
    }

    #[test]
    fn user_with_null_identities_has_no_provider() {
        let user: User = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "system-admin"},
            "identities": null,
            "groups": null
        }))
        .unwrap();
        assert!(!user.has_identity_from("htpasswd"));
    }

    #[test]
    fn group_with_null_users_decodes() {
        let group: Group = serde_json::from_value(serde_json::json!({
            "apiVersion": "user.openshift.io/v1",
            "kind": "Group",
            "metadata": {"name": "empty-team"},
            "users": null
        }))
        .unwrap();
        assert_eq!(group.metadata.name.as_deref(), Some("empty-team"));
        assert!(group.users.is_none());
    }

    #[test]
    fn api_version_is_derived_from_group_and_version() {
        assert_eq!(User::api_version(&()), "user.openshift.io/v1");
        assert_eq!(Group::kind(&()), "Group");
    }
}
