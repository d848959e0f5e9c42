//! UserConfig Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{EnforcingStatus, LockedResourceTemplate, Selector};

/// Resources to enforce for every user matching the selectors
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redhatcop.redhat.io",
    version = "v1alpha1",
    kind = "UserConfig",
    plural = "userconfigs",
    singular = "userconfig",
    status = "EnforcingStatus",
    printcolumn = r#"{"name": "Provider", "type": "string", "jsonPath": ".spec.providerName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserConfigSpec {
    /// Only users with an identity from this provider are selected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,

    /// Selects users by label
    #[serde(default)]
    pub label_selector: Selector,

    /// Selects users by annotation
    #[serde(default)]
    pub annotation_selector: Selector,

    /// Resources rendered for each selected user
    #[serde(default)]
    pub templates: Vec<LockedResourceTemplate>,
}
