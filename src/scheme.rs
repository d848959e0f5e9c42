//! Type registry mapping (group, version, kind) to API descriptors
//!
//! The registry is assembled once during startup from batches of kinds and
//! then shared read-only (behind an `Arc`) by the manager, the controllers and
//! the enforcement engines. Engines use it to turn a rendered object's
//! apiVersion/kind into an `ApiResource` without a discovery round-trip.

use std::collections::BTreeMap;

use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::{
    ConfigMap, Event, LimitRange, Namespace, ResourceQuota, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::core::{ClusterResourceScope, GroupVersionKind, NamespaceResourceScope};
use kube::discovery::ApiResource;
use kube::Resource;
use tracing::debug;

use crate::crd::{Group, GroupConfig, NamespaceConfig, User, UserConfig};
use crate::{Error, Result};

/// Compile-time scope of a typed kind
pub trait ScopeFlag {
    const NAMESPACED: bool;
}

impl ScopeFlag for NamespaceResourceScope {
    const NAMESPACED: bool = true;
}

impl ScopeFlag for ClusterResourceScope {
    const NAMESPACED: bool = false;
}

/// Everything needed to build a client for one kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

impl TypeDescriptor {
    /// Descriptor for a statically typed kind
    pub fn of<K>() -> Self
    where
        K: Resource<DynamicType = ()>,
        K::Scope: ScopeFlag,
    {
        Self {
            api_resource: ApiResource::erase::<K>(&()),
            namespaced: <K::Scope as ScopeFlag>::NAMESPACED,
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(
            &self.api_resource.group,
            &self.api_resource.version,
            &self.api_resource.kind,
        )
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let ar = &self.api_resource;
        if ar.kind.is_empty() {
            return Err("kind must not be empty".to_string());
        }
        if ar.version.is_empty() {
            return Err(format!("version of {} must not be empty", ar.kind));
        }
        if ar.plural.is_empty() {
            return Err(format!("plural of {} must not be empty", ar.kind));
        }
        Ok(())
    }
}

/// A named batch of kinds registered together
#[derive(Clone, Debug)]
pub struct KindSet {
    name: String,
    entries: Vec<TypeDescriptor>,
}

impl KindSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn with<K>(self) -> Self
    where
        K: Resource<DynamicType = ()>,
        K::Scope: ScopeFlag,
    {
        self.with_descriptor(TypeDescriptor::of::<K>())
    }

    pub fn with_descriptor(mut self, descriptor: TypeDescriptor) -> Self {
        self.entries.push(descriptor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Built-in cluster kinds the operator reads or commonly templates
    pub fn core() -> Self {
        Self::new("core")
            .with::<Namespace>()
            .with::<ConfigMap>()
            .with::<Secret>()
            .with::<ServiceAccount>()
            .with::<Service>()
            .with::<LimitRange>()
            .with::<ResourceQuota>()
            .with::<Event>()
            .with::<Lease>()
            .with::<Role>()
            .with::<RoleBinding>()
            .with::<ClusterRole>()
            .with::<ClusterRoleBinding>()
            .with::<NetworkPolicy>()
    }

    /// OpenShift identity kinds
    pub fn openshift_user() -> Self {
        Self::new("user.openshift.io").with::<User>().with::<Group>()
    }

    /// This operator's configuration kinds
    pub fn operator() -> Self {
        Self::new("redhatcop.redhat.io")
            .with::<NamespaceConfig>()
            .with::<UserConfig>()
            .with::<GroupConfig>()
    }

    /// Every batch the operator needs, in registration order
    pub fn defaults() -> Vec<Self> {
        vec![Self::core(), Self::openshift_user(), Self::operator()]
    }
}

/// Lookup table of every kind the process can encode, decode and build clients for
#[derive(Clone, Debug, Default)]
pub struct SchemeRegistry {
    entries: BTreeMap<(String, String, String), TypeDescriptor>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from batches, stopping at the first batch that fails
    pub fn from_kind_sets(sets: impl IntoIterator<Item = KindSet>) -> Result<Self> {
        let mut scheme = Self::new();
        for set in sets {
            scheme.register(set)?;
        }
        Ok(scheme)
    }

    /// Add a batch of kinds.
    ///
    /// The batch is checked as a whole before anything is inserted, so a
    /// failing batch leaves the table untouched. Registering a descriptor that
    /// is already present is a no-op; registering a different descriptor for
    /// a known GVK is an error.
    pub fn register(&mut self, set: KindSet) -> Result<()> {
        let fail = |reason: String| Error::SchemeError {
            batch: set.name.clone(),
            reason,
        };

        let mut staged: BTreeMap<(String, String, String), &TypeDescriptor> = BTreeMap::new();
        for descriptor in &set.entries {
            descriptor.validate().map_err(fail)?;
            let key = key_of(&descriptor.gvk());
            let existing = self
                .entries
                .get(&key)
                .or_else(|| staged.get(&key).copied());
            match existing {
                Some(known) if known != descriptor => {
                    return Err(fail(format!(
                        "conflicting registration for {}",
                        crate::error::display_gvk(&descriptor.gvk())
                    )));
                }
                Some(_) => {}
                None => {
                    staged.insert(key, descriptor);
                }
            }
        }

        debug!(batch = %set.name, added = staged.len(), "Registered kinds in scheme");
        for (key, descriptor) in staged {
            self.entries.insert(key, descriptor.clone());
        }
        Ok(())
    }

    pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<&TypeDescriptor> {
        self.entries.get(&key_of(gvk))
    }

    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool {
        self.lookup(gvk).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key_of(gvk: &GroupVersionKind) -> (String, String, String) {
    (gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())
}
