//! Enforcement engine contract
//!
//! Controllers never talk to the cluster about the resources they lock. They
//! render templates into [`LockedResource`]s and hand them to an
//! [`EnforcementEngine`] built for them by an [`EngineFactory`]. Every
//! controller gets its own engine instance, bound to an event recorder named
//! after the controller.

mod apply;
mod events;

pub use apply::{ApplyEngine, ApplyEngineFactory, FIELD_MANAGER};
pub use events::{reasons, EventRecorder};

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::Client;

use crate::scheme::SchemeRegistry;
use crate::{Error, Result};

/// A rendered object the engine keeps in place
#[derive(Clone, Debug)]
pub struct LockedResource {
    pub object: DynamicObject,
    /// Field paths left out of the applied object (e.g. `.metadata.annotations`)
    pub excluded_paths: Vec<String>,
}

impl LockedResource {
    pub fn gvk(&self) -> Result<GroupVersionKind> {
        let types = self.object.types.as_ref().ok_or_else(|| {
            Error::ValidationError(format!("{} has no apiVersion/kind", self.name()))
        })?;
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", types.api_version.as_str()),
        };
        if version.is_empty() || types.kind.is_empty() {
            return Err(Error::ValidationError(format!(
                "{} has an incomplete apiVersion/kind",
                self.name()
            )));
        }
        Ok(GroupVersionKind::gvk(group, version, &types.kind))
    }

    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }

    /// `Kind/namespace/name`, or `Kind/name` for cluster-scoped objects
    pub fn id(&self) -> String {
        let kind = self
            .object
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or("Unknown");
        match self.object.metadata.namespace.as_deref() {
            Some(ns) => format!("{}/{}/{}", kind, ns, self.name()),
            None => format!("{}/{}", kind, self.name()),
        }
    }
}

/// Outcome of one enforcement pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnforcementReport {
    /// Ids of the resources applied in this pass
    pub applied: Vec<String>,
}

/// Behaviour switches for an engine instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineFlags {
    /// Take ownership of fields other managers set on locked resources
    pub enforce: bool,
    /// Validate each resource with a server-side dry run before applying it
    pub validate: bool,
}

impl Default for EngineFlags {
    fn default() -> Self {
        Self {
            enforce: true,
            validate: true,
        }
    }
}

/// Construction parameters shared by every engine the manager hands out
#[derive(Clone)]
pub struct EngineParams {
    pub client: Client,
    pub scheme: Arc<SchemeRegistry>,
    pub rest_config: kube::Config,
    /// Client for reads that must bypass any caching
    pub api_reader: Client,
}

/// Everything one engine instance is built from
pub struct EngineBinding {
    pub params: EngineParams,
    pub recorder: EventRecorder,
    pub flags: EngineFlags,
}

impl EngineParams {
    /// Bind the shared parameters to a recorder for one controller
    pub fn bind(&self, recorder_name: &str, flags: EngineFlags) -> EngineBinding {
        EngineBinding {
            params: self.clone(),
            recorder: EventRecorder::new(self.client.clone(), recorder_name),
            flags,
        }
    }
}

/// Reconciles locked resources against the cluster on behalf of one controller
#[async_trait]
pub trait EnforcementEngine: Send + Sync {
    /// Name of the event recorder this engine reports through
    fn recorder_name(&self) -> &str;

    /// Create or update every resource so it matches its template
    async fn enforce(
        &self,
        owner: &ObjectReference,
        resources: &[LockedResource],
    ) -> Result<EnforcementReport>;

    /// Remove every resource previously enforced for `owner`
    async fn release(&self, owner: &ObjectReference, resources: &[LockedResource]) -> Result<()>;
}

/// Builds one engine per controller
pub trait EngineFactory: Send + Sync {
    fn build(&self, binding: EngineBinding) -> Result<Arc<dyn EnforcementEngine>>;
}
