//! Server-side apply enforcement engine

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::discovery::{self, ApiResource, Scope};
use kube::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    reasons, EnforcementEngine, EnforcementReport, EngineBinding, EngineFactory, EngineFlags,
    EventRecorder, LockedResource,
};
use crate::scheme::SchemeRegistry;
use crate::{Error, Result};

/// Field manager recorded on every applied object
pub const FIELD_MANAGER: &str = "namespace-configuration-operator";

/// Builds [`ApplyEngine`]s
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplyEngineFactory;

impl EngineFactory for ApplyEngineFactory {
    fn build(&self, binding: EngineBinding) -> Result<Arc<dyn EnforcementEngine>> {
        Ok(Arc::new(ApplyEngine::new(binding)))
    }
}

/// Keeps locked resources in place with server-side apply
pub struct ApplyEngine {
    client: Client,
    api_reader: Client,
    scheme: Arc<SchemeRegistry>,
    recorder: EventRecorder,
    flags: EngineFlags,
}

impl ApplyEngine {
    pub fn new(binding: EngineBinding) -> Self {
        Self {
            client: binding.params.client,
            api_reader: binding.params.api_reader,
            scheme: binding.params.scheme,
            recorder: binding.recorder,
            flags: binding.flags,
        }
    }

    /// Resolve the API for a resource, from the scheme first and discovery second
    async fn api_for(&self, resource: &LockedResource) -> Result<Api<DynamicObject>> {
        let gvk = resource.gvk()?;
        let (ar, namespaced): (ApiResource, bool) = match self.scheme.lookup(&gvk) {
            Some(descriptor) => (descriptor.api_resource.clone(), descriptor.namespaced),
            None => {
                debug!(kind = %gvk.kind, group = %gvk.group, "Kind not in scheme, using discovery");
                let (ar, caps) = discovery::pinned_kind(&self.api_reader, &gvk).await?;
                (ar, caps.scope == Scope::Namespaced)
            }
        };

        match (namespaced, resource.object.metadata.namespace.as_deref()) {
            (true, Some(ns)) => Ok(Api::namespaced_with(self.client.clone(), ns, &ar)),
            (true, None) => Err(Error::ValidationError(format!(
                "{} is namespaced but the template sets no metadata.namespace",
                resource.id()
            ))),
            (false, _) => Ok(Api::all_with(self.client.clone(), &ar)),
        }
    }

    fn patch_params(&self) -> PatchParams {
        let params = PatchParams::apply(FIELD_MANAGER);
        if self.flags.enforce {
            params.force()
        } else {
            params
        }
    }

    async fn apply_one(&self, resource: &LockedResource) -> Result<()> {
        let api = self.api_for(resource).await?;
        let mut body = serde_json::to_value(&resource.object)
            .map_err(|e| Error::ValidationError(format!("{}: {}", resource.id(), e)))?;
        for path in &resource.excluded_paths {
            strip_path(&mut body, path);
        }
        let patch = Patch::Apply(&body);

        if self.flags.validate {
            api.patch(resource.name(), &self.patch_params().dry_run(), &patch)
                .await
                .map_err(|e| {
                    Error::ValidationError(format!("{} rejected by dry run: {}", resource.id(), e))
                })?;
        }

        api.patch(resource.name(), &self.patch_params(), &patch)
            .await
            .map_err(|e| Error::KubeError(format!("failed to apply {}: {}", resource.id(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl EnforcementEngine for ApplyEngine {
    fn recorder_name(&self) -> &str {
        self.recorder.name()
    }

    async fn enforce(
        &self,
        owner: &ObjectReference,
        resources: &[LockedResource],
    ) -> Result<EnforcementReport> {
        let mut report = EnforcementReport::default();
        let mut failures = Vec::new();

        for resource in resources {
            match self.apply_one(resource).await {
                Ok(()) => report.applied.push(resource.id()),
                Err(e) => {
                    warn!(resource = %resource.id(), error = %e, "Failed to enforce resource");
                    failures.push(e.to_string());
                }
            }
        }

        if !failures.is_empty() {
            let message = failures.join("; ");
            self.recorder
                .warning(owner, reasons::ENFORCEMENT_FAILED, message.clone())
                .await;
            return Err(Error::KubeError(message));
        }

        self.recorder
            .normal(
                owner,
                reasons::RESOURCES_ENFORCED,
                format!("{} resources enforced", report.applied.len()),
            )
            .await;
        info!(
            recorder = %self.recorder.name(),
            count = report.applied.len(),
            "Enforced locked resources"
        );
        Ok(report)
    }

    async fn release(&self, owner: &ObjectReference, resources: &[LockedResource]) -> Result<()> {
        for resource in resources {
            let api = self.api_for(resource).await?;
            match api.delete(resource.name(), &DeleteParams::default()).await {
                Ok(_) => debug!(resource = %resource.id(), "Released locked resource"),
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => {
                    return Err(Error::KubeError(format!(
                        "failed to delete {}: {}",
                        resource.id(),
                        e
                    )))
                }
            }
        }
        self.recorder
            .normal(
                owner,
                reasons::RESOURCES_RELEASED,
                format!("{} resources released", resources.len()),
            )
            .await;
        Ok(())
    }
}

/// Remove a dotted field path (`.metadata.annotations`) from an object.
/// Missing intermediate fields are ignored.
pub(crate) fn strip_path(value: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = value;
    for segment in parents {
        match current.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(*last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_nested_field() {
        let mut value = json!({
            "metadata": {"name": "q", "annotations": {"a": "b"}},
            "spec": {"hard": {"pods": "4"}}
        });
        strip_path(&mut value, ".metadata.annotations");
        assert_eq!(value, json!({"metadata": {"name": "q"}, "spec": {"hard": {"pods": "4"}}}));
    }

    #[test]
    fn missing_path_is_ignored() {
        let mut value = json!({"metadata": {"name": "q"}});
        strip_path(&mut value, ".spec.replicas");
        strip_path(&mut value, "");
        assert_eq!(value, json!({"metadata": {"name": "q"}}));
    }

    #[test]
    fn path_without_leading_dot_works() {
        let mut value = json!({"spec": {"replicas": 3, "paused": false}});
        strip_path(&mut value, "spec.replicas");
        assert_eq!(value, json!({"spec": {"paused": false}}));
    }
}
