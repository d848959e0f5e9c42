//! Kubernetes Event recording scoped to one controller
//!
//! Events are fire-and-forget: a failed publish is logged and never breaks
//! reconciliation.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Event recorder whose reporting component is the controller name
#[derive(Clone)]
pub struct EventRecorder {
    name: String,
    recorder: Recorder,
}

impl EventRecorder {
    /// The name shows up as the reporting component on every Event
    /// (e.g. `NamespaceConfig_controller`).
    pub fn new(client: Client, name: &str) -> Self {
        let reporter = Reporter {
            controller: name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            name: name.to_string(),
            recorder: Recorder::new(client, reporter),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn normal(&self, regarding: &ObjectReference, reason: &str, note: String) {
        self.publish(regarding, EventType::Normal, reason, note).await
    }

    pub async fn warning(&self, regarding: &ObjectReference, reason: &str, note: String) {
        self.publish(regarding, EventType::Warning, reason, note).await
    }

    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(
                recorder = %self.name,
                reason,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Event reasons emitted by the engines
pub mod reasons {
    /// Every locked resource was applied
    pub const RESOURCES_ENFORCED: &str = "ResourcesEnforced";
    /// At least one locked resource failed to apply
    pub const ENFORCEMENT_FAILED: &str = "EnforcementFailed";
    /// Locked resources were removed after the configuration was deleted
    pub const RESOURCES_RELEASED: &str = "ResourcesReleased";
}
