//! GroupConfig: templates enforced for every selected OpenShift group

use super::{selected_by, EnforcingConfig};
use crate::config::NamespaceScopePolicy;
use crate::crd::{Group, GroupConfig, LockedResourceTemplate};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "redhatcop.redhat.io/groupconfig-finalizer";

impl EnforcingConfig for GroupConfig {
    type Target = Group;

    const KIND: &'static str = "GroupConfig";
    const FINALIZER: &'static str = FINALIZER;

    fn templates(&self) -> &[LockedResourceTemplate] {
        &self.spec.templates
    }

    fn select(&self, candidates: Vec<Group>, _scope: NamespaceScopePolicy) -> Vec<Group> {
        candidates
            .into_iter()
            .filter(|group| {
                selected_by(
                    group,
                    &self.spec.label_selector,
                    &self.spec.annotation_selector,
                )
            })
            .collect()
    }
}
