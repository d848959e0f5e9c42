//! UserConfig: templates enforced for every selected OpenShift user

use super::{selected_by, EnforcingConfig};
use crate::config::NamespaceScopePolicy;
use crate::crd::{LockedResourceTemplate, User, UserConfig};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "redhatcop.redhat.io/userconfig-finalizer";

impl EnforcingConfig for UserConfig {
    type Target = User;

    const KIND: &'static str = "UserConfig";
    const FINALIZER: &'static str = FINALIZER;

    fn templates(&self) -> &[LockedResourceTemplate] {
        &self.spec.templates
    }

    fn select(&self, candidates: Vec<User>, _scope: NamespaceScopePolicy) -> Vec<User> {
        let provider = self.spec.provider_name.as_deref().filter(|p| !p.is_empty());
        candidates
            .into_iter()
            .filter(|user| provider.map_or(true, |p| user.has_identity_from(p)))
            .filter(|user| {
                selected_by(
                    user,
                    &self.spec.label_selector,
                    &self.spec.annotation_selector,
                )
            })
            .collect()
    }
}
