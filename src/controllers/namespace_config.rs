//! NamespaceConfig: templates enforced in every selected namespace

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;

use super::{selected_by, EnforcingConfig};
use crate::config::NamespaceScopePolicy;
use crate::crd::{LockedResourceTemplate, NamespaceConfig};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "redhatcop.redhat.io/namespaceconfig-finalizer";

/// Namespaces owned by the platform rather than by tenants
pub fn is_system_namespace(name: &str) -> bool {
    name == "default"
        || name == "openshift"
        || name.starts_with("kube-")
        || name.starts_with("openshift-")
}

impl EnforcingConfig for NamespaceConfig {
    type Target = Namespace;

    const KIND: &'static str = "NamespaceConfig";
    const FINALIZER: &'static str = FINALIZER;

    fn templates(&self) -> &[LockedResourceTemplate] {
        &self.spec.templates
    }

    fn select(&self, candidates: Vec<Namespace>, scope: NamespaceScopePolicy) -> Vec<Namespace> {
        candidates
            .into_iter()
            .filter(|ns| scope.allows_system_namespaces() || !is_system_namespace(&ns.name_any()))
            .filter(|ns| {
                selected_by(
                    ns,
                    &self.spec.label_selector,
                    &self.spec.annotation_selector,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{NamespaceConfigSpec, Selector};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn namespace(name: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Namespace {
        let map = |pairs: &[(&str, &str)]| {
            Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            )
        };
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: map(labels),
                annotations: map(annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn config(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> NamespaceConfig {
        let selector = |pairs: &[(&str, &str)]| Selector {
            match_labels: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            match_expressions: vec![],
        };
        NamespaceConfig::new(
            "tenant-quota",
            NamespaceConfigSpec {
                label_selector: selector(labels),
                annotation_selector: selector(annotations),
                templates: vec![],
            },
        )
    }

    fn names(selected: &[Namespace]) -> Vec<String> {
        selected.iter().map(|ns| ns.name_any()).collect()
    }

    #[test]
    fn recognises_system_namespaces() {
        for name in ["default", "openshift", "kube-system", "kube-public", "openshift-monitoring"] {
            assert!(is_system_namespace(name), "{name}");
        }
        for name in ["team-a", "kube", "openshifty", "my-openshift-apps", "defaults"] {
            assert!(!is_system_namespace(name), "{name}");
        }
    }

    #[test]
    fn restricted_scope_skips_system_namespaces() {
        let candidates = vec![
            namespace("kube-system", &[], &[]),
            namespace("openshift-etcd", &[], &[]),
            namespace("default", &[], &[]),
            namespace("team-a", &[], &[]),
        ];
        let selected = config(&[], &[]).select(candidates, NamespaceScopePolicy::Restricted);
        assert_eq!(names(&selected), vec!["team-a"]);
    }

    #[test]
    fn allowed_scope_keeps_system_namespaces() {
        let candidates = vec![namespace("kube-system", &[], &[]), namespace("team-a", &[], &[])];
        let selected = config(&[], &[]).select(candidates, NamespaceScopePolicy::Allowed);
        assert_eq!(names(&selected), vec!["kube-system", "team-a"]);
    }

    #[test]
    fn both_selectors_must_match() {
        let candidates = vec![
            namespace("both", &[("size", "small")], &[("owner", "team-a")]),
            namespace("labels-only", &[("size", "small")], &[]),
            namespace("annotations-only", &[], &[("owner", "team-a")]),
        ];
        let selected = config(&[("size", "small")], &[("owner", "team-a")])
            .select(candidates, NamespaceScopePolicy::Restricted);
        assert_eq!(names(&selected), vec!["both"]);
    }
}
