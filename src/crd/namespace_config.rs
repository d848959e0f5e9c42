//! NamespaceConfig Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{EnforcingStatus, LockedResourceTemplate, Selector};

/// Resources to enforce in every namespace matching the selectors
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redhatcop.redhat.io",
    version = "v1alpha1",
    kind = "NamespaceConfig",
    plural = "namespaceconfigs",
    singular = "namespaceconfig",
    status = "EnforcingStatus",
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceConfigSpec {
    /// Selects namespaces by label
    #[serde(default)]
    pub label_selector: Selector,

    /// Selects namespaces by annotation
    #[serde(default)]
    pub annotation_selector: Selector,

    /// Resources rendered for each selected namespace
    #[serde(default)]
    pub templates: Vec<LockedResourceTemplate>,
}
