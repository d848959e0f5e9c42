//! GroupConfig Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{EnforcingStatus, LockedResourceTemplate, Selector};

/// Resources to enforce for every group matching the selectors
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redhatcop.redhat.io",
    version = "v1alpha1",
    kind = "GroupConfig",
    plural = "groupconfigs",
    singular = "groupconfig",
    status = "EnforcingStatus",
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfigSpec {
    /// Selects groups by label
    #[serde(default)]
    pub label_selector: Selector,

    /// Selects groups by annotation
    #[serde(default)]
    pub annotation_selector: Selector,

    /// Resources rendered for each selected group
    #[serde(default)]
    pub templates: Vec<LockedResourceTemplate>,
}
