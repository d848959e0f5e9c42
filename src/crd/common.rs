//! Types shared by the NamespaceConfig, UserConfig and GroupConfig resources

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A template for a resource the operator keeps in place
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockedResourceTemplate {
    /// Object template, rendered once per selected object.
    /// The selected object is the template context, e.g. `{{ metadata.name }}`.
    pub object_template: String,

    /// Field paths the operator must not own (e.g. `.metadata.annotations`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_paths: Vec<String>,
}

/// Label or annotation selector
///
/// Same shape as a Kubernetes `LabelSelector`. An empty selector matches
/// everything.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Exact key/value pairs that must all be present
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements that must all hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<SelectorRequirement>,
}

/// Set-based selector requirement
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectorRequirement {
    /// Key the requirement applies to
    pub key: String,

    /// One of In, NotIn, Exists, DoesNotExist
    pub operator: SelectorOperator,

    /// Values for In and NotIn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Selector requirement operator
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Status reported by every configuration resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnforcingStatus {
    /// Resources currently enforced for this configuration (`kind/namespace/name`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locked_resources: Vec<String>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (ReconcileSuccess, ReconcileError)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub const CONDITION_RECONCILE_SUCCESS: &str = "ReconcileSuccess";
pub const CONDITION_RECONCILE_ERROR: &str = "ReconcileError";

impl Condition {
    pub fn success(locked: usize) -> Self {
        Self {
            type_: CONDITION_RECONCILE_SUCCESS.to_string(),
            status: "True".to_string(),
            last_transition_time: Utc::now(),
            reason: Some("LastReconcileCycleSucceded".to_string()),
            message: Some(format!("{} resources enforced", locked)),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            type_: CONDITION_RECONCILE_ERROR.to_string(),
            status: "True".to_string(),
            last_transition_time: Utc::now(),
            reason: Some("LastReconcileCycleFailed".to_string()),
            message: Some(message.into()),
        }
    }
}
