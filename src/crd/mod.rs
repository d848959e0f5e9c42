//! Custom Resource Definitions for the Namespace Configuration Operator
//! and the OpenShift identity kinds it selects from

mod common;
mod group_config;
mod namespace_config;
pub mod openshift;
mod user_config;

pub use common::*;
pub use group_config::*;
pub use namespace_config::*;
pub use openshift::{Group, User};
pub use user_config::*;

use kube::CustomResourceExt;

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    [
        NamespaceConfig::crd(),
        UserConfig::crd(),
        GroupConfig::crd(),
    ]
    .iter()
    .map(serde_yaml::to_string)
    .collect()
}
