//! Error types for the Namespace Configuration Operator

use kube::core::GroupVersionKind;
use thiserror::Error;

/// Result type for the operator
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Template rendering error
    #[error("Template error: {0}")]
    TemplateError(String),

    /// A kind batch could not be added to the scheme
    #[error("unable to register kinds '{batch}' in scheme: {reason}")]
    SchemeError { batch: String, reason: String },

    /// The manager could not be constructed or started
    #[error("unable to start manager: {0}")]
    ManagerError(String),

    /// A controller could not be constructed or registered
    #[error("unable to create controller {controller}: {reason}")]
    ControllerSetup { controller: String, reason: String },

    /// Discovery could not determine whether a kind is served
    #[error("unable to check whether resource {} exists: {source}", display_gvk(.gvk))]
    DiscoveryError {
        gvk: GroupVersionKind,
        #[source]
        source: kube::Error,
    },

    /// Health or readiness check wiring failed
    #[error("unable to set up {probe} check: {reason}")]
    HealthCheckError { probe: &'static str, reason: String },

    /// Lifecycle transition out of order
    #[error("invalid manager lifecycle transition from {from} to {to}")]
    LifecycleError { from: String, to: String },

    /// Leader election failure or lost lease
    #[error("leader election error: {0}")]
    LeaderElectionError(String),

    /// Finalizer error
    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(err))
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::KubeError(err.to_string())
    }
}

/// Render a GVK the way `kubectl api-resources` does: `Kind.group/version`
pub fn display_gvk(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}.{}", gvk.kind, gvk.version)
    } else {
        format!("{}.{}/{}", gvk.kind, gvk.group, gvk.version)
    }
}
