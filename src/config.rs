//! Operator configuration resolved from command-line flags and environment
//!
//! Everything here is built once in `main` before the manager exists and is
//! read-only afterwards.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::{Error, Result};

/// Environment variable that lets the namespace controller act on system namespaces
pub const ALLOW_SYSTEM_NAMESPACES_ENV: &str = "ALLOW_SYSTEM_NAMESPACES";

/// Default lease name used as the leader election lock identity
pub const DEFAULT_LEADER_ELECTION_ID: &str = "b0b2f089.redhat.io";

/// Namespace Configuration Operator
#[derive(Parser, Debug, Clone)]
#[command(name = "namespace-configuration-operator")]
#[command(about = "Enforces namespace, user and group configuration templates")]
#[command(version)]
pub struct OperatorConfig {
    /// The address the metric endpoint binds to
    #[arg(long = "metrics-bind-address", default_value = ":8080")]
    pub metrics_bind_address: String,

    /// The address the probe endpoint binds to
    #[arg(long = "health-probe-bind-address", default_value = ":8081")]
    pub health_probe_bind_address: String,

    /// Enable leader election for controller manager. Enabling this will
    /// ensure there is only one active controller manager.
    #[arg(long = "leader-elect", default_value_t = false)]
    pub leader_elect: bool,

    /// Name of the Lease used as the leader election lock
    #[arg(long = "leader-election-id", default_value = DEFAULT_LEADER_ELECTION_ID)]
    pub leader_election_id: String,

    /// Namespace holding the leader election Lease
    #[arg(long = "leader-election-namespace", env = "POD_NAMESPACE")]
    pub leader_election_namespace: Option<String>,

    /// Seconds to wait for controllers to stop after a termination signal
    #[arg(long = "graceful-shutdown-timeout-secs", default_value_t = 30)]
    pub graceful_shutdown_timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long = "log-json", env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Whether the namespace controller may act on system namespaces.
    /// Resolved from the environment, never from a flag.
    #[arg(skip)]
    pub namespace_scope: NamespaceScopePolicy,
}

impl OperatorConfig {
    /// Parse flags from the process arguments and resolve the namespace scope
    /// policy from the process environment
    pub fn load() -> Self {
        let mut config = Self::parse();
        config.namespace_scope =
            NamespaceScopePolicy::from_env_value(std::env::var(ALLOW_SYSTEM_NAMESPACES_ENV).ok());
        config
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        parse_bind_address(&self.metrics_bind_address)
    }

    pub fn health_probe_addr(&self) -> Result<SocketAddr> {
        parse_bind_address(&self.health_probe_bind_address)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_secs)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_bind_address: ":8080".to_string(),
            health_probe_bind_address: ":8081".to_string(),
            leader_elect: false,
            leader_election_id: DEFAULT_LEADER_ELECTION_ID.to_string(),
            leader_election_namespace: None,
            graceful_shutdown_timeout_secs: 30,
            log_json: false,
            namespace_scope: NamespaceScopePolicy::Restricted,
        }
    }
}

/// Parse a bind address. `:8080` binds every interface on port 8080.
pub fn parse_bind_address(addr: &str) -> Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|e| Error::ConfigError(format!("invalid bind address '{}': {}", addr, e)))
}

/// Whether the namespace controller may touch system namespaces
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NamespaceScopePolicy {
    /// System namespaces are never selected
    #[default]
    Restricted,
    /// System namespaces are selected like any other namespace
    Allowed,
}

impl NamespaceScopePolicy {
    /// Resolve the policy from the raw environment value.
    ///
    /// Anything that is not a recognised boolean `true` resolves to
    /// `Restricted`, including an unset or empty variable.
    pub fn from_env_value(value: Option<String>) -> Self {
        match value.as_deref().map(parse_bool) {
            Some(Some(true)) => NamespaceScopePolicy::Allowed,
            _ => NamespaceScopePolicy::Restricted,
        }
    }

    pub fn allows_system_namespaces(self) -> bool {
        self == NamespaceScopePolicy::Allowed
    }
}

/// Boolean parsing with the conventional accepted spellings
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
