//! The controller manager
//!
//! Owns the client, the scheme and every registered controller, and walks
//! the lifecycle `Configured → ControllersRegistered → HealthWired → Running
//! → Terminating → Stopped`. Setup calls are only accepted in the state they
//! belong to; anything out of order is an error, never a silent no-op.

pub mod health;
pub mod leader;
pub mod lifecycle;
pub mod runnable;

pub use health::{ping, HealthCheck, HealthChecks};
pub use leader::{KubeLeaseStore, LeaderElector, LeaderGuard, LeaseStore};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use runnable::{ControllerRegistry, Runnable};

use std::sync::Arc;

use kube::Client;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::OperatorConfig;
use crate::engine::EngineParams;
use crate::scheme::SchemeRegistry;
use crate::{metrics, Error, Result};

/// Long-lived process owner for all controllers
pub struct Manager {
    config: OperatorConfig,
    scheme: Arc<SchemeRegistry>,
    rest_config: kube::Config,
    client: Client,
    api_reader: Client,
    lifecycle: Lifecycle,
    controllers: Vec<(String, Box<dyn Runnable>)>,
    health: HealthChecks,
    lease_store: Option<Arc<dyn LeaseStore>>,
}

impl Manager {
    /// Build a manager from the in-cluster or kubeconfig configuration
    pub async fn new(config: OperatorConfig, scheme: Arc<SchemeRegistry>) -> Result<Self> {
        let rest_config = kube::Config::infer()
            .await
            .map_err(|e| Error::ManagerError(format!("unable to load cluster config: {}", e)))?;
        Self::from_rest_config(config, scheme, rest_config)
    }

    /// Build a manager from an explicit cluster configuration
    pub fn from_rest_config(
        config: OperatorConfig,
        scheme: Arc<SchemeRegistry>,
        rest_config: kube::Config,
    ) -> Result<Self> {
        let lifecycle = Lifecycle::new(LifecycleState::Unconfigured);
        let client = Client::try_from(rest_config.clone())
            .map_err(|e| Error::ManagerError(format!("unable to create client: {}", e)))?;
        let api_reader = Client::try_from(rest_config.clone())
            .map_err(|e| Error::ManagerError(format!("unable to create API reader: {}", e)))?;
        // Addresses are checked now so a typo fails before any controller is built
        config.metrics_addr()?;
        config.health_probe_addr()?;

        lifecycle.advance(LifecycleState::Configured)?;
        Ok(Self {
            config,
            scheme,
            rest_config,
            client,
            api_reader,
            lifecycle,
            controllers: Vec::new(),
            health: HealthChecks::default(),
            lease_store: None,
        })
    }

    /// Use a specific lease store instead of the API server's Lease objects
    pub fn with_lease_store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.lease_store = Some(store);
        self
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn scheme(&self) -> Arc<SchemeRegistry> {
        Arc::clone(&self.scheme)
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    /// Follow lifecycle transitions, including after `start` takes ownership
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Engine construction parameters shared by every controller
    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            client: self.client.clone(),
            scheme: Arc::clone(&self.scheme),
            rest_config: self.rest_config.clone(),
            api_reader: self.api_reader.clone(),
        }
    }

    pub fn controller_names(&self) -> Vec<&str> {
        self.controllers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Close controller registration
    pub fn complete_registration(&mut self) -> Result<()> {
        self.lifecycle.advance(LifecycleState::ControllersRegistered)
    }

    pub fn add_healthz_check(&mut self, name: &str, check: HealthCheck) -> Result<()> {
        self.lifecycle
            .require(LifecycleState::ControllersRegistered, "add health check")?;
        self.health.add_healthz(name, check)
    }

    pub fn add_readyz_check(&mut self, name: &str, check: HealthCheck) -> Result<()> {
        self.lifecycle
            .require(LifecycleState::ControllersRegistered, "add ready check")?;
        self.health.add_readyz(name, check)
    }

    /// Close health wiring; both probes need at least one check
    pub fn complete_health_wiring(&mut self) -> Result<()> {
        if !self.health.has_healthz() {
            return Err(Error::HealthCheckError {
                probe: "health",
                reason: "no liveness check registered".to_string(),
            });
        }
        if !self.health.has_readyz() {
            return Err(Error::HealthCheckError {
                probe: "ready",
                reason: "no readiness check registered".to_string(),
            });
        }
        self.lifecycle.advance(LifecycleState::HealthWired)
    }

    /// Serve probes and metrics, wait for leadership when enabled, run every
    /// controller until `shutdown` fires, then stop them.
    pub async fn start(mut self, shutdown: CancellationToken) -> Result<()> {
        self.lifecycle.require(LifecycleState::HealthWired, "start")?;

        let health_listener = bind(&self.config.health_probe_bind_address).await?;
        let metrics_listener = bind(&self.config.metrics_bind_address).await?;

        let servers = CancellationToken::new();
        let checks = Arc::new(std::mem::take(&mut self.health));
        let health_task = tokio::spawn({
            let servers = servers.clone();
            async move {
                if let Err(e) = health::serve(health_listener, checks, servers).await {
                    error!(error = %e, "Health probe server failed");
                }
            }
        });
        let metrics_task = tokio::spawn({
            let servers = servers.clone();
            async move {
                if let Err(e) = metrics::serve(metrics_listener, servers).await {
                    error!(error = %e, "Metrics server failed");
                }
            }
        });

        let result = self.run_controllers(shutdown).await;

        servers.cancel();
        join_servers(vec![("health", health_task), ("metrics", metrics_task)]).await;
        self.lifecycle.advance(LifecycleState::Stopped)?;
        info!("Manager stopped");
        result
    }

    async fn run_controllers(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut guard = None;
        if self.config.leader_elect {
            let elector = Arc::new(self.leader_elector());
            tokio::select! {
                acquired = Arc::clone(&elector).acquire() => guard = Some(acquired),
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested before leadership was acquired");
                    self.lifecycle.advance(LifecycleState::Terminating)?;
                    return Ok(());
                }
            }
        }

        self.lifecycle.advance(LifecycleState::Running)?;
        info!(controllers = self.controllers.len(), "Starting controllers");

        // Cancelled only after the select so a signal cannot race a controller exit.
        let root = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for (name, runnable) in std::mem::take(&mut self.controllers) {
            let token = root.clone();
            tasks.spawn(async move {
                runnable.start(token).await;
                name
            });
        }

        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Received shutdown signal, stopping controllers");
                Ok(())
            }
            _ = leadership_lost(&mut guard) => {
                Err(Error::LeaderElectionError("leader election lost".to_string()))
            }
            Some(joined) = tasks.join_next() => match joined {
                Ok(name) => Err(Error::ManagerError(format!("controller {} exited unexpectedly", name))),
                Err(e) => Err(Error::ManagerError(format!("controller task failed: {}", e))),
            },
        };

        self.lifecycle.advance(LifecycleState::Terminating)?;
        root.cancel();
        let grace = self.config.graceful_shutdown_timeout();
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(?grace, "Controllers did not stop in time, aborting them");
            tasks.abort_all();
        }

        if let Some(guard) = guard {
            if outcome.is_ok() {
                if let Err(e) = guard.release().await {
                    warn!(error = %e, "Failed to release leader lease");
                }
            }
        }
        outcome
    }

    fn leader_elector(&self) -> LeaderElector {
        let namespace = self
            .config
            .leader_election_namespace
            .clone()
            .unwrap_or_else(|| self.client.default_namespace().to_string());
        let store = self.lease_store.clone().unwrap_or_else(|| {
            Arc::new(KubeLeaseStore::new(self.client.clone(), &namespace)) as Arc<dyn LeaseStore>
        });
        LeaderElector::new(
            store,
            &self.config.leader_election_id,
            &namespace,
            &leader::default_identity(),
        )
    }
}

impl ControllerRegistry for Manager {
    fn add_controller(&mut self, name: &str, runnable: Box<dyn Runnable>) -> Result<()> {
        self.lifecycle
            .require(LifecycleState::Configured, "add controller")
            .map_err(|e| Error::ControllerSetup {
                controller: name.to_string(),
                reason: e.to_string(),
            })?;
        if self.controllers.iter().any(|(existing, _)| existing == name) {
            return Err(Error::ControllerSetup {
                controller: name.to_string(),
                reason: "a controller with this name is already registered".to_string(),
            });
        }
        info!(controller = name, "Registered controller");
        self.controllers.push((name.to_string(), runnable));
        Ok(())
    }
}

async fn bind(address: &str) -> Result<TcpListener> {
    let addr = crate::config::parse_bind_address(address)?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ManagerError(format!("unable to bind {}: {}", address, e)))
}

async fn leadership_lost(guard: &mut Option<LeaderGuard>) {
    match guard {
        Some(guard) => guard.lost().await,
        None => std::future::pending().await,
    }
}

/// Wait for the server tasks, logging any that panicked or were cancelled.
/// Returns the names of those that did not finish cleanly.
async fn join_servers(tasks: Vec<(&'static str, JoinHandle<()>)>) -> Vec<&'static str> {
    let mut failed = Vec::new();
    for (server, task) in tasks {
        if let Err(e) = task.await {
            error!(server, error = %e, "Server task did not finish cleanly");
            failed.push(server);
        }
    }
    failed
}
