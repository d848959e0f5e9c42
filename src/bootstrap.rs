//! Operator startup sequence
//!
//! Scheme, manager, controller activation, health wiring, start. Each stage
//! either completes or stops the sequence with its error; nothing is retried
//! and nothing runs half-configured.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::OperatorConfig;
use crate::controllers::{default_controllers, ControllerActivator, ControllerEntry};
use crate::discovery::{CapabilityProbe, DiscoveryProber};
use crate::engine::{ApplyEngineFactory, EngineFactory};
use crate::manager::{ping, Manager};
use crate::scheme::{KindSet, SchemeRegistry};
use crate::Result;

/// Collaborators the startup sequence is assembled from
pub struct Bootstrap<C, P> {
    pub kind_sets: Vec<KindSet>,
    /// Builds the manager once the scheme is known to be valid
    pub connect: C,
    /// Builds the capability probe from the connected manager
    pub probe_for: P,
    pub factory: Arc<dyn EngineFactory>,
    pub controllers: Vec<ControllerEntry>,
}

impl<C, Fut, P> Bootstrap<C, P>
where
    C: FnOnce(OperatorConfig, Arc<SchemeRegistry>) -> Fut,
    Fut: Future<Output = Result<Manager>>,
    P: FnOnce(&Manager) -> Arc<dyn CapabilityProbe>,
{
    /// Run every setup stage and return a manager ready to start
    pub async fn setup(self, config: OperatorConfig) -> Result<Manager> {
        let namespace_scope = config.namespace_scope;

        let scheme = stage("scheme", SchemeRegistry::from_kind_sets(self.kind_sets))?;
        info!(kinds = scheme.len(), "Scheme assembled");

        let mut manager = stage("manager", (self.connect)(config, Arc::new(scheme)).await)?;

        let activator = ControllerActivator::new(
            (self.probe_for)(&manager),
            self.factory,
            manager.engine_params(),
            namespace_scope,
        );
        let report = stage(
            "controllers",
            activator.activate(self.controllers, &mut manager).await,
        )?;
        info!(
            registered = ?report.registered,
            skipped = ?report.skipped,
            "Controllers activated"
        );
        stage("controllers", manager.complete_registration())?;

        stage("health", manager.add_healthz_check("health", ping()))?;
        stage("health", manager.add_readyz_check("check", ping()))?;
        stage("health", manager.complete_health_wiring())?;

        Ok(manager)
    }
}

/// Build the operator against the configured cluster and run it until
/// `shutdown` fires
pub async fn run(config: OperatorConfig, shutdown: CancellationToken) -> Result<()> {
    let bootstrap = Bootstrap {
        kind_sets: KindSet::defaults(),
        connect: Manager::new,
        probe_for: |manager: &Manager| {
            Arc::new(DiscoveryProber::new(manager.client())) as Arc<dyn CapabilityProbe>
        },
        factory: Arc::new(ApplyEngineFactory),
        controllers: default_controllers(),
    };
    let manager = bootstrap.setup(config).await?;

    info!("Starting manager");
    stage("start", manager.start(shutdown).await)
}

fn stage<T>(name: &'static str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        error!(stage = name, error = %e, "Operator setup failed");
    }
    result
}
