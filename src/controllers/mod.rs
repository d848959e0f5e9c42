//! Controllers for NamespaceConfig, UserConfig and GroupConfig resources
//!
//! The three controllers share one reconcile loop. Each configuration kind
//! says which objects it selects (namespaces, users or groups); the loop
//! renders the templates once per selected object and hands the result to the
//! controller's enforcement engine.

pub mod activation;
pub mod group_config;
pub mod namespace_config;
pub mod user_config;

pub use activation::{
    default_controllers, ActivationReport, ControllerActivator, ControllerEntry, ControllerParts,
    Eligibility,
};

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{ListParams, Patch, PatchParams};
use kube::core::ClusterResourceScope;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::template::TemplateRenderer;
use crate::config::NamespaceScopePolicy;
use crate::crd::{Condition, EnforcingStatus, LockedResourceTemplate};
use crate::engine::{EnforcementEngine, EnforcementReport, LockedResource};
use crate::manager::Runnable;
use crate::metrics::prometheus::{
    LOCKED_RESOURCES, RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS,
};
use crate::{Error, Result};

/// Requeue interval after a successful pass, so drift is corrected even
/// without a watch event
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// A configuration kind that enforces templates for the objects it selects
pub trait EnforcingConfig:
    Resource<DynamicType = (), Scope = ClusterResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// The kind of object the configuration selects
    type Target: Resource<DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static;

    const KIND: &'static str;
    const FINALIZER: &'static str;

    fn templates(&self) -> &[LockedResourceTemplate];

    /// Keep the candidates this configuration applies to
    fn select(
        &self,
        candidates: Vec<Self::Target>,
        scope: NamespaceScopePolicy,
    ) -> Vec<Self::Target>;
}

/// Shared context for one controller
pub struct Context {
    pub client: Client,
    pub engine: Arc<dyn EnforcementEngine>,
    pub renderer: TemplateRenderer,
    pub namespace_scope: NamespaceScopePolicy,
}

impl Context {
    pub fn new(parts: ControllerParts) -> Arc<Self> {
        Arc::new(Self {
            client: parts.client,
            engine: parts.engine,
            renderer: TemplateRenderer::new(),
            namespace_scope: parts.namespace_scope,
        })
    }
}

/// Controller loop for configuration kind `K`
pub struct ConfigController<K> {
    ctx: Arc<Context>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EnforcingConfig> ConfigController<K> {
    pub fn new(parts: ControllerParts) -> Self {
        Self {
            ctx: Context::new(parts),
            _kind: PhantomData,
        }
    }

    /// Constructor used by the activation table
    pub fn boxed(parts: ControllerParts) -> Box<dyn Runnable> {
        Box::new(Self::new(parts))
    }
}

impl<K: EnforcingConfig> Runnable for ConfigController<K> {
    fn start(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(run::<K>(self.ctx, shutdown))
    }
}

/// Run the controller for `K` until `shutdown` fires
pub async fn run<K: EnforcingConfig>(ctx: Arc<Context>, shutdown: CancellationToken) {
    let configs: Api<K> = Api::all(ctx.client.clone());
    let targets: Api<K::Target> = Api::all(ctx.client.clone());

    info!(kind = K::KIND, "Starting controller");

    let controller = Controller::new(configs, Config::default().any_semantic());
    let store = controller.store();
    let events = controller
        // Any change to a selectable object can change what every config selects
        .watches(targets, Config::default(), move |_| {
            store
                .state()
                .into_iter()
                .map(|config| ObjectRef::from_obj(&*config))
                .collect::<Vec<_>>()
        })
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {}", obj),
                Err(e) => warn!("Reconcile failed: {}", e),
            }
        });

    tokio::select! {
        _ = events => warn!(kind = K::KIND, "Controller stream ended"),
        _ = shutdown.cancelled() => {}
    }

    info!(kind = K::KIND, "Controller stopped");
}

#[instrument(skip(config, ctx), fields(kind = K::KIND, name = %config.name_any()))]
async fn reconcile<K: EnforcingConfig>(config: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    let start = std::time::Instant::now();
    let name = config.name_any();

    RECONCILIATIONS.with_label_values(&[K::KIND]).inc();

    let configs: Api<K> = Api::all(ctx.client.clone());
    let result = finalizer(&configs, K::FINALIZER, config, |event| async {
        match event {
            Event::Apply(config) => apply(&*config, &configs, &ctx).await,
            Event::Cleanup(config) => cleanup(&*config, &ctx).await,
        }
    })
    .await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&[K::KIND])
        .observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {} {} in {:.2}s", K::KIND, name, duration),
        Err(e) => {
            RECONCILIATION_ERRORS.with_label_values(&[K::KIND]).inc();
            error!("Failed to reconcile {} {}: {}", K::KIND, name, e);
        }
    }

    Ok(result?)
}

async fn selected_objects<K: EnforcingConfig>(config: &K, ctx: &Context) -> Result<Vec<K::Target>> {
    let targets: Api<K::Target> = Api::all(ctx.client.clone());
    let candidates = targets.list(&ListParams::default()).await?.items;
    Ok(config.select(candidates, ctx.namespace_scope))
}

async fn apply<K: EnforcingConfig>(config: &K, configs: &Api<K>, ctx: &Context) -> Result<Action> {
    let name = config.name_any();
    let owner = config.object_ref(&());

    let outcome = enforce(config, &owner, ctx).await;
    update_status(config, configs, &outcome).await?;
    let report = outcome?;

    LOCKED_RESOURCES
        .with_label_values(&[K::KIND, &name])
        .set(report.applied.len() as f64);
    info!(
        locked = report.applied.len(),
        "Enforced {} {}",
        K::KIND,
        name
    );

    Ok(Action::requeue(RESYNC_INTERVAL))
}

async fn enforce<K: EnforcingConfig>(
    config: &K,
    owner: &ObjectReference,
    ctx: &Context,
) -> Result<EnforcementReport> {
    let selected = selected_objects(config, ctx).await?;
    debug!(selected = selected.len(), "Selected objects");
    let resources = ctx.renderer.render_all(config.templates(), &selected)?;
    ctx.engine.enforce(owner, &resources).await
}

/// Release everything the configuration still renders to.
///
/// Templates that no longer render are skipped so a broken template cannot
/// block deletion.
async fn cleanup<K: EnforcingConfig>(config: &K, ctx: &Context) -> Result<Action> {
    let name = config.name_any();
    info!("Cleaning up {} {}", K::KIND, name);

    let selected = selected_objects(config, ctx).await?;
    let mut resources: Vec<LockedResource> = Vec::new();
    for object in &selected {
        for template in config.templates() {
            match ctx.renderer.render(template, object) {
                Ok(resource) => resources.push(resource),
                Err(e) => warn!(error = %e, "Skipping template during cleanup"),
            }
        }
    }

    ctx.engine.release(&config.object_ref(&()), &resources).await?;
    let _ = LOCKED_RESOURCES.remove_label_values(&[K::KIND, &name]);

    Ok(Action::await_change())
}

async fn update_status<K: EnforcingConfig>(
    config: &K,
    configs: &Api<K>,
    outcome: &Result<EnforcementReport>,
) -> Result<()> {
    let (locked_resources, condition) = match outcome {
        Ok(report) => (report.applied.clone(), Condition::success(report.applied.len())),
        Err(e) => (Vec::new(), Condition::failure(e.to_string())),
    };
    let status = EnforcingStatus {
        locked_resources,
        observed_generation: config.meta().generation,
        last_update_time: Some(Utc::now()),
        conditions: vec![condition],
    };

    configs
        .patch_status(
            &config.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await
        .map_err(|e| Error::KubeError(format!("Failed to update {} status: {}", K::KIND, e)))?;

    Ok(())
}

fn error_policy<K: EnforcingConfig>(config: Arc<K>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        "Reconciliation error for {} {}: {}",
        K::KIND,
        config.name_any(),
        err
    );

    match err {
        Error::KubeError(_) => Action::requeue(Duration::from_secs(30)),
        Error::ValidationError(_) | Error::TemplateError(_) => {
            Action::requeue(Duration::from_secs(300))
        }
        _ => Action::requeue(Duration::from_secs(60)),
    }
}

/// Whether an object's labels and annotations satisfy both selectors
pub(crate) fn selected_by<T: Resource>(
    object: &T,
    label_selector: &crate::crd::Selector,
    annotation_selector: &crate::crd::Selector,
) -> bool {
    let meta = object.meta();
    crate::adapters::selector::matches(label_selector, meta.labels.as_ref())
        && crate::adapters::selector::matches(annotation_selector, meta.annotations.as_ref())
}
