//! Leader election using Kubernetes Leases
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs
//! controllers. Every write carries the resourceVersion that was read, so two
//! replicas racing for an expired or missing lease cannot both win: the loser
//! gets a 409 Conflict and keeps waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::IS_LEADER;
use crate::{Error, Result};

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Storage for the lease object
///
/// `create` and `replace` return `Ok(false)` when the write lost a race
/// (the lease already exists, or its resourceVersion moved on).
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Lease>>;
    async fn create(&self, lease: &Lease) -> Result<bool>;
    async fn replace(&self, lease: &Lease) -> Result<bool>;
}

/// Lease store backed by the API server
pub struct KubeLeaseStore {
    api: Api<Lease>,
}

impl KubeLeaseStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl LeaseStore for KubeLeaseStore {
    async fn get(&self, name: &str) -> Result<Option<Lease>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, lease: &Lease) -> Result<bool> {
        match self.api.create(&PostParams::default(), lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, lease: &Lease) -> Result<bool> {
        let name = lease.metadata.name.as_deref().unwrap_or_default();
        match self.api.replace(name, &PostParams::default(), lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Identity of this replica in the lease: pod name (or hostname) plus pid
pub fn default_identity() -> String {
    let host = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "namespace-configuration-operator".to_string());
    format!("{}_{}", host, std::process::id())
}

/// Competes for a named lease
pub struct LeaderElector {
    store: Arc<dyn LeaseStore>,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
    is_leader: AtomicBool,
}

impl LeaderElector {
    /// Create an elector with default timing (15s lease, 5s renew, 2s retry)
    pub fn new(
        store: Arc<dyn LeaseStore>,
        lease_name: &str,
        namespace: &str,
        identity: &str,
    ) -> Self {
        Self {
            store,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
            renew_interval: RENEW_INTERVAL,
            retry_interval: RETRY_INTERVAL,
            is_leader: AtomicBool::new(false),
        }
    }

    pub fn with_timing(mut self, lease: Duration, renew: Duration, retry: Duration) -> Self {
        self.lease_duration = lease;
        self.renew_interval = renew;
        self.retry_interval = retry;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Block until leadership is acquired, then return a guard that keeps
    /// renewing the lease
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "Waiting for leadership"
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    self.set_leader(true);
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(identity = %self.identity, "Lease held by another replica");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying");
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    fn set_leader(&self, leader: bool) {
        self.is_leader.store(leader, Ordering::SeqCst);
        IS_LEADER.set(if leader { 1.0 } else { 0.0 });
    }

    /// One compare-and-swap round: create, renew or take over the lease
    pub async fn try_acquire_or_renew(&self) -> Result<bool> {
        let now = Utc::now();
        let Some(lease) = self.store.get(&self.lease_name).await? else {
            return self.store.create(&self.new_lease(None, now, 0)).await;
        };

        let spec = lease.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.as_deref());
        let resource_version = lease.metadata.resource_version.clone();

        if holder == Some(self.identity.as_str()) {
            let mut renewed = lease.clone();
            if let Some(spec) = renewed.spec.as_mut() {
                spec.renew_time = Some(MicroTime(now));
            }
            let ok = self.store.replace(&renewed).await?;
            if !ok {
                warn!(identity = %self.identity, "Lease renewal conflict");
            }
            return Ok(ok);
        }

        if !is_expired(spec, now) {
            return Ok(false);
        }

        let rv = resource_version.ok_or_else(|| {
            Error::LeaderElectionError("lease is missing resourceVersion".to_string())
        })?;
        let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0) + 1;
        let taken = self
            .store
            .replace(&self.new_lease(Some(rv), now, transitions))
            .await?;
        if taken {
            info!(identity = %self.identity, transitions, "Took over expired lease");
        }
        Ok(taken)
    }

    fn new_lease(&self, resource_version: Option<String>, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration.as_secs().max(1) as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    /// Renew until the lease is lost.
    ///
    /// A failed round is retried for as long as the last successful renewal
    /// keeps the lease valid; only another holder or an expired lease ends
    /// leadership.
    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        let mut renewed_at = Instant::now();
        let mut wait = self.renew_interval;
        loop {
            tokio::time::sleep(wait).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    renewed_at = Instant::now();
                    wait = self.renew_interval;
                }
                Err(e) if renewed_at.elapsed() < self.lease_duration => {
                    warn!(identity = %self.identity, error = %e, "Lease renewal failed, retrying");
                    wait = self.retry_interval;
                }
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    self.set_leader(false);
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Hand the lease back so a standby can take over without waiting for expiry
    pub async fn release(&self) -> Result<()> {
        let Some(lease) = self.store.get(&self.lease_name).await? else {
            return Ok(());
        };
        let spec = lease.spec.as_ref();
        if spec.and_then(|s| s.holder_identity.as_deref()) != Some(self.identity.as_str()) {
            debug!(identity = %self.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        let mut released = lease.clone();
        if let Some(spec) = released.spec.as_mut() {
            spec.holder_identity = None;
            spec.renew_time = Some(MicroTime(Utc::now() - chrono::Duration::seconds(60)));
        }
        if self.store.replace(&released).await? {
            info!(identity = %self.identity, "Lease released");
        }
        self.set_leader(false);
        Ok(())
    }
}

fn is_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    if spec.and_then(|s| s.holder_identity.as_ref()).is_none() {
        return true;
    }
    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    match (renew_time, duration) {
        (Some(rt), Some(secs)) => now > rt.0 + chrono::Duration::seconds(secs as i64),
        _ => true,
    }
}

/// Held while this replica is the leader; renewal stops when dropped
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Stop renewing and hand the lease back
    pub async fn release(self) -> Result<()> {
        self.renewal_task.abort();
        self.elector.release().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
        self.elector.set_leader(false);
    }
}
