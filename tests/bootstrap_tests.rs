//! Integration tests for the operator startup sequence
//!
//! These run the bootstrap stages against an unreachable API server. The
//! capability probe is a fake, so nothing ever needs to connect.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use namespace_configuration_operator::bootstrap::Bootstrap;
use namespace_configuration_operator::config::{NamespaceScopePolicy, OperatorConfig};
use namespace_configuration_operator::controllers::{
    default_controllers, ControllerEntry, ControllerParts, Eligibility,
};
use namespace_configuration_operator::discovery::CapabilityProbe;
use namespace_configuration_operator::engine::ApplyEngineFactory;
use namespace_configuration_operator::manager::{LifecycleState, Manager, Runnable};
use namespace_configuration_operator::scheme::{KindSet, SchemeRegistry, TypeDescriptor};
use namespace_configuration_operator::{Error, Result};

// ============================================================================
// Test Helpers
// ============================================================================

/// Probe answering from a fixed list of served kinds, or failing every call
struct StaticProbe {
    served: Vec<&'static str>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticProbe {
    fn serving(served: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            served: served.to_vec(),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            served: vec![],
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CapabilityProbe for StaticProbe {
    async fn exists(&self, gvk: &GroupVersionKind) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::KubeError("discovery unavailable".to_string()));
        }
        Ok(self.served.contains(&gvk.kind.as_str()))
    }
}

struct Idle;

impl Runnable for Idle {
    fn start(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(async move { shutdown.cancelled().await })
    }
}

fn idle(_parts: ControllerParts) -> Box<dyn Runnable> {
    Box::new(Idle)
}

/// The default table with every controller replaced by an idle loop
fn idle_controllers() -> Vec<ControllerEntry> {
    default_controllers()
        .into_iter()
        .map(|entry| ControllerEntry {
            construct: idle,
            ..entry
        })
        .collect()
}

fn local_config() -> OperatorConfig {
    OperatorConfig {
        metrics_bind_address: "127.0.0.1:0".to_string(),
        health_probe_bind_address: "127.0.0.1:0".to_string(),
        graceful_shutdown_timeout_secs: 2,
        ..Default::default()
    }
}

fn offline_rest_config() -> kube::Config {
    kube::Config::new("http://127.0.0.1:9".parse().unwrap())
}

async fn setup(
    kind_sets: Vec<KindSet>,
    probe: Arc<StaticProbe>,
    connects: Arc<AtomicUsize>,
) -> Result<Manager> {
    Bootstrap {
        kind_sets,
        connect: move |config: OperatorConfig, scheme: Arc<SchemeRegistry>| {
            connects.fetch_add(1, Ordering::SeqCst);
            async move { Manager::from_rest_config(config, scheme, offline_rest_config()) }
        },
        probe_for: move |_: &Manager| probe as Arc<dyn CapabilityProbe>,
        factory: Arc::new(ApplyEngineFactory),
        controllers: idle_controllers(),
    }
    .setup(local_config())
    .await
}

// ============================================================================
// Scheme stage
// ============================================================================

#[tokio::test]
async fn bad_scheme_fails_before_connecting() {
    let conflicting = TypeDescriptor {
        api_resource: ApiResource {
            group: String::new(),
            version: "v1".to_string(),
            api_version: "v1".to_string(),
            kind: "Namespace".to_string(),
            plural: "namespacez".to_string(),
        },
        namespaced: false,
    };
    let mut kind_sets = KindSet::defaults();
    kind_sets.push(KindSet::new("conflicting").with_descriptor(conflicting));

    let connects = Arc::new(AtomicUsize::new(0));
    let probe = StaticProbe::serving(&[]);
    let err = setup(kind_sets, probe.clone(), connects.clone())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, Error::SchemeError { ref batch, .. } if batch == "conflicting"));
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Activation stage
// ============================================================================

#[tokio::test]
async fn plain_kubernetes_runs_only_the_namespace_controller() {
    let connects = Arc::new(AtomicUsize::new(0));
    let manager = setup(KindSet::defaults(), StaticProbe::serving(&[]), connects.clone())
        .await
        .unwrap();

    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(manager.controller_names(), vec!["NamespaceConfig"]);
    assert_eq!(manager.state(), LifecycleState::HealthWired);
}

#[tokio::test]
async fn openshift_runs_every_controller() {
    let manager = setup(
        KindSet::defaults(),
        StaticProbe::serving(&["User", "Group"]),
        Arc::new(AtomicUsize::new(0)),
    )
    .await
    .unwrap();

    assert_eq!(
        manager.controller_names(),
        vec!["NamespaceConfig", "UserConfig", "GroupConfig"]
    );
}

#[tokio::test]
async fn users_without_groups_still_registers_user_controller() {
    let manager = setup(
        KindSet::defaults(),
        StaticProbe::serving(&["User"]),
        Arc::new(AtomicUsize::new(0)),
    )
    .await
    .unwrap();

    assert_eq!(manager.controller_names(), vec!["NamespaceConfig", "UserConfig"]);
}

#[tokio::test]
async fn indeterminate_discovery_aborts_setup() {
    let probe = StaticProbe::failing();
    let result = setup(KindSet::defaults(), probe.clone(), Arc::new(AtomicUsize::new(0))).await;

    assert!(result.is_err());
    // The first optional controller fails, the second is never probed
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn always_entries_never_consult_the_probe() {
    let probe = StaticProbe::failing();
    let manager = Bootstrap {
        kind_sets: KindSet::defaults(),
        connect: |config: OperatorConfig, scheme: Arc<SchemeRegistry>| async move {
            Manager::from_rest_config(config, scheme, offline_rest_config())
        },
        probe_for: {
            let probe = probe.clone();
            move |_: &Manager| probe as Arc<dyn CapabilityProbe>
        },
        factory: Arc::new(ApplyEngineFactory),
        controllers: vec![ControllerEntry {
            name: "NamespaceConfig",
            eligibility: Eligibility::Always,
            construct: idle,
        }],
    }
    .setup(local_config())
    .await
    .unwrap();

    assert_eq!(manager.controller_names(), vec!["NamespaceConfig"]);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn manager_runs_until_cancelled() {
    let manager = setup(
        KindSet::defaults(),
        StaticProbe::serving(&["User", "Group"]),
        Arc::new(AtomicUsize::new(0)),
    )
    .await
    .unwrap();

    let mut states = manager.watch_state();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(manager.start(shutdown.clone()));

    states
        .wait_for(|state| *state == LifecycleState::Running)
        .await
        .unwrap();
    shutdown.cancel();

    assert_ok!(run.await.unwrap());
    assert_eq!(*states.borrow(), LifecycleState::Stopped);
}

#[tokio::test]
async fn occupied_probe_port_is_fatal() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = OperatorConfig {
        health_probe_bind_address: taken.local_addr().unwrap().to_string(),
        ..local_config()
    };

    let manager = Bootstrap {
        kind_sets: KindSet::defaults(),
        connect: |config: OperatorConfig, scheme: Arc<SchemeRegistry>| async move {
            Manager::from_rest_config(config, scheme, offline_rest_config())
        },
        probe_for: |_: &Manager| StaticProbe::serving(&[]) as Arc<dyn CapabilityProbe>,
        factory: Arc::new(ApplyEngineFactory),
        controllers: idle_controllers(),
    }
    .setup(config)
    .await
    .unwrap();

    let err = manager.start(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::ManagerError(_)));
}

// ============================================================================
// Namespace scope policy
// ============================================================================

#[test]
fn namespace_scope_from_environment_values() {
    let cases = [
        (None, NamespaceScopePolicy::Restricted),
        (Some(""), NamespaceScopePolicy::Restricted),
        (Some("yes"), NamespaceScopePolicy::Restricted),
        (Some("false"), NamespaceScopePolicy::Restricted),
        (Some("true"), NamespaceScopePolicy::Allowed),
        (Some("1"), NamespaceScopePolicy::Allowed),
    ];
    for (value, expected) in cases {
        assert_eq!(
            NamespaceScopePolicy::from_env_value(value.map(str::to_string)),
            expected,
            "{value:?}"
        );
    }
}
