//! Capability-gated controller activation
//!
//! The activation table lists every controller the operator knows about and
//! when it is worth running. Mandatory controllers are always registered.
//! Optional ones are registered only when the cluster serves the kind they
//! select, so a plain Kubernetes cluster runs without the OpenShift identity
//! controllers instead of failing on a missing API.

use std::collections::HashSet;
use std::sync::Arc;

use kube::core::GroupVersionKind;
use kube::Client;
use tracing::info;

use super::ConfigController;
use crate::config::NamespaceScopePolicy;
use crate::crd::openshift::{USER_GROUP, USER_VERSION};
use crate::crd::{GroupConfig, NamespaceConfig, UserConfig};
use crate::discovery::CapabilityProbe;
use crate::engine::{EnforcementEngine, EngineFactory, EngineFlags, EngineParams};
use crate::error::display_gvk;
use crate::manager::{ControllerRegistry, Runnable};
use crate::metrics::prometheus::CONTROLLER_ACTIVE;
use crate::{Error, Result};

/// When a controller should be registered
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Eligibility {
    Always,
    /// Only when discovery reports the kind as served
    Served(GroupVersionKind),
}

/// What a controller is built from
pub struct ControllerParts {
    pub client: Client,
    pub engine: Arc<dyn EnforcementEngine>,
    pub namespace_scope: NamespaceScopePolicy,
}

/// One row of the activation table
pub struct ControllerEntry {
    pub name: &'static str,
    pub eligibility: Eligibility,
    pub construct: fn(ControllerParts) -> Box<dyn Runnable>,
}

impl ControllerEntry {
    /// Name of the event recorder handed to this controller's engine
    pub fn recorder_name(&self) -> String {
        format!("{}_controller", self.name)
    }
}

/// The operator's controllers
pub fn default_controllers() -> Vec<ControllerEntry> {
    vec![
        ControllerEntry {
            name: "NamespaceConfig",
            eligibility: Eligibility::Always,
            construct: ConfigController::<NamespaceConfig>::boxed,
        },
        ControllerEntry {
            name: "UserConfig",
            eligibility: Eligibility::Served(GroupVersionKind::gvk(USER_GROUP, USER_VERSION, "User")),
            construct: ConfigController::<UserConfig>::boxed,
        },
        ControllerEntry {
            name: "GroupConfig",
            eligibility: Eligibility::Served(GroupVersionKind::gvk(
                USER_GROUP,
                USER_VERSION,
                "Group",
            )),
            construct: ConfigController::<GroupConfig>::boxed,
        },
    ]
}

/// Which controllers were registered and which were skipped
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub registered: Vec<String>,
    pub skipped: Vec<String>,
}

/// Runs the activation table against a registry
pub struct ControllerActivator {
    probe: Arc<dyn CapabilityProbe>,
    factory: Arc<dyn EngineFactory>,
    params: EngineParams,
    namespace_scope: NamespaceScopePolicy,
}

impl ControllerActivator {
    pub fn new(
        probe: Arc<dyn CapabilityProbe>,
        factory: Arc<dyn EngineFactory>,
        params: EngineParams,
        namespace_scope: NamespaceScopePolicy,
    ) -> Self {
        Self {
            probe,
            factory,
            params,
            namespace_scope,
        }
    }

    /// Register every eligible controller.
    ///
    /// A kind that is not served skips its controller. A probe that cannot
    /// tell, or any construction or registration failure, aborts activation.
    pub async fn activate<R>(
        &self,
        entries: Vec<ControllerEntry>,
        registry: &mut R,
    ) -> Result<ActivationReport>
    where
        R: ControllerRegistry + ?Sized,
    {
        check_unique(&entries)?;

        let mut report = ActivationReport::default();
        for entry in entries {
            if let Eligibility::Served(gvk) = &entry.eligibility {
                if !self.probe.exists(gvk).await? {
                    info!(
                        controller = entry.name,
                        kind = %display_gvk(gvk),
                        "Kind not served by this cluster, controller not started"
                    );
                    CONTROLLER_ACTIVE.with_label_values(&[entry.name]).set(0.0);
                    report.skipped.push(entry.name.to_string());
                    continue;
                }
            }

            let binding = self
                .params
                .bind(&entry.recorder_name(), EngineFlags::default());
            let engine = self
                .factory
                .build(binding)
                .map_err(|e| Error::ControllerSetup {
                    controller: entry.name.to_string(),
                    reason: format!("unable to build enforcement engine: {}", e),
                })?;

            let runnable = (entry.construct)(ControllerParts {
                client: self.params.client.clone(),
                engine,
                namespace_scope: self.namespace_scope,
            });
            registry
                .add_controller(entry.name, runnable)
                .map_err(|e| match e {
                    Error::ControllerSetup { .. } => e,
                    other => Error::ControllerSetup {
                        controller: entry.name.to_string(),
                        reason: other.to_string(),
                    },
                })?;

            CONTROLLER_ACTIVE.with_label_values(&[entry.name]).set(1.0);
            report.registered.push(entry.name.to_string());
        }

        Ok(report)
    }
}

fn check_unique(entries: &[ControllerEntry]) -> Result<()> {
    let mut names = HashSet::new();
    let mut recorders = HashSet::new();
    for entry in entries {
        if !names.insert(entry.name) {
            return Err(Error::ControllerSetup {
                controller: entry.name.to_string(),
                reason: "controller name appears twice in the activation table".to_string(),
            });
        }
        if !recorders.insert(entry.recorder_name()) {
            return Err(Error::ControllerSetup {
                controller: entry.name.to_string(),
                reason: format!("recorder name {} is already in use", entry.recorder_name()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MockCapabilityProbe;
    use crate::engine::{EnforcementReport, EngineBinding, LockedResource};
    use crate::scheme::SchemeRegistry;
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use k8s_openapi::api::core::v1::ObjectReference;
    use std::cell::RefCell;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct FakeEngine(String);

    #[async_trait]
    impl EnforcementEngine for FakeEngine {
        fn recorder_name(&self) -> &str {
            &self.0
        }

        async fn enforce(
            &self,
            _owner: &ObjectReference,
            _resources: &[LockedResource],
        ) -> Result<EnforcementReport> {
            Ok(EnforcementReport::default())
        }

        async fn release(&self, _owner: &ObjectReference, _resources: &[LockedResource]) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingFactory {
        recorders: Mutex<Vec<String>>,
    }

    impl EngineFactory for RecordingFactory {
        fn build(&self, binding: EngineBinding) -> Result<Arc<dyn EnforcementEngine>> {
            let name = binding.recorder.name().to_string();
            self.recorders.lock().unwrap().push(name.clone());
            Ok(Arc::new(FakeEngine(name)))
        }
    }

    #[derive(Default)]
    struct Registry {
        names: Vec<String>,
    }

    impl ControllerRegistry for Registry {
        fn add_controller(&mut self, name: &str, _runnable: Box<dyn Runnable>) -> Result<()> {
            self.names.push(name.to_string());
            Ok(())
        }
    }

    struct Noop;

    impl Runnable for Noop {
        fn start(self: Box<Self>, _shutdown: CancellationToken) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    fn noop(_parts: ControllerParts) -> Box<dyn Runnable> {
        Box::new(Noop)
    }

    fn params() -> EngineParams {
        let rest_config = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
        let client = Client::try_from(rest_config.clone()).unwrap();
        EngineParams {
            client: client.clone(),
            scheme: Arc::new(SchemeRegistry::new()),
            rest_config,
            api_reader: client,
        }
    }

    thread_local! {
        static SCOPES: RefCell<Vec<NamespaceScopePolicy>> = const { RefCell::new(Vec::new()) };
    }

    fn scope_recording(parts: ControllerParts) -> Box<dyn Runnable> {
        SCOPES.with(|scopes| scopes.borrow_mut().push(parts.namespace_scope));
        Box::new(Noop)
    }

    fn activator(probe: MockCapabilityProbe, factory: Arc<RecordingFactory>) -> ControllerActivator {
        scoped_activator(probe, factory, NamespaceScopePolicy::Restricted)
    }

    fn scoped_activator(
        probe: MockCapabilityProbe,
        factory: Arc<RecordingFactory>,
        scope: NamespaceScopePolicy,
    ) -> ControllerActivator {
        ControllerActivator::new(Arc::new(probe), factory, params(), scope)
    }

    #[test]
    fn default_table_gates_identity_controllers() {
        let table = default_controllers();
        let names: Vec<_> = table.iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["NamespaceConfig", "UserConfig", "GroupConfig"]);
        assert_eq!(table[0].eligibility, Eligibility::Always);
        assert_eq!(
            table[1].eligibility,
            Eligibility::Served(GroupVersionKind::gvk("user.openshift.io", "v1", "User"))
        );
        assert_eq!(table[2].recorder_name(), "GroupConfig_controller");
    }

    #[tokio::test]
    async fn absent_kinds_skip_their_controllers() {
        let mut probe = MockCapabilityProbe::new();
        probe.expect_exists().times(2).returning(|_| Ok(false));
        let factory = Arc::new(RecordingFactory::default());
        let mut registry = Registry::default();

        let report = activator(probe, factory.clone())
            .activate(default_controllers(), &mut registry)
            .await
            .unwrap();

        assert_eq!(report.registered, vec!["NamespaceConfig"]);
        assert_eq!(report.skipped, vec!["UserConfig", "GroupConfig"]);
        assert_eq!(registry.names, vec!["NamespaceConfig"]);
        assert_eq!(
            *factory.recorders.lock().unwrap(),
            vec!["NamespaceConfig_controller"]
        );
    }

    #[tokio::test]
    async fn served_kinds_get_one_engine_each() {
        let mut probe = MockCapabilityProbe::new();
        probe.expect_exists().returning(|_| Ok(true));
        let factory = Arc::new(RecordingFactory::default());
        let mut registry = Registry::default();

        let report = activator(probe, factory.clone())
            .activate(default_controllers(), &mut registry)
            .await
            .unwrap();

        assert!(report.skipped.is_empty());
        assert_eq!(registry.names, vec!["NamespaceConfig", "UserConfig", "GroupConfig"]);
        assert_eq!(
            *factory.recorders.lock().unwrap(),
            vec![
                "NamespaceConfig_controller",
                "UserConfig_controller",
                "GroupConfig_controller"
            ]
        );
    }

    #[tokio::test]
    async fn indeterminate_probe_is_fatal() {
        let mut probe = MockCapabilityProbe::new();
        probe
            .expect_exists()
            .withf(|gvk| gvk.kind == "User")
            .returning(|_| Err(Error::KubeError("connection refused".to_string())));
        let factory = Arc::new(RecordingFactory::default());
        let mut registry = Registry::default();

        let result = activator(probe, factory)
            .activate(default_controllers(), &mut registry)
            .await;

        assert!(result.is_err());
        assert!(!registry.names.contains(&"UserConfig".to_string()));
        assert!(!registry.names.contains(&"GroupConfig".to_string()));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_before_anything_registers() {
        let probe = MockCapabilityProbe::new();
        let factory = Arc::new(RecordingFactory::default());
        let mut registry = Registry::default();
        let entries = vec![
            ControllerEntry {
                name: "NamespaceConfig",
                eligibility: Eligibility::Always,
                construct: noop,
            },
            ControllerEntry {
                name: "NamespaceConfig",
                eligibility: Eligibility::Always,
                construct: noop,
            },
        ];

        let err = activator(probe, factory)
            .activate(entries, &mut registry)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ControllerSetup { .. }));
        assert!(registry.names.is_empty());
    }

    #[tokio::test]
    async fn registration_failure_is_fatal() {
        struct Closed;

        impl ControllerRegistry for Closed {
            fn add_controller(&mut self, _name: &str, _runnable: Box<dyn Runnable>) -> Result<()> {
                Err(Error::ManagerError("registration is closed".to_string()))
            }
        }

        let probe = MockCapabilityProbe::new();
        let factory = Arc::new(RecordingFactory::default());
        let entries = vec![ControllerEntry {
            name: "NamespaceConfig",
            eligibility: Eligibility::Always,
            construct: noop,
        }];

        let err = activator(probe, factory)
            .activate(entries, &mut Closed)
            .await
            .unwrap_err();

        assert!(
            matches!(err, Error::ControllerSetup { ref controller, .. } if controller == "NamespaceConfig")
        );
    }

    #[tokio::test]
    async fn controllers_receive_the_resolved_namespace_scope() {
        for scope in [NamespaceScopePolicy::Allowed, NamespaceScopePolicy::Restricted] {
            SCOPES.with(|scopes| scopes.borrow_mut().clear());
            let factory = Arc::new(RecordingFactory::default());
            let mut registry = Registry::default();
            let entries = vec![
                ControllerEntry {
                    name: "NamespaceConfig",
                    eligibility: Eligibility::Always,
                    construct: scope_recording,
                },
                ControllerEntry {
                    name: "UserConfig",
                    eligibility: Eligibility::Always,
                    construct: scope_recording,
                },
            ];

            scoped_activator(MockCapabilityProbe::new(), factory, scope)
                .activate(entries, &mut registry)
                .await
                .unwrap();

            assert_eq!(SCOPES.with(|scopes| scopes.borrow().clone()), vec![scope, scope]);
        }
    }
}
