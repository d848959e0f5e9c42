//! Manager lifecycle state machine

use std::fmt;

use crate::{Error, Result};

/// Where the manager is in its life
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    ControllersRegistered,
    HealthWired,
    Running,
    Terminating,
    Stopped,
}

impl LifecycleState {
    /// The only state reachable from this one in normal operation
    pub fn next(self) -> Option<Self> {
        use LifecycleState::*;
        match self {
            Unconfigured => Some(Configured),
            Configured => Some(ControllersRegistered),
            ControllersRegistered => Some(HealthWired),
            HealthWired => Some(Running),
            Running => Some(Terminating),
            Terminating => Some(Stopped),
            Stopped => None,
        }
    }

    /// Whether `to` may follow `self`.
    ///
    /// Besides the normal sequence, a standby replica that is signalled while
    /// still waiting for the leader lease goes from `HealthWired` straight to
    /// `Terminating`: it never ran controllers.
    pub fn can_advance_to(self, to: Self) -> bool {
        self.next() == Some(to)
            || (self == LifecycleState::HealthWired && to == LifecycleState::Terminating)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Forward-only lifecycle tracker that publishes every transition
pub struct Lifecycle {
    tx: tokio::sync::watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new(initial: LifecycleState) -> Self {
        let (tx, _) = tokio::sync::watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    pub fn advance(&self, to: LifecycleState) -> Result<()> {
        let from = self.current();
        if !from.can_advance_to(to) {
            return Err(Error::LifecycleError {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.tx.send_replace(to);
        tracing::debug!(%from, %to, "Manager lifecycle transition");
        Ok(())
    }

    /// Fail unless the manager is currently in `expected`
    pub fn require(&self, expected: LifecycleState, action: &str) -> Result<()> {
        let current = self.current();
        if current != expected {
            return Err(Error::ManagerError(format!(
                "cannot {} while manager is {} (expected {})",
                action, current, expected
            )));
        }
        Ok(())
    }
}
