//! Work the manager starts once it is running

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// A long-running loop owned by the manager (a controller, typically)
pub trait Runnable: Send {
    /// Run until `shutdown` is cancelled
    fn start(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, ()>;
}

/// Where activated controllers are registered
pub trait ControllerRegistry {
    /// Register a controller under a unique name
    fn add_controller(&mut self, name: &str, runnable: Box<dyn Runnable>) -> Result<()>;
}
