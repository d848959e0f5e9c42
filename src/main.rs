//! Namespace Configuration Operator
//!
//! Main entry point for the operator. Resolves configuration, installs the
//! signal handlers and runs the startup sequence; any setup failure exits
//! non-zero.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use namespace_configuration_operator::bootstrap;
use namespace_configuration_operator::config::OperatorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::load();

    init_tracing(config.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        leader_elect = config.leader_elect,
        namespace_scope = ?config.namespace_scope,
        "Starting Namespace Configuration Operator"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    if let Err(e) = bootstrap::run(config, shutdown).await {
        error!("Namespace Configuration Operator failed: {}", e);
        std::process::exit(1);
    }

    info!("Namespace Configuration Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,namespace_configuration_operator=debug,kube=warn,hyper=warn")
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install CTRL+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
