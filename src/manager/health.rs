//! Liveness and readiness probes
//!
//! `/healthz` and `/readyz` each run their registered named checks and
//! answer 200 when all pass, 500 naming the failing checks otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::metrics::text_response;
use crate::{Error, Result};

/// A named probe check
pub type HealthCheck = Arc<dyn Fn() -> std::result::Result<(), String> + Send + Sync>;

/// Check that always succeeds once the process is serving
pub fn ping() -> HealthCheck {
    Arc::new(|| Ok(()))
}

/// Named liveness and readiness checks
#[derive(Clone, Default)]
pub struct HealthChecks {
    healthz: BTreeMap<String, HealthCheck>,
    readyz: BTreeMap<String, HealthCheck>,
}

impl HealthChecks {
    pub fn add_healthz(&mut self, name: &str, check: HealthCheck) -> Result<()> {
        insert_check(&mut self.healthz, "health", name, check)
    }

    pub fn add_readyz(&mut self, name: &str, check: HealthCheck) -> Result<()> {
        insert_check(&mut self.readyz, "ready", name, check)
    }

    pub fn has_healthz(&self) -> bool {
        !self.healthz.is_empty()
    }

    pub fn has_readyz(&self) -> bool {
        !self.readyz.is_empty()
    }

    /// Status and body for a probe path, `None` for unknown paths
    pub fn evaluate(&self, path: &str) -> Option<(StatusCode, String)> {
        let checks = match path {
            "/healthz" => &self.healthz,
            "/readyz" => &self.readyz,
            _ => return None,
        };
        let failed: Vec<String> = checks
            .iter()
            .filter_map(|(name, check)| check().err().map(|e| format!("{}: {}", name, e)))
            .collect();
        if failed.is_empty() {
            Some((StatusCode::OK, "ok".to_string()))
        } else {
            Some((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed checks: {}", failed.join(", ")),
            ))
        }
    }
}

fn insert_check(
    checks: &mut BTreeMap<String, HealthCheck>,
    probe: &'static str,
    name: &str,
    check: HealthCheck,
) -> Result<()> {
    if name.is_empty() {
        return Err(Error::HealthCheckError {
            probe,
            reason: "check name must not be empty".to_string(),
        });
    }
    if checks.contains_key(name) {
        return Err(Error::HealthCheckError {
            probe,
            reason: format!("check {} already registered", name),
        });
    }
    checks.insert(name.to_string(), check);
    Ok(())
}

/// Serve the probes on an already bound listener until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    checks: Arc<HealthChecks>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(address = ?listener.local_addr().ok(), "Health probe server listening");

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.cancelled() => return Ok(()),
        };
        let io = TokioIo::new(stream);
        let checks = Arc::clone(&checks);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let checks = Arc::clone(&checks);
                async move { Ok::<_, hyper::Error>(probe_response(&checks, req.uri().path())) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving probe connection: {}", e);
            }
        });
    }
}

fn probe_response(checks: &HealthChecks, path: &str) -> Response<Full<Bytes>> {
    match checks.evaluate(path) {
        Some((status, body)) => text_response(status, &body),
        None => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_checks_pass() {
        let mut checks = HealthChecks::default();
        checks.add_healthz("health", ping()).unwrap();
        checks.add_readyz("check", ping()).unwrap();

        assert_eq!(checks.evaluate("/healthz").unwrap().0, StatusCode::OK);
        assert_eq!(checks.evaluate("/readyz").unwrap().0, StatusCode::OK);
        assert!(checks.evaluate("/metrics").is_none());
    }

    #[test]
    fn failing_check_is_reported_by_name() {
        let mut checks = HealthChecks::default();
        checks.add_readyz("check", ping()).unwrap();
        checks
            .add_readyz("cache", Arc::new(|| Err("not synced".to_string())))
            .unwrap();

        let (status, body) = checks.evaluate("/readyz").unwrap();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("cache: not synced"));
    }

    #[test]
    fn duplicate_check_name_is_rejected() {
        let mut checks = HealthChecks::default();
        checks.add_healthz("health", ping()).unwrap();
        let err = checks.add_healthz("health", ping()).unwrap_err();
        assert!(matches!(err, Error::HealthCheckError { probe: "health", .. }));
    }

    #[test]
    fn empty_probe_set_reports_ok() {
        let checks = HealthChecks::default();
        assert!(!checks.has_healthz());
        assert_eq!(checks.evaluate("/healthz").unwrap().0, StatusCode::OK);
    }
}
