//! HTTP endpoints
//!
//! Provides:
//! - `/health`: "healthy" + version
//! - `/health/live`: liveness probe
//! - `/health/ready`: ready once the scheduler loop runs, until shutdown starts
//! - `/metrics`: Prometheus text exposition

use anyhow::Context;
use axum::extract::Extension;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use cloudnap_core::{JobScheduler, ShutdownController, ShutdownPhase};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics::gather_metrics;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Build information served at `/`
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn liveness() -> &'static str {
    "ok"
}

async fn readiness(
    Extension(scheduler): Extension<Arc<JobScheduler>>,
    Extension(shutdown): Extension<Arc<ShutdownController>>,
) -> impl IntoResponse {
    if shutdown.phase() != ShutdownPhase::Running {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    } else if scheduler.is_running() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

async fn build_info() -> Json<BuildInfo> {
    Json(BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Router with all endpoints
pub fn router(scheduler: Arc<JobScheduler>, shutdown: Arc<ShutdownController>) -> Router {
    Router::new()
        .route("/", get(build_info))
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(scheduler))
        .layer(Extension(shutdown))
}

/// Serve the router on `0.0.0.0:port` until `token` is cancelled
pub async fn serve(
    port: u16,
    scheduler: Arc<JobScheduler>,
    shutdown: Arc<ShutdownController>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {addr}"))?;

    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, router(scheduler, shutdown))
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use cloudnap_core::SchedulerConfig;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn scheduler() -> Arc<JobScheduler> {
        Arc::new(JobScheduler::new(SchedulerConfig::new()))
    }

    fn app(scheduler: Arc<JobScheduler>) -> Router {
        router(scheduler, ShutdownController::new(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_health_reports_version() {
        let (status, body) = get_body(app(scheduler()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_liveness() {
        let (status, body) = get_body(app(scheduler()), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_readiness_follows_scheduler() {
        let scheduler = scheduler();
        let (status, body) = get_body(app(scheduler.clone()), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "starting");

        let token = CancellationToken::new();
        let run = scheduler.clone();
        let run_token = token.clone();
        let handle = tokio::spawn(async move { run.start(run_token).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (status, body) = get_body(app(scheduler.clone()), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text() {
        use cloudnap_core::{MetricsSink, ResourceKind};

        let metrics = crate::metrics::PrometheusMetrics::new().unwrap();
        metrics.inc_correction(ResourceKind::K8sCluster, "start");

        let (status, body) = get_body(app(scheduler()), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("cloudnap_validator_corrections_total"));
    }

    #[tokio::test]
    async fn test_root_serves_build_info() {
        let (status, body) = get_body(app(scheduler()), "/").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["name"], "cloudnap");
    }

    #[tokio::test]
    async fn test_readiness_drops_once_shutdown_starts() {
        let scheduler = scheduler();
        let shutdown = ShutdownController::new(Duration::from_secs(1));
        let token = shutdown.token();
        let run = scheduler.clone();
        shutdown.spawn("scheduler", async move {
            let _ = run.start(token).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (status, _) = get_body(router(scheduler.clone(), shutdown.clone()), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);

        assert!(shutdown.shutdown().await);
        let (status, body) = get_body(router(scheduler, shutdown), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "shutting down");
    }
}
