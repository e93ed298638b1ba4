//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::exporter::MetricsExporter;
use crate::health::SharedHealth;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    exporter: Arc<MetricsExporter>,
    health: SharedHealth,
}

/// Create the HTTP router.
pub fn create_router(
    exporter: Arc<MetricsExporter>,
    health: SharedHealth,
    metrics_path: &str,
) -> Router {
    let state = AppState { exporter, health };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.exporter.render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to render metrics: {}\n", e),
            )
                .into_response()
        }
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.health.any_success() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no device polled successfully yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    exporter: Arc<MetricsExporter>,
    health: SharedHealth,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(
        exporter: Arc<MetricsExporter>,
        health: SharedHealth,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Self {
        Self {
            exporter,
            health,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listener without serving yet.
    ///
    /// Lets startup fail on an unavailable address before any device is polled.
    pub async fn bind(self) -> anyhow::Result<BoundHttpServer> {
        let router = create_router(self.exporter, self.health, &self.metrics_path);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        Ok(BoundHttpServer {
            listener,
            router,
            local_addr,
        })
    }

    /// Bind, then serve until the shutdown signal turns true.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.bind().await?.serve(shutdown).await
    }
}

/// A server whose listener is bound.
pub struct BoundHttpServer {
    listener: tokio::net::TcpListener,
    router: Router,
    local_addr: SocketAddr,
}

impl BoundHttpServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the shutdown signal turns true.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::health::HealthTracker;
    use crate::registry::{MetricRegistry, SharedRegistry};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use plugsight_common::{MetricKind, MetricRecord, MetricValue};
    use tower::ServiceExt;

    fn make_exporter() -> (Arc<MetricsExporter>, SharedRegistry, SharedHealth) {
        let registry = Arc::new(MetricRegistry::new());
        let health = Arc::new(HealthTracker::new());
        let exporter = Arc::new(MetricsExporter::new(
            registry.clone(),
            health.clone(),
            &HttpConfig::default(),
            &[],
        ));
        (exporter, registry, health)
    }

    fn make_router(path: &str) -> (Router, SharedRegistry, SharedHealth) {
        let (exporter, registry, health) = make_exporter();
        (create_router(exporter, health.clone(), path), registry, health)
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (router, registry, _) = make_router("/metrics");
        registry.upsert(MetricRecord::new(
            "power_watts",
            MetricKind::Gauge,
            MetricValue::Number(42.0),
            "watts",
            "p1",
            1,
        ));

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(
            content_type.to_str().unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );

        let body = body_string(response).await;
        assert!(body.contains("smartplug_power_watts{device_id=\"p1\",unit=\"watts\"} 42"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_kind_conflict_is_500() {
        let (router, registry, _) = make_router("/metrics");
        registry.upsert(MetricRecord::new(
            "relay",
            MetricKind::Gauge,
            MetricValue::Number(1.0),
            "",
            "p1",
            1,
        ));
        registry.upsert(MetricRecord::new(
            "relay",
            MetricKind::Counter,
            MetricValue::Number(1.0),
            "",
            "p2",
            1,
        ));

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (router, _, _) = make_router("/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "healthy\n");
    }

    #[tokio::test]
    async fn test_ready_endpoint_transitions() {
        let (router, _, health) = make_router("/metrics");
        health.register("p1");

        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        health.record_failure("p1", "timeout");
        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        health.record_success("p1", 1, 0);
        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let (router, _, _) = make_router("/prometheus/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let (exporter, _, health) = make_exporter();

        let server = HttpServer::new(
            exporter,
            health,
            taken.local_addr().unwrap(),
            "/metrics".to_string(),
        );

        let err = server.bind().await.err().expect("bind should fail");
        assert!(err.to_string().starts_with("Failed to bind to 127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_bound_server_serves_until_shutdown() {
        let (exporter, _, health) = make_exporter();
        let server = HttpServer::new(
            exporter,
            health,
            "127.0.0.1:0".parse().unwrap(),
            "/metrics".to_string(),
        );

        let bound = server.bind().await.unwrap();
        let addr = bound.local_addr();
        assert_ne!(addr.port(), 0);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(bound.serve(rx));

        let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}
