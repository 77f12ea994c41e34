//! Health Check and Metrics Endpoint
//!
//! HTTP surface for the host binary.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of every managed connection
//! - `GET /healthz` - liveness probe (always OK)
//! - `GET /readyz` - readiness probe (at least one connection open)
//! - `GET /metrics` - Prometheus text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::websocket::{ConnectionClient, ConnectionStatus};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// One entry per managed connection.
    pub connections: Vec<ConnectionInfo>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every connection is open.
    Healthy,
    /// Some connections are open.
    Degraded,
    /// No connection is open.
    Unhealthy,
}

/// Status of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Venue URL.
    pub url: String,
    /// Lifecycle state name.
    pub state: &'static str,
    /// Whether the connection is open.
    pub connected: bool,
    /// Last pong, ms since the epoch.
    pub last_pong: Option<i64>,
    /// When the connection opened, ms since the epoch.
    pub connection_established: Option<i64>,
    /// Recorded subscriptions.
    pub subscriptions: usize,
    /// Error that ended the last connection.
    pub last_error: Option<String>,
}

impl ConnectionInfo {
    fn from_client(client: &ConnectionClient) -> Self {
        let status = client.status();
        Self {
            url: client.url().to_string(),
            state: status.as_str(),
            connected: status == ConnectionStatus::Open,
            last_pong: client.last_pong(),
            connection_established: client.connection_established(),
            subscriptions: client.subscriptions().len(),
            last_error: client.error().map(|error| error.to_string()),
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    clients: Vec<ConnectionClient>,
}

impl HealthServerState {
    /// Create state reporting on `clients`.
    #[must_use]
    pub fn new(version: impl Into<String>, clients: Vec<ConnectionClient>) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            clients,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.clients.iter().any(ConnectionClient::is_open) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connections: Vec<_> = state.clients.iter().map(ConnectionInfo::from_client).collect();
    HealthResponse {
        status: determine_health_status(&connections),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connections,
    }
}

fn determine_health_status(connections: &[ConnectionInfo]) -> HealthStatus {
    let open = connections.iter().filter(|info| info.connected).count();
    match open {
        0 => HealthStatus::Unhealthy,
        n if n == connections.len() => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::config::ClientConfig;
    use crate::infrastructure::websocket::{ClientCallbacks, MemoryTransport};

    fn info(connected: bool) -> ConnectionInfo {
        ConnectionInfo {
            url: "memory://venue".to_string(),
            state: if connected { "open" } else { "closed" },
            connected,
            last_pong: None,
            connection_established: None,
            subscriptions: 0,
            last_error: None,
        }
    }

    fn idle_client() -> ConnectionClient {
        let (transport, _server) = MemoryTransport::pair();
        ConnectionClient::new(
            "memory://venue",
            ClientConfig::default(),
            Arc::new(transport),
            ClientCallbacks::new(),
        )
        .unwrap()
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn status_follows_open_connections() {
        assert_eq!(
            determine_health_status(&[info(true), info(true)]),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&[info(true), info(false)]),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&[info(false)]),
            HealthStatus::Unhealthy
        );
        assert_eq!(determine_health_status(&[]), HealthStatus::Unhealthy);
    }

    #[test]
    fn idle_client_is_reported() {
        let state = HealthServerState::new("0.1.0", vec![idle_client()]);
        let response = build_health_response(&state);
        assert_eq!(response.connections[0].state, "idle");
        assert!(!response.connections[0].connected);
    }

    #[tokio::test]
    async fn readiness_requires_an_open_connection() {
        let app = router(Arc::new(HealthServerState::new("0.1.0", vec![idle_client()])));

        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let app = router(Arc::new(HealthServerState::new("0.1.0", Vec::new())));

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
