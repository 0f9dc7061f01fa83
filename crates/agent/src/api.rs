//! HTTP API for health checks, Prometheus metrics and pressure status

use agent_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::AgentMetrics,
    status::{EventKind, StatusBoard},
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Default number of events returned by `/api/v1/events`
const DEFAULT_EVENT_LIMIT: usize = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    pub status: StatusBoard,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: AgentMetrics, status: StatusBoard) -> Self {
        Self {
            health_registry,
            metrics,
            status,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// One of `image`, `container`, `pod`, `taint`, `cycle`, `pressure`
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CycleCount {
    pub identity: String,
    pub cycles: u32,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Node status from the last pressure tick
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status.status().await)
}

/// Recent events, newest first
async fn events(State(state): State<Arc<AppState>>, Query(query): Query<EventsQuery>) -> Response {
    let kinds = match query.kind.as_deref() {
        None => None,
        Some(kind) => match EventKind::parse(kind) {
            Some(kinds) => Some(kinds),
            None => {
                let body = ErrorBody {
                    error: format!("unknown event kind '{}'", kind),
                };
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
        },
    };
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);

    Json(state.status.recent_events(kinds.as_deref(), limit).await).into_response()
}

/// Evict/recreate cycle counts per workload
async fn cycles(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counts: Vec<CycleCount> = state
        .status
        .cycles()
        .into_iter()
        .map(|(identity, cycles)| CycleCount { identity, cycles })
        .collect();
    Json(counts)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/events", get(events))
        .route("/api/v1/cycles", get(cycles))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
