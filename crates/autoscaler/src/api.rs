//! HTTP API for health checks, Prometheus metrics and scaling control
//!
//! Routes:
//! - `GET /healthz`, `GET /readyz`, `GET /metrics`
//! - `GET /api/v1/status`, `GET /api/v1/metrics`, `GET /api/v1/events`
//! - `GET|POST /api/v1/config`, `POST /api/v1/scale`
//! - `POST /api/v1/outcomes`, `POST /api/v1/workload` (workload feed)

use autoscale_lib::{
    collector::{WorkloadGauge, WorkloadReading},
    health::{ComponentStatus, HealthRegistry},
    observability::ScalerMetrics,
    ConfigUpdate, ScalingError, ScalingManager,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 1000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ScalingManager>,
    pub workload: Arc<WorkloadGauge>,
    pub health_registry: HealthRegistry,
    pub metrics: ScalerMetrics,
}

impl AppState {
    pub fn new(manager: Arc<ScalingManager>, workload: Arc<WorkloadGauge>) -> Self {
        Self {
            health_registry: manager.health().clone(),
            manager,
            workload,
            metrics: ScalerMetrics::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub target_instances: u32,
    #[serde(default = "default_scale_reason")]
    pub reason: String,
}

fn default_scale_reason() -> String {
    "manual scaling via API".to_string()
}

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub endpoint: String,
    pub latency_ms: f64,
    pub success: bool,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn scaling_error_status(err: &ScalingError) -> StatusCode {
    match err {
        ScalingError::Config(_) => StatusCode::BAD_REQUEST,
        ScalingError::SafetyLimit(_) | ScalingError::CostLimit { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ScalingError::Provider(_) | ScalingError::Timeout { .. } => StatusCode::BAD_GATEWAY,
        ScalingError::AlreadyRunning | ScalingError::NotRunning => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
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
        warn!(error = %e, "Failed to encode metrics");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.get_status())
}

async fn detailed_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.get_detailed_metrics().await)
}

async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);
    Json(state.manager.events(query.since, limit))
}

async fn current_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.config().as_ref().clone())
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let update = match ConfigUpdate::from_json(body) {
        Ok(update) => update,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.manager.update_configuration(&update) {
        Ok(config) => (StatusCode::OK, Json(config.as_ref().clone())).into_response(),
        Err(e) => error_response(scaling_error_status(&e), e.to_string()),
    }
}

async fn scale(State(state): State<Arc<AppState>>, Json(request): Json<ScaleRequest>) -> Response {
    info!(
        target_instances = request.target_instances,
        reason = %request.reason,
        "Manual scaling requested"
    );

    match state
        .manager
        .manual_scale(request.target_instances, &request.reason)
        .await
    {
        Ok(execution) => (StatusCode::OK, Json(execution)).into_response(),
        Err(e) => error_response(scaling_error_status(&e), e.to_string()),
    }
}

async fn record_outcome(
    State(state): State<Arc<AppState>>,
    Json(outcome): Json<OutcomeRequest>,
) -> impl IntoResponse {
    state
        .manager
        .collector()
        .record_outcome(&outcome.endpoint, outcome.latency_ms, outcome.success);
    StatusCode::ACCEPTED
}

async fn report_workload(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<WorkloadReading>,
) -> impl IntoResponse {
    state.workload.set(reading);
    state.metrics.set_queue_depth(reading.queue_depth as i64);
    StatusCode::ACCEPTED
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/metrics", get(detailed_metrics))
        .route("/api/v1/events", get(events))
        .route("/api/v1/config", get(current_config).post(update_config))
        .route("/api/v1/scale", post(scale))
        .route("/api/v1/outcomes", post(record_outcome))
        .route("/api/v1/workload", post(report_workload))
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
