//! Integration tests for the autoscaler API endpoints

use async_trait::async_trait;
use autoscale_lib::{
    collector::{ControlSignals, HostProbe, MemoryReading, MetricsCollector, WorkloadGauge},
    config::ExecutorTimings,
    executor::ProviderCall,
    health::{components, HealthRegistry},
    ScalingConfig, ScalingManager, SimulatedCloud,
};
use autoscaler::api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use tower::ServiceExt;

struct StaticHost;

#[async_trait]
impl HostProbe for StaticHost {
    async fn cpu_percent(&self) -> anyhow::Result<f64> {
        Ok(40.0)
    }

    async fn memory(&self) -> anyhow::Result<MemoryReading> {
        Ok(MemoryReading {
            percent: 50.0,
            available_gb: 16.0,
        })
    }

    async fn network_bytes(&self) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn open_connections(&self) -> anyhow::Result<u64> {
        Ok(2)
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>, Arc<SimulatedCloud>) {
    let health_registry = HealthRegistry::with_all_components().await;
    let workload = Arc::new(WorkloadGauge::new());
    let collector = Arc::new(MetricsCollector::new(
        Arc::new(StaticHost),
        None,
        workload.clone(),
        Arc::new(ControlSignals::new()),
    ));
    let cloud = Arc::new(SimulatedCloud::new(Duration::ZERO).with_running(2, "t3.large"));

    let config = ScalingConfig {
        executor: ExecutorTimings {
            poll_interval_ms: 5,
            running_timeout_ms: 500,
            drain_grace_ms: 1,
        },
        ..ScalingConfig::default()
    };
    let manager = assert_ok!(ScalingManager::builder()
        .config(config)
        .collector(collector)
        .provider(cloud.clone())
        .health(health_registry)
        .build());
    let manager = Arc::new(manager);
    assert_ok!(manager.restore().await);

    let state = Arc::new(AppState::new(manager, workload));
    let router = create_router(state.clone());

    (router, state, cloud)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state, _) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::PREDICTOR, "Model untrained")
        .await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    // Degraded still returns 200 (operational)
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "degraded");
    assert!(health["components"]["executor"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::EXECUTOR, "Provider unreachable")
        .await;

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let (app, state, _) = setup_test_app().await;

    let response = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], false);

    state.health_registry.set_ready(true).await;
    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state, _) = setup_test_app().await;

    state.metrics.observe_cycle_latency(0.02);
    state.metrics.set_running_instances(2);

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();
    assert!(metrics_text.contains("autoscaler_cycle_latency_seconds_bucket"));
    assert!(metrics_text.contains("autoscaler_running_instances"));
}

#[tokio::test]
async fn test_status_reports_fleet_and_limits() {
    let (app, _, _) = setup_test_app().await;

    let response = app.oneshot(get("/api/v1/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(response).await;
    assert_eq!(status["running"], false);
    assert_eq!(status["running_instances"], 2);
    assert_eq!(status["cost_limit_per_hour"], 10.0);
    assert_eq!(status["region"], "us-west-2");
}

#[tokio::test]
async fn test_scale_executes_and_is_listed_in_events() {
    let (app, _, cloud) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/scale",
            json!({ "target_instances": 3, "reason": "batch window" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let execution = body_json(response).await;
    assert_eq!(execution["status"], "completed");
    assert_eq!(execution["decision_id"], 0);
    assert_eq!(cloud.running_ids().len(), 3);

    let response = app
        .oneshot(get("/api/v1/events?limit=5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let events = body_json(response).await;
    let events = events.as_array().unwrap();
    assert!(!events.is_empty());
    assert_eq!(events[0]["type"], "manual_scaling");
}

#[tokio::test]
async fn test_scale_above_ceiling_is_unprocessable() {
    let (app, _, cloud) = setup_test_app().await;

    let response = app
        .oneshot(post_json("/api/v1/scale", json!({ "target_instances": 15 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("safety limit"));
    assert!(!cloud
        .calls()
        .iter()
        .any(|call| matches!(call, ProviderCall::Create { .. })));
}

#[tokio::test]
async fn test_config_update_applies_and_rejects() {
    let (app, state, _) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/config",
            json!({ "monitoring_interval_secs": 120, "auto_scaling_enabled": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let config = body_json(response).await;
    assert_eq!(config["monitoring_interval_secs"], 120);
    assert!(!state.manager.config().auto_scaling_enabled);

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/config", json!({ "max_budget": 50 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("max_budget"));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/config",
            json!({ "thresholds": { "scale_up": { "cpu_percent": 99.0 } } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.manager.config().monitoring_interval_secs, 120);

    let response = app.oneshot(get("/api/v1/config")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let config = body_json(response).await;
    assert_eq!(config["auto_scaling_enabled"], false);
    assert_eq!(config["thresholds"]["scale_up"]["cpu_percent"], 75.0);
}

#[tokio::test]
async fn test_workload_and_outcome_feeds_are_accepted() {
    let (app, state, _) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/workload",
            json!({ "queue_depth": 42, "pending_requests": 7, "active_tasks": 3 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(state.workload.get().queue_depth, 42);

    let response = app
        .oneshot(post_json(
            "/api/v1/outcomes",
            json!({ "endpoint": "/render", "latency_ms": 120.0, "success": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let summary = state.manager.collector().outcome_summary();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 0);
}

#[tokio::test]
async fn test_detailed_metrics_include_status() {
    let (app, state, _) = setup_test_app().await;
    // Wednesday 13:00 UTC: no time-of-day pattern applies
    let midday = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
    assert_ok!(state.manager.run_cycle_at(midday).await);

    let response = app.oneshot(get("/api/v1/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let detailed = body_json(response).await;
    assert!(detailed["current"].is_object());
    assert_eq!(detailed["status"]["running_instances"], 2);
    assert_eq!(detailed["recent_decisions"].as_array().unwrap().len(), 1);
}
