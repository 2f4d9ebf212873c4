//! Manager tests
//!
//! Cycles run against mock host probes, an in-process workload gauge and
//! the simulated cloud, with explicit clocks where the schedule matters.

use super::*;
use crate::collector::{HostProbe, MemoryReading, WorkloadGauge, WorkloadReading};
use crate::config::{ConfigUpdate, ExecutorTimings};
use crate::error::ConfigError;
use crate::executor::{ProviderCall, SimulatedCloud};
use crate::health::ComponentStatus;
use crate::models::ScalingReason;
use async_trait::async_trait;
use chrono::TimeZone;
use std::sync::atomic::AtomicU64;

struct LoadedHost {
    cpu_bits: AtomicU64,
    memory_bits: AtomicU64,
}

impl LoadedHost {
    fn new(cpu: f64, memory: f64) -> Self {
        Self {
            cpu_bits: AtomicU64::new(cpu.to_bits()),
            memory_bits: AtomicU64::new(memory.to_bits()),
        }
    }

    fn set_cpu(&self, cpu: f64) {
        self.cpu_bits.store(cpu.to_bits(), Ordering::SeqCst);
    }
}

#[async_trait]
impl HostProbe for LoadedHost {
    async fn cpu_percent(&self) -> anyhow::Result<f64> {
        Ok(f64::from_bits(self.cpu_bits.load(Ordering::SeqCst)))
    }

    async fn memory(&self) -> anyhow::Result<MemoryReading> {
        Ok(MemoryReading {
            percent: f64::from_bits(self.memory_bits.load(Ordering::SeqCst)),
            available_gb: 8.0,
        })
    }

    async fn network_bytes(&self) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn open_connections(&self) -> anyhow::Result<u64> {
        Ok(4)
    }
}

struct Harness {
    manager: Arc<ScalingManager>,
    cloud: Arc<SimulatedCloud>,
    host: Arc<LoadedHost>,
    workload: Arc<WorkloadGauge>,
}

fn fast_config() -> ScalingConfig {
    ScalingConfig {
        executor: ExecutorTimings {
            poll_interval_ms: 5,
            running_timeout_ms: 200,
            drain_grace_ms: 1,
        },
        ..ScalingConfig::default()
    }
}

fn harness(config: ScalingConfig, running: usize, instance_type: &str) -> Harness {
    harness_with_boot(config, running, instance_type, std::time::Duration::ZERO)
}

fn harness_with_boot(
    config: ScalingConfig,
    running: usize,
    instance_type: &str,
    boot_latency: std::time::Duration,
) -> Harness {
    let host = Arc::new(LoadedHost::new(50.0, 50.0));
    let workload = Arc::new(WorkloadGauge::new());
    let collector = Arc::new(MetricsCollector::new(
        host.clone(),
        None,
        workload.clone(),
        Arc::new(crate::collector::ControlSignals::new()),
    ));
    let cloud = Arc::new(SimulatedCloud::new(boot_latency).with_running(running, instance_type));
    let manager = ScalingManager::builder()
        .config(config)
        .collector(collector)
        .provider(cloud.clone())
        .build()
        .unwrap();

    Harness {
        manager: Arc::new(manager),
        cloud,
        host,
        workload,
    }
}

/// Wednesday 13:00 UTC, outside every time-of-day pattern
fn midday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
}

fn kinds(manager: &ScalingManager) -> Vec<EventKind> {
    manager.events(None, 100).into_iter().map(|e| e.kind).collect()
}

#[tokio::test]
async fn test_cycle_scales_up_on_urgent_load() {
    let h = harness(fast_config(), 1, "t3.large");
    h.host.set_cpu(95.0);
    h.workload.set(WorkloadReading {
        queue_depth: 5,
        pending_requests: 0,
        active_tasks: 2,
    });

    let outcome = h.manager.run_cycle_at(midday()).await.unwrap();

    assert_eq!(outcome.decision.action, ScalingAction::UrgentScaleUp);
    assert_eq!(outcome.decision.urgency, 10);
    assert_eq!(outcome.snapshot.running_instances, 1);
    let execution = outcome.execution.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(h.cloud.running_ids().len(), 2);

    let kinds = kinds(&h.manager);
    assert!(kinds.contains(&EventKind::DecisionMade));
    assert!(kinds.contains(&EventKind::ExecutionStarted));
    assert!(kinds.contains(&EventKind::ExecutionCompleted));
    assert_eq!(h.manager.store().len().await, 1);

    let completed = h
        .manager
        .event_log()
        .last_of(EventKind::ExecutionCompleted)
        .unwrap();
    assert_eq!(completed.timestamp, midday());
}

#[tokio::test]
async fn test_disabled_scaling_only_decides() {
    let mut config = fast_config();
    config.auto_scaling_enabled = false;
    let h = harness(config, 1, "t3.large");
    h.host.set_cpu(95.0);

    let outcome = h.manager.run_cycle_at(midday()).await.unwrap();

    assert_eq!(outcome.decision.action, ScalingAction::UrgentScaleUp);
    assert!(outcome.execution.is_none());
    assert_eq!(h.cloud.running_ids().len(), 1);
    assert!(!kinds(&h.manager).contains(&EventKind::ExecutionStarted));
}

#[tokio::test]
async fn test_cost_breach_blocks_scale_up_and_alerts_hourly() {
    let mut config = fast_config();
    config.cost_limit_per_hour = 1.0;
    config.launch.instance_type = "g4dn.2xlarge".to_string();
    let h = harness(config, 1, "g4dn.2xlarge");
    h.host.set_cpu(95.0);
    let start = midday();

    let first = h.manager.run_cycle_at(start).await.unwrap();
    assert_eq!(first.decision.action, ScalingAction::UrgentScaleUp);
    assert!(first.execution.is_none());

    // Past the scale-up cooldown but inside the alert interval
    let second = h
        .manager
        .run_cycle_at(start + Duration::minutes(11))
        .await
        .unwrap();
    assert_eq!(second.decision.action, ScalingAction::UrgentScaleUp);
    assert!(second.execution.is_none());

    h.manager
        .run_cycle_at(start + Duration::minutes(70))
        .await
        .unwrap();

    let alerts = kinds(&h.manager)
        .into_iter()
        .filter(|k| *k == EventKind::CostLimitExceeded)
        .count();
    assert_eq!(alerts, 2);
    assert_eq!(h.cloud.running_ids().len(), 1);
}

#[tokio::test]
async fn test_manual_scale_over_ceiling_rejected_before_cloud_calls() {
    let h = harness(fast_config(), 2, "t3.large");

    let err = h.manager.manual_scale(15, "load test").await.unwrap_err();

    assert!(matches!(err, ScalingError::SafetyLimit(_)));
    assert!(h.cloud.calls().is_empty());
    let event = h
        .manager
        .event_log()
        .last_of(EventKind::ManualScalingFailed)
        .unwrap();
    assert_eq!(event.details["target_instances"], 15);
}

#[tokio::test]
async fn test_manual_scale_executes_and_updates_status() {
    let h = harness(fast_config(), 1, "t3.large");

    let execution = h.manager.manual_scale(3, "expected traffic").await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.created_instances.len(), 2);
    let status = h.manager.get_status();
    assert_eq!(status.running_instances, 3);
    assert!(status.last_scaling_at.is_some());
    assert!((status.current_hourly_cost - 3.0 * 0.0928).abs() < 1e-9);
    assert_eq!(status.recent_events[0].kind, EventKind::ManualScaling);
}

#[tokio::test]
async fn test_manual_override_ignores_cooldown() {
    let h = harness(fast_config(), 1, "t3.large");
    h.host.set_cpu(95.0);
    h.manager.run_cycle().await.unwrap();
    assert!(h
        .manager
        .engine()
        .cooldowns()
        .is_active(crate::models::ActionClass::Up, Utc::now()));

    let execution = h.manager.manual_scale(4, "launch").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(h.cloud.running_ids().len(), 4);
    let stored = h.manager.executor().get(&execution.execution_id).unwrap();
    assert_eq!(stored.decision_id, 0);
}

#[tokio::test]
async fn test_configuration_update_applies_and_rejects() {
    let h = harness(fast_config(), 1, "t3.large");

    let update = ConfigUpdate::from_json(serde_json::json!({
        "monitoring_interval_secs": 120,
        "cost_limit_per_hour": 0.5,
        "thresholds": { "urgent": { "cpu_percent": 97.0 } }
    }))
    .unwrap();
    let applied = h.manager.update_configuration(&update).unwrap();
    assert_eq!(applied.monitoring_interval_secs, 120);
    assert_eq!(applied.cost_limit_per_hour, 1.0);
    assert_eq!(h.manager.engine().config().thresholds.urgent.cpu_percent, 97.0);
    assert_eq!(h.manager.executor().config().cost_limit_per_hour, 1.0);
    assert!(kinds(&h.manager).contains(&EventKind::ConfigurationUpdated));

    // 95% cpu is no longer urgent
    h.host.set_cpu(95.0);
    h.workload.set(WorkloadReading {
        queue_depth: 15,
        pending_requests: 0,
        active_tasks: 4,
    });
    let outcome = h.manager.run_cycle_at(midday()).await.unwrap();
    assert_eq!(outcome.decision.action, ScalingAction::ScaleUp);

    let invalid = ConfigUpdate {
        thresholds: Some(crate::config::ThresholdsUpdate {
            scale_up: crate::config::MetricThresholdsUpdate {
                cpu_percent: Some(99.0),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    let err = h.manager.update_configuration(&invalid).unwrap_err();
    assert!(matches!(
        err,
        ScalingError::Config(ConfigError::InconsistentThresholds { .. })
    ));
    assert_eq!(h.manager.config().thresholds.scale_up.cpu_percent, 75.0);

    let unknown = ConfigUpdate::from_json(serde_json::json!({ "max_budget": 3 })).unwrap_err();
    assert_eq!(unknown, ConfigError::UnknownOption("max_budget".to_string()));
}

#[tokio::test]
async fn test_detailed_metrics_report_history() {
    let h = harness(fast_config(), 2, "t3.large");
    h.manager.run_cycle_at(midday()).await.unwrap();

    let detailed = h.manager.get_detailed_metrics().await;
    assert!(detailed.current.is_some());
    assert!(detailed.forecast.is_none());
    assert_eq!(detailed.recent_decisions.len(), 1);
    assert_eq!(detailed.cost.running_instances, 2);
    assert!(detailed.last_training.is_none());
    assert!(!detailed.status.running);
    assert!(matches!(
        detailed.model_health,
        Some(HealthReport::InsufficientData { .. })
    ));
}

#[tokio::test]
async fn test_cycle_trains_and_records_forecast() {
    let mut config = fast_config();
    config.predictor.n_trees = 8;
    config.predictor.max_depth = 4;
    config.predictor.horizon = 3;
    config.predictor.min_training_samples = 30;
    let h = harness(config, 1, "t3.large");
    let now = midday();

    for i in 0..60i64 {
        let mut snapshot = MetricSnapshot::empty(now - Duration::minutes(5 * (60 - i)));
        snapshot.queue_depth = (5 + (i % 7)) as u64;
        snapshot.cpu_percent = 45.0 + (i % 5) as f64;
        snapshot.memory_percent = 50.0;
        h.manager.store().append(snapshot).await.unwrap();
    }

    let outcome = h.manager.run_cycle_at(now).await.unwrap();

    assert!(outcome.trained);
    assert!(outcome.forecast.is_some());
    assert!(h.manager.predictor().is_trained());
    assert_eq!(h.manager.tracker().pending_count(), 1);
    assert!(kinds(&h.manager).contains(&EventKind::ModelTrained));
    assert!(h.manager.collector().signals().predicted_load().is_some());

    // Not retrained inside the training interval
    let again = h
        .manager
        .run_cycle_at(now + Duration::minutes(5))
        .await
        .unwrap();
    assert!(!again.trained);
}

#[tokio::test]
async fn test_predicted_increase_is_a_scale_up_reason() {
    let h = harness(fast_config(), 3, "t3.large");
    h.workload.set(WorkloadReading {
        queue_depth: 8,
        pending_requests: 0,
        active_tasks: 3,
    });
    let snapshot = h.manager.collector().collect_at(midday()).await;
    let prediction = PredictionInput {
        predicted_load: 16.0,
        confidence: 0.9,
        model: "random_forest".to_string(),
    };

    let decision = h
        .manager
        .engine()
        .decide_at(&snapshot, Some(&prediction), 3, midday());
    assert_eq!(decision.action, ScalingAction::ScaleUp);
    assert!(decision.reasons.contains(&ScalingReason::PredictedLoadIncrease));
}

#[tokio::test]
async fn test_start_and_stop_loop() {
    let h = harness(fast_config(), 1, "t3.large");

    h.manager.start().await.unwrap();
    assert!(h.manager.is_running());
    assert!(matches!(
        h.manager.start().await,
        Err(ScalingError::AlreadyRunning)
    ));

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    h.manager.stop().await.unwrap();

    assert!(!h.manager.is_running());
    assert!(h
        .manager
        .event_log()
        .last_of(EventKind::DecisionMade)
        .is_some());
    assert!(matches!(h.manager.stop().await, Err(ScalingError::NotRunning)));
}

/// Executor timings with a boot slow enough to observe a cycle in flight
fn slow_boot_config() -> ScalingConfig {
    ScalingConfig {
        executor: ExecutorTimings {
            poll_interval_ms: 5,
            running_timeout_ms: 5_000,
            drain_grace_ms: 1,
        },
        ..ScalingConfig::default()
    }
}

#[tokio::test]
async fn test_manual_scale_waits_for_in_flight_cycle() {
    let h = harness_with_boot(
        slow_boot_config(),
        1,
        "t3.large",
        std::time::Duration::from_millis(150),
    );
    h.host.set_cpu(95.0);

    let manager = Arc::clone(&h.manager);
    let cycle = tokio::spawn(async move { manager.run_cycle_at(midday()).await });
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    let manual = h.manager.manual_scale(4, "batch window").await.unwrap();
    let outcome = cycle.await.unwrap().unwrap();

    assert_eq!(outcome.decision.action, ScalingAction::UrgentScaleUp);
    assert_eq!(outcome.execution.unwrap().status, ExecutionStatus::Completed);
    assert_eq!(manual.status, ExecutionStatus::Completed);
    assert_eq!(h.cloud.running_ids().len(), 4);

    // The cycle registers its instance before the manual request creates any
    let calls = h.cloud.calls();
    let first_register = calls
        .iter()
        .position(|c| matches!(c, ProviderCall::Register(_)))
        .unwrap();
    let creates: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, ProviderCall::Create { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(creates.len(), 3);
    assert!(creates[0] < first_register);
    assert!(creates[1..].iter().all(|&i| i > first_register));
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_cycle() {
    let h = harness_with_boot(
        slow_boot_config(),
        1,
        "t3.large",
        std::time::Duration::from_millis(150),
    );
    h.host.set_cpu(95.0);

    h.manager.start().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    h.manager.stop().await.unwrap();

    assert!(h
        .manager
        .event_log()
        .last_of(EventKind::ExecutionCompleted)
        .is_some());
    assert_eq!(h.cloud.running_ids().len(), 2);
}

#[tokio::test]
async fn test_rejected_saved_model_degrades_predictor() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("demand_model.json"), br#"{"format_version":2}"#).unwrap();
    std::fs::write(dir.path().join("demand_model.json.sha256"), "0000").unwrap();

    let health = HealthRegistry::with_all_components().await;
    let collector = Arc::new(MetricsCollector::new(
        Arc::new(LoadedHost::new(50.0, 50.0)),
        None,
        Arc::new(WorkloadGauge::new()),
        Arc::new(crate::collector::ControlSignals::new()),
    ));
    let manager = ScalingManager::builder()
        .config(fast_config())
        .collector(collector)
        .provider(Arc::new(SimulatedCloud::new(std::time::Duration::ZERO).with_running(1, "t3.large")))
        .health(health.clone())
        .model_dir(dir.path())
        .build()
        .unwrap();

    assert!(!manager.predictor().is_trained());
    manager.restore().await.unwrap();

    let report = health.health().await;
    let predictor = &report.components[components::PREDICTOR];
    assert_eq!(predictor.status, ComponentStatus::Degraded);
    assert!(predictor
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("checksum"));
}

#[tokio::test]
async fn test_missing_saved_model_keeps_predictor_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let health = HealthRegistry::with_all_components().await;
    let collector = Arc::new(MetricsCollector::new(
        Arc::new(LoadedHost::new(50.0, 50.0)),
        None,
        Arc::new(WorkloadGauge::new()),
        Arc::new(crate::collector::ControlSignals::new()),
    ));
    let manager = ScalingManager::builder()
        .config(fast_config())
        .collector(collector)
        .provider(Arc::new(SimulatedCloud::new(std::time::Duration::ZERO).with_running(1, "t3.large")))
        .health(health.clone())
        .model_dir(dir.path())
        .build()
        .unwrap();

    manager.restore().await.unwrap();
    let report = health.health().await;
    assert_eq!(
        report.components[components::PREDICTOR].status,
        ComponentStatus::Healthy
    );
}
