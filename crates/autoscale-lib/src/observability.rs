//! Observability infrastructure for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (cycle/collection/training latency, instances, cost, decisions)
//! - Structured JSON logging of scaling events with tracing

use crate::models::{ScalingDecision, ScalingExecution};
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, GaugeVec, Histogram, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for loop latencies (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    cycle_latency_seconds: Histogram,
    collection_latency_seconds: Histogram,
    training_latency_seconds: Histogram,
    running_instances: IntGauge,
    hourly_cost_usd: Gauge,
    queue_depth: IntGauge,
    model_accuracy: GaugeVec,
    decisions_total: IntCounterVec,
    executions_total: IntCounterVec,
    rollbacks_total: IntCounter,
    cycle_errors_total: IntCounter,
    collection_errors_total: IntCounterVec,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "autoscaler_cycle_latency_seconds",
                "Duration of one monitoring cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            collection_latency_seconds: register_histogram!(
                "autoscaler_collection_latency_seconds",
                "Time spent sampling metric sources",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            training_latency_seconds: register_histogram!(
                "autoscaler_training_latency_seconds",
                "Time spent training the demand predictor",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register training_latency_seconds"),

            running_instances: register_int_gauge!(
                "autoscaler_running_instances",
                "Managed instances currently running"
            )
            .expect("Failed to register running_instances"),

            hourly_cost_usd: register_gauge!(
                "autoscaler_hourly_cost_usd",
                "Estimated hourly cost of managed instances"
            )
            .expect("Failed to register hourly_cost_usd"),

            queue_depth: register_int_gauge!(
                "autoscaler_queue_depth",
                "Queue depth at the last collection"
            )
            .expect("Failed to register queue_depth"),

            model_accuracy: register_gauge_vec!(
                "autoscaler_model_accuracy_percent",
                "Validated accuracy of each prediction model",
                &["model"]
            )
            .expect("Failed to register model_accuracy"),

            decisions_total: register_int_counter_vec!(
                "autoscaler_decisions_total",
                "Scaling decisions by action",
                &["action"]
            )
            .expect("Failed to register decisions_total"),

            executions_total: register_int_counter_vec!(
                "autoscaler_executions_total",
                "Scaling executions by terminal status",
                &["status"]
            )
            .expect("Failed to register executions_total"),

            rollbacks_total: register_int_counter!(
                "autoscaler_rollbacks_total",
                "Scale-up executions rolled back"
            )
            .expect("Failed to register rollbacks_total"),

            cycle_errors_total: register_int_counter!(
                "autoscaler_cycle_errors_total",
                "Monitoring cycles that ended in an error"
            )
            .expect("Failed to register cycle_errors_total"),

            collection_errors_total: register_int_counter_vec!(
                "autoscaler_collection_errors_total",
                "Failed metric source reads by source",
                &["source"]
            )
            .expect("Failed to register collection_errors_total"),
        }
    }
}

/// Handle to the process-wide Prometheus metrics
///
/// Clones share the same underlying metrics.
#[derive(Debug, Clone, Copy)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    /// Create a handle (registers the metrics on first call)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, secs: f64) {
        self.inner().cycle_latency_seconds.observe(secs);
    }

    pub fn observe_collection_latency(&self, secs: f64) {
        self.inner().collection_latency_seconds.observe(secs);
    }

    pub fn observe_training_latency(&self, secs: f64) {
        self.inner().training_latency_seconds.observe(secs);
    }

    pub fn set_running_instances(&self, count: i64) {
        self.inner().running_instances.set(count);
    }

    pub fn set_hourly_cost(&self, usd: f64) {
        self.inner().hourly_cost_usd.set(usd);
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.inner().queue_depth.set(depth);
    }

    pub fn set_model_accuracy(&self, model: &str, accuracy: f64) {
        self.inner()
            .model_accuracy
            .with_label_values(&[model])
            .set(accuracy);
    }

    pub fn inc_decisions(&self, action: &str) {
        self.inner().decisions_total.with_label_values(&[action]).inc();
    }

    pub fn inc_executions(&self, status: &str) {
        self.inner().executions_total.with_label_values(&[status]).inc();
    }

    pub fn inc_rollbacks(&self) {
        self.inner().rollbacks_total.inc();
    }

    pub fn inc_cycle_errors(&self) {
        self.inner().cycle_errors_total.inc();
    }

    pub fn inc_collection_errors(&self, source: &str) {
        self.inner()
            .collection_errors_total
            .with_label_values(&[source])
            .inc();
    }
}

/// Structured logger for scaling events
///
/// One log line per domain event, each tagged with `event` and the region.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    region: String,
}

impl StructuredLogger {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    pub fn log_startup(&self, version: &str, interval_secs: u64, auto_scaling_enabled: bool) {
        info!(
            event = "autoscaler_started",
            region = %self.region,
            version = %version,
            interval_secs,
            auto_scaling_enabled,
            "Autoscaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "autoscaler_shutdown",
            region = %self.region,
            reason = %reason,
            "Autoscaler shutting down"
        );
    }

    pub fn log_decision(&self, decision: &ScalingDecision) {
        info!(
            event = "decision_made",
            region = %self.region,
            decision_id = decision.id,
            action = %decision.action,
            reasons = ?decision.reasons,
            confidence = decision.confidence,
            urgency = decision.urgency,
            current_instances = decision.current_instances,
            recommended_instances = decision.recommended_instances,
            cost_impact = decision.cost_impact,
            "Scaling decision made"
        );
    }

    pub fn log_execution_started(&self, execution: &ScalingExecution) {
        info!(
            event = "execution_started",
            region = %self.region,
            execution_id = %execution.execution_id,
            decision_id = execution.decision_id,
            action = %execution.action,
            target_instances = execution.target_instances,
            "Scaling execution started"
        );
    }

    pub fn log_execution_finished(&self, execution: &ScalingExecution) {
        match &execution.error_message {
            None => info!(
                event = "execution_completed",
                region = %self.region,
                execution_id = %execution.execution_id,
                status = %execution.status,
                created = execution.created_instances.len(),
                terminated = execution.terminated_instances.len(),
                load_balancer_updated = execution.load_balancer_updated,
                "Scaling execution completed"
            ),
            Some(message) => error!(
                event = "execution_failed",
                region = %self.region,
                execution_id = %execution.execution_id,
                status = %execution.status,
                created = ?execution.created_instances,
                rollback_performed = execution.rollback_performed,
                error = %message,
                "Scaling execution failed"
            ),
        }
    }

    pub fn log_rollback(&self, execution_id: &str, terminated: &[String], failures: usize) {
        if failures == 0 {
            warn!(
                event = "rollback_completed",
                region = %self.region,
                execution_id = %execution_id,
                terminated = ?terminated,
                "Rolled back partially provisioned instances"
            );
        } else {
            error!(
                event = "rollback_incomplete",
                region = %self.region,
                execution_id = %execution_id,
                terminated = ?terminated,
                failures,
                "Rollback left instances behind"
            );
        }
    }

    pub fn log_cost_limit(&self, current_hourly: f64, limit: f64) {
        warn!(
            event = "cost_limit_exceeded",
            region = %self.region,
            current_hourly,
            limit,
            "Hourly cost above cap, skipping execution"
        );
    }

    pub fn log_manual_scaling(&self, target: u32, reason: &str, outcome: Result<&str, &str>) {
        match outcome {
            Ok(execution_id) => info!(
                event = "manual_scaling",
                region = %self.region,
                target_instances = target,
                reason = %reason,
                execution_id = %execution_id,
                "Manual scaling executed"
            ),
            Err(message) => warn!(
                event = "manual_scaling_failed",
                region = %self.region,
                target_instances = target,
                reason = %reason,
                error = %message,
                "Manual scaling rejected"
            ),
        }
    }

    pub fn log_config_update(&self, changed: &[&str]) {
        info!(
            event = "configuration_updated",
            region = %self.region,
            changed = ?changed,
            "Configuration updated"
        );
    }

    pub fn log_model_trained(&self, best_model: &str, samples: usize, accuracy: f64) {
        info!(
            event = "model_trained",
            region = %self.region,
            best_model = %best_model,
            samples,
            accuracy,
            "Demand predictor retrained"
        );
    }

    pub fn log_prediction_validated(&self, prediction_id: u64, actual: f64, absolute_error: f64) {
        info!(
            event = "prediction_validated",
            region = %self.region,
            prediction_id,
            actual,
            absolute_error,
            "Prediction validated against observed load"
        );
    }
}
