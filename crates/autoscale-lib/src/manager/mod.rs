//! Scaling manager
//!
//! Owns the monitoring loop and is the single entry point for callers:
//! - one cycle collects, validates due predictions, retrains when due,
//!   forecasts, decides and executes
//! - cycles never overlap; a late tick is skipped
//! - manual scaling and the cycle share one lock, so the cost check and
//!   the inventory change happen under mutual exclusion
//! - every decision, execution, cost breach and configuration change is
//!   kept in a time-windowed [`EventLog`]

mod events;

#[cfg(test)]
mod tests;

pub use events::{EventKind, EventLog, ScalingEvent};

use crate::accuracy::{AccuracyTracker, HealthReport};
use crate::collector::MetricsCollector;
use crate::config::{ConfigUpdate, ScalingConfig};
use crate::decision::DecisionEngine;
use crate::error::{Result, ScalingError};
use crate::executor::{CloudExecutor, CloudProvider, CostEstimate};
use crate::health::{components, HealthRegistry};
use crate::journal::Journal;
use crate::models::{
    ExecutionStatus, MetricSnapshot, PredictionInput, ScalingAction, ScalingDecision,
    ScalingExecution,
};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::predictor::{DemandPredictor, Forecast, ModelKind, Training, TrainingReport};
use crate::timeseries::TimeSeriesStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Events returned in [`ManagerStatus::recent_events`]
const STATUS_EVENTS: usize = 10;

/// Executions and decisions returned in [`DetailedMetrics`]
const DETAIL_HISTORY: usize = 5;

/// Minimum spacing of cost-limit events
const COST_ALERT_INTERVAL_HOURS: i64 = 1;

/// Point-in-time view of the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub running: bool,
    pub region: String,
    pub monitoring_interval_secs: u64,
    pub auto_scaling_enabled: bool,
    pub cost_limit_per_hour: f64,
    pub current_hourly_cost: f64,
    pub running_instances: usize,
    pub last_scaling_at: Option<DateTime<Utc>>,
    pub total_events: usize,
    pub recent_events: Vec<ScalingEvent>,
}

/// Status plus current metrics, forecast and recent history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedMetrics {
    pub current: Option<MetricSnapshot>,
    pub forecast: Option<Forecast>,
    pub cost: CostEstimate,
    pub recent_executions: Vec<ScalingExecution>,
    pub recent_decisions: Vec<ScalingDecision>,
    pub model_health: Option<HealthReport>,
    pub last_training: Option<TrainingReport>,
    pub pending_predictions: usize,
    pub status: ManagerStatus,
}

/// What one monitoring cycle did
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub snapshot: MetricSnapshot,
    pub forecast: Option<Forecast>,
    pub decision: ScalingDecision,
    pub execution: Option<ScalingExecution>,
    pub trained: bool,
}

/// Schedule bookkeeping, guarded by the scaling lock
#[derive(Debug, Default)]
struct CycleState {
    last_training: Option<DateTime<Utc>>,
    last_prediction_record: Option<DateTime<Utc>>,
    last_accuracy_check: Option<DateTime<Utc>>,
    last_cost_alert: Option<DateTime<Utc>>,
    retrain_requested: bool,
}

fn due(last: Option<DateTime<Utc>>, every: Duration, now: DateTime<Utc>) -> bool {
    last.map_or(true, |t| now - t >= every)
}

pub struct ScalingManager {
    config: RwLock<Arc<ScalingConfig>>,
    collector: Arc<MetricsCollector>,
    store: Arc<TimeSeriesStore>,
    predictor: Arc<DemandPredictor>,
    tracker: Arc<AccuracyTracker>,
    engine: DecisionEngine,
    executor: CloudExecutor,
    events: EventLog,
    scaling_lock: tokio::sync::Mutex<CycleState>,
    latest_forecast: RwLock<Option<Forecast>>,
    model_health: RwLock<Option<HealthReport>>,
    model_dir: Option<PathBuf>,
    /// Why the saved model was rejected at build time
    model_load_error: Option<String>,
    running: AtomicBool,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    health: HealthRegistry,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

impl ScalingManager {
    pub fn builder() -> ScalingManagerBuilder {
        ScalingManagerBuilder::new()
    }

    pub fn config(&self) -> Arc<ScalingConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    pub fn predictor(&self) -> &Arc<DemandPredictor> {
        &self.predictor
    }

    pub fn tracker(&self) -> &Arc<AccuracyTracker> {
        &self.tracker
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn executor(&self) -> &CloudExecutor {
        &self.executor
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reload journaled history and reconcile the instance inventory
    pub async fn restore(&self) -> Result<()> {
        let snapshots = self.store.restore(Utc::now()).await?;
        let predictions = self.tracker.restore()?;
        let running = self.executor.sync_inventory().await?;
        if let Some(reason) = &self.model_load_error {
            self.health
                .set_degraded(
                    components::PREDICTOR,
                    format!("saved model rejected: {}", reason),
                )
                .await;
        }
        info!(snapshots, predictions, running, "Manager state restored");
        Ok(())
    }

    /// Spawn the monitoring loop
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ScalingError::AlreadyRunning);
        }
        let config = self.config();
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(Arc::clone(self).run(shutdown));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        self.health.set_healthy(components::MANAGER).await;
        self.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            config.monitoring_interval_secs,
            config.auto_scaling_enabled,
        );
        Ok(())
    }

    /// Stop the monitoring loop after the in-flight cycle finishes
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(ScalingError::NotRunning);
        }
        // No receiver just means the loop already exited
        let _ = self.shutdown.send(());

        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Monitoring loop panicked");
            }
        }
        self.logger.log_shutdown("stop requested");
        Ok(())
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut period = self.config().monitoring_interval();
        info!(interval_secs = period.as_secs(), "Starting monitoring loop");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutting down monitoring loop");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "Monitoring cycle failed");
                    }

                    let next = self.config().monitoring_interval();
                    if next != period {
                        period = next;
                        ticker = interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        info!(interval_secs = period.as_secs(), "Monitoring interval changed");
                    }
                }
            }
        }
    }

    /// Run one monitoring cycle now
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one monitoring cycle as of `now`
    ///
    /// Errors are recorded as `cycle_error` events before being returned.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let start = Instant::now();
        let mut state = self.scaling_lock.lock().await;

        let result = self.cycle(&mut state, now).await;
        self.metrics
            .observe_cycle_latency(start.elapsed().as_secs_f64());
        self.events.prune(now);

        match &result {
            Ok(outcome) => {
                debug!(
                    action = %outcome.decision.action,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Monitoring cycle complete"
                );
                self.health.set_healthy(components::MANAGER).await;
            }
            Err(e) => {
                self.metrics.inc_cycle_errors();
                self.events.record_at(
                    EventKind::CycleError,
                    "Monitoring cycle failed",
                    json!({ "error": e.to_string() }),
                    now,
                );
                self.health
                    .set_degraded(components::MANAGER, e.to_string())
                    .await;
            }
        }
        result
    }

    async fn cycle(&self, state: &mut CycleState, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let config = self.config();

        let running = self.executor.sync_inventory().await?;
        self.health.set_healthy(components::EXECUTOR).await;

        let snapshot = self.current_snapshot(&config, now).await?;
        self.metrics.set_queue_depth(snapshot.queue_depth as i64);

        for record in self.tracker.validate_due(snapshot.queue_depth as f64, now) {
            if let (Some(actual), Some(error)) = (record.actual_value, record.absolute_error) {
                self.logger
                    .log_prediction_validated(record.id, actual, error);
            }
        }

        let accuracy_every = Duration::hours(config.schedule.accuracy_check_interval_hours as i64);
        if due(state.last_accuracy_check, accuracy_every, now) {
            self.check_accuracy(state, now).await;
            state.last_accuracy_check = Some(now);
        }

        let training_every = Duration::hours(config.schedule.training_interval_hours as i64);
        let trained = if !self.predictor.is_trained()
            || state.retrain_requested
            || due(state.last_training, training_every, now)
        {
            self.train(&config, state, now).await
        } else {
            false
        };

        let forecast = self.forecast(&config, state, now).await;
        let prediction = forecast.as_ref().map(|f| PredictionInput {
            predicted_load: f.value,
            confidence: f.confidence,
            model: f.model.to_string(),
        });

        let decision = self
            .engine
            .decide_at(&snapshot, prediction.as_ref(), running, now);
        self.logger.log_decision(&decision);
        self.events.record_at(
            EventKind::DecisionMade,
            format!("Decision {}: {}", decision.id, decision.action),
            json!({
                "decision_id": decision.id,
                "action": decision.action,
                "reasons": decision.reasons,
                "confidence": decision.confidence,
                "urgency": decision.urgency,
                "current_instances": decision.current_instances,
                "recommended_instances": decision.recommended_instances,
            }),
            now,
        );

        let execution = if self.should_execute(&config, state, &decision, now) {
            Some(self.execute(&decision, now).await)
        } else {
            None
        };

        Ok(CycleOutcome {
            snapshot,
            forecast,
            decision,
            execution,
            trained,
        })
    }

    /// Latest stored snapshot, or a fresh collection when it is stale
    async fn current_snapshot(
        &self,
        config: &ScalingConfig,
        now: DateTime<Utc>,
    ) -> Result<MetricSnapshot> {
        let max_age = Duration::seconds(config.monitoring_interval_secs as i64);
        if let Some(latest) = self.store.latest_snapshot().await {
            if latest.timestamp <= now && now - latest.timestamp < max_age {
                return Ok(latest);
            }
        }

        let snapshot = self.collector.collect_at(now).await;
        self.store.append(snapshot.clone()).await?;
        Ok(snapshot)
    }

    async fn check_accuracy(&self, state: &mut CycleState, now: DateTime<Utc>) {
        let model = self
            .predictor
            .best_model()
            .unwrap_or(ModelKind::RandomForest);
        let report = self.tracker.check_health_at(model.as_str(), now);

        match &report {
            HealthReport::Assessed(health) => {
                self.metrics
                    .set_model_accuracy(model.as_str(), health.accuracy_pct);
                if health.requires_retraining {
                    state.retrain_requested = true;
                    self.health
                        .set_degraded(
                            components::PREDICTOR,
                            format!("model health {:.0}, retraining", health.score),
                        )
                        .await;
                }
                info!(
                    model = %model,
                    score = health.score,
                    accuracy = health.accuracy_pct,
                    requires_retraining = health.requires_retraining,
                    "Model health checked"
                );
            }
            HealthReport::InsufficientData { samples, required } => {
                debug!(samples, required, "Not enough validated predictions for a health check");
            }
        }

        let removed = self.tracker.cleanup_at(now);
        if removed > 0 {
            debug!(removed, "Removed expired predictions");
        }
        *self.model_health.write().unwrap_or_else(|e| e.into_inner()) = Some(report);
    }

    /// Retrain on the stored history; returns whether a model was produced
    async fn train(&self, config: &ScalingConfig, state: &mut CycleState, now: DateTime<Utc>) -> bool {
        let horizon = self.predictor.config().horizon;
        let window = Duration::days(config.timeseries.retention_days);
        let set = self.store.training_set(window, horizon, now).await;
        let required = self.predictor.config().min_training_samples;
        if set.len() < required {
            debug!(samples = set.len(), required, "Not enough history to train");
            return false;
        }

        let start = Instant::now();
        let predictor = Arc::clone(&self.predictor);
        let result =
            tokio::task::spawn_blocking(move || predictor.train(&set.features, &set.targets)).await;
        self.metrics
            .observe_training_latency(start.elapsed().as_secs_f64());

        let report = match result {
            Ok(Ok(Training::Trained(report))) => report,
            Ok(Ok(Training::InsufficientData { samples, required })) => {
                debug!(samples, required, "Predictor reported insufficient data");
                return false;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Training failed");
                self.health
                    .set_degraded(components::PREDICTOR, e.to_string())
                    .await;
                return false;
            }
            Err(e) => {
                error!(error = %e, "Training task panicked");
                return false;
            }
        };

        state.last_training = Some(now);
        state.retrain_requested = false;
        self.health.set_healthy(components::PREDICTOR).await;
        self.logger
            .log_model_trained(report.best_model.as_str(), report.samples, report.best_accuracy);
        self.events.record_at(
            EventKind::ModelTrained,
            format!(
                "Trained on {} samples, serving {}",
                report.samples, report.best_model
            ),
            json!({
                "samples": report.samples,
                "best_model": report.best_model,
                "best_accuracy": report.best_accuracy,
                "scores": report.scores,
                "arima_enabled": report.arima_enabled,
            }),
            now,
        );

        if let Some(dir) = &self.model_dir {
            if let Err(e) = self.predictor.save(dir) {
                warn!(error = %e, "Failed to persist trained model");
            }
        }
        true
    }

    /// Forecast from recent history and record it when the prediction
    /// interval has elapsed
    async fn forecast(
        &self,
        config: &ScalingConfig,
        state: &mut CycleState,
        now: DateTime<Utc>,
    ) -> Option<Forecast> {
        if !self.predictor.is_trained() {
            return None;
        }
        let horizon = self.predictor.config().horizon;
        let lookback = Duration::hours(config.timeseries.feature_lookback_hours);
        let features = self.store.query(lookback, now).await.to_vec();

        let forecast = match self.predictor.predict(&features, horizon) {
            Ok(Some(forecast)) => forecast,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Prediction failed");
                self.collector.signals().set_predicted_load(None);
                return None;
            }
        };

        self.collector
            .signals()
            .set_predicted_load(Some(forecast.value));
        *self.latest_forecast.write().unwrap_or_else(|e| e.into_inner()) = Some(forecast.clone());

        let every = Duration::minutes(config.schedule.prediction_interval_minutes as i64);
        if due(state.last_prediction_record, every, now) {
            let ahead = config.timeseries.resample_interval_secs as i64 * horizon as i64;
            let id = self.tracker.record_prediction_at(
                forecast.value,
                now + Duration::seconds(ahead),
                forecast.model.as_str(),
                forecast.confidence,
                now,
            );
            state.last_prediction_record = Some(now);
            debug!(prediction_id = id, value = forecast.value, "Recorded forecast");
        }
        Some(forecast)
    }

    /// Execution gate: enabled, not maintain, and within the cost cap
    ///
    /// Scale-ups are blocked when the projected hourly cost exceeds the cap.
    /// A breach is reported at most once per hour.
    fn should_execute(
        &self,
        config: &ScalingConfig,
        state: &mut CycleState,
        decision: &ScalingDecision,
        now: DateTime<Utc>,
    ) -> bool {
        if !config.auto_scaling_enabled || decision.action == ScalingAction::Maintain {
            return false;
        }
        if !decision.action.is_scale_up() {
            return true;
        }

        let current = self.executor.current_cost_estimate().cost_per_hour;
        let projected = current + decision.cost_impact.max(0.0);
        if projected <= config.cost_limit_per_hour {
            return true;
        }

        if due(
            state.last_cost_alert,
            Duration::hours(COST_ALERT_INTERVAL_HOURS),
            now,
        ) {
            state.last_cost_alert = Some(now);
            self.logger
                .log_cost_limit(projected, config.cost_limit_per_hour);
            self.events.record_at(
                EventKind::CostLimitExceeded,
                format!(
                    "Projected cost ${:.2}/hour exceeds limit ${:.2}/hour",
                    projected, config.cost_limit_per_hour
                ),
                json!({
                    "current_hourly_cost": current,
                    "projected_hourly_cost": projected,
                    "limit": config.cost_limit_per_hour,
                    "decision_id": decision.id,
                    "action": decision.action,
                }),
                now,
            );
        }
        false
    }

    async fn execute(&self, decision: &ScalingDecision, now: DateTime<Utc>) -> ScalingExecution {
        self.events.record_at(
            EventKind::ExecutionStarted,
            format!(
                "Executing {} to {} instances",
                decision.action, decision.recommended_instances
            ),
            json!({
                "decision_id": decision.id,
                "action": decision.action,
                "target_instances": decision.recommended_instances,
            }),
            now,
        );

        let execution = self.executor.execute(decision).await;
        self.record_execution(&execution, now);
        execution
    }

    fn record_execution(&self, execution: &ScalingExecution, now: DateTime<Utc>) {
        let kind = match execution.status {
            ExecutionStatus::Completed => EventKind::ExecutionCompleted,
            _ => EventKind::ExecutionFailed,
        };
        let message = match &execution.error_message {
            Some(error) => format!("Execution {} failed: {}", execution.execution_id, error),
            None => format!(
                "Execution {} {}",
                execution.execution_id, execution.status
            ),
        };
        self.events.record_at(
            kind,
            message,
            serde_json::to_value(execution).unwrap_or_else(|_| json!({})),
            now,
        );
    }

    /// Scale to `target` instances on operator request
    ///
    /// Bypasses cooldowns; serialised against the monitoring cycle.
    pub async fn manual_scale(&self, target: u32, reason: &str) -> Result<ScalingExecution> {
        let _guard = self.scaling_lock.lock().await;

        match self.executor.manual_override(target, reason).await {
            Ok(execution) => {
                self.logger.log_manual_scaling(
                    target,
                    reason,
                    Ok(execution.execution_id.as_str()),
                );
                let kind = if execution.status == ExecutionStatus::Completed {
                    EventKind::ManualScaling
                } else {
                    EventKind::ManualScalingFailed
                };
                self.events.record(
                    kind,
                    format!("Manual scaling to {} instances: {}", target, reason),
                    json!({
                        "target_instances": target,
                        "reason": reason,
                        "execution": execution,
                    }),
                );
                Ok(execution)
            }
            Err(e) => {
                let message = e.to_string();
                self.logger
                    .log_manual_scaling(target, reason, Err(message.as_str()));
                self.events.record(
                    EventKind::ManualScalingFailed,
                    format!("Manual scaling to {} rejected: {}", target, message),
                    json!({
                        "target_instances": target,
                        "reason": reason,
                        "error": message,
                    }),
                );
                Err(e)
            }
        }
    }

    /// Apply a partial configuration change
    ///
    /// The update is validated against a copy; on failure the running
    /// configuration is untouched.
    pub fn update_configuration(&self, update: &ConfigUpdate) -> Result<Arc<ScalingConfig>> {
        let (next, changed) = self.config().apply(update)?;
        let next = Arc::new(next);

        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&next);
        self.engine.set_config(Arc::clone(&next));
        self.executor.set_config(Arc::clone(&next));

        self.logger.log_config_update(&changed);
        self.events.record(
            EventKind::ConfigurationUpdated,
            format!("Configuration updated: {}", changed.join(", ")),
            json!({
                "changed": changed,
                "update": update,
            }),
        );
        Ok(next)
    }

    pub fn get_status(&self) -> ManagerStatus {
        let config = self.config();
        let cost = self.executor.current_cost_estimate();
        let last_scaling_at = self
            .executor
            .history(Duration::hours(24))
            .into_iter()
            .rev()
            .find(|e| e.action != ScalingAction::Maintain)
            .map(|e| e.completed_at.unwrap_or(e.started_at));

        ManagerStatus {
            running: self.is_running(),
            region: config.region.clone(),
            monitoring_interval_secs: config.monitoring_interval_secs,
            auto_scaling_enabled: config.auto_scaling_enabled,
            cost_limit_per_hour: config.cost_limit_per_hour,
            current_hourly_cost: cost.cost_per_hour,
            running_instances: cost.running_instances,
            last_scaling_at,
            total_events: self.events.len(),
            recent_events: self.events.recent(STATUS_EVENTS),
        }
    }

    pub async fn get_detailed_metrics(&self) -> DetailedMetrics {
        DetailedMetrics {
            current: self.store.latest_snapshot().await,
            forecast: self
                .latest_forecast
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            cost: self.executor.current_cost_estimate(),
            recent_executions: self.executor.recent(DETAIL_HISTORY),
            recent_decisions: self.engine.recent(DETAIL_HISTORY),
            model_health: self
                .model_health
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            last_training: self.predictor.last_report(),
            pending_predictions: self.tracker.pending_count(),
            status: self.get_status(),
        }
    }

    /// Events at or after `since`, newest first
    pub fn events(&self, since: Option<DateTime<Utc>>, limit: usize) -> Vec<ScalingEvent> {
        self.events.since(since, limit)
    }
}

/// Builder for [`ScalingManager`]
pub struct ScalingManagerBuilder {
    config: ScalingConfig,
    collector: Option<Arc<MetricsCollector>>,
    provider: Option<Arc<dyn CloudProvider>>,
    journal: Arc<Journal>,
    health: Option<HealthRegistry>,
    model_dir: Option<PathBuf>,
}

impl ScalingManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: ScalingConfig::default(),
            collector: None,
            provider: None,
            journal: Arc::new(Journal::disabled()),
            health: None,
            model_dir: None,
        }
    }

    pub fn config(mut self, config: ScalingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Persist trained models here and load one at startup if present
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> anyhow::Result<ScalingManager> {
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("Collector is required"))?;
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("Cloud provider is required"))?;
        self.config.validate()?;

        let config = Arc::new(self.config);
        let mut model_load_error = None;
        let predictor = match &self.model_dir {
            Some(dir) if DemandPredictor::has_saved_model(dir) => {
                match DemandPredictor::load(config.predictor.clone(), dir) {
                    Ok(predictor) => predictor,
                    Err(e) => {
                        warn!(
                            error = %e,
                            model_dir = %dir.display(),
                            "Saved model rejected, starting untrained"
                        );
                        model_load_error = Some(e.to_string());
                        DemandPredictor::new(config.predictor.clone())
                    }
                }
            }
            Some(dir) => {
                debug!(model_dir = %dir.display(), "No saved model, starting untrained");
                DemandPredictor::new(config.predictor.clone())
            }
            None => DemandPredictor::new(config.predictor.clone()),
        };

        let store = TimeSeriesStore::new(config.timeseries.clone(), Arc::clone(&self.journal));
        let tracker = AccuracyTracker::new(config.tracker.clone(), Arc::clone(&self.journal));
        let engine = DecisionEngine::new(Arc::clone(&config), Arc::clone(&self.journal));
        let executor = CloudExecutor::new(provider, Arc::clone(&config), Arc::clone(&self.journal))
            .with_signals(Arc::clone(collector.signals()));
        let (shutdown, _) = broadcast::channel(1);

        Ok(ScalingManager {
            events: EventLog::new(Duration::hours(config.schedule.event_retention_hours as i64)),
            logger: StructuredLogger::new(config.region.clone()),
            config: RwLock::new(config),
            collector,
            store: Arc::new(store),
            predictor: Arc::new(predictor),
            tracker: Arc::new(tracker),
            engine,
            executor,
            scaling_lock: tokio::sync::Mutex::new(CycleState::default()),
            latest_forecast: RwLock::new(None),
            model_health: RwLock::new(None),
            model_dir: self.model_dir,
            model_load_error,
            running: AtomicBool::new(false),
            shutdown,
            task: Mutex::new(None),
            health: self.health.unwrap_or_default(),
            metrics: ScalerMetrics::new(),
        })
    }
}

impl Default for ScalingManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
