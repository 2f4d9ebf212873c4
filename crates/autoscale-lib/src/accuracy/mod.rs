//! Prediction accuracy tracking
//!
//! Every served forecast is recorded. When its target time arrives the
//! freshest observed load validates it exactly once. Validated records feed
//! rolling evaluations, a trend over stored evaluations and a composite
//! health score that drives retraining.

mod health;

pub use health::{assess, HealthGrade, HealthReport, ModelHealth};

use crate::error::Result;
use crate::journal::{Journal, Table};
use crate::models::PredictionRecord;
use crate::stats;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// A prediction is due when its target is this close to now
    pub validation_window_mins: i64,
    /// Fewest validated predictions an evaluation needs
    pub min_samples: usize,
    pub evaluation_window_hours: i64,
    /// Accuracy percentage below which retraining is required
    pub accuracy_threshold: f64,
    pub trend_days: i64,
    pub retention_days: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            validation_window_mins: 10,
            min_samples: 5,
            evaluation_window_hours: 24,
            accuracy_threshold: 80.0,
            trend_days: 7,
            retention_days: 30,
        }
    }
}

/// Error statistics of one model over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub model: String,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    /// Mean absolute percentage error over non-zero actuals
    pub mape: f64,
    pub r_squared: f64,
    /// `max(0, 100 - MAPE)`
    pub accuracy_pct: f64,
    pub sample_count: usize,
    pub window_hours: i64,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Evaluation {
    Report(AccuracyMetrics),
    InsufficientData { samples: usize, required: usize },
}

impl Evaluation {
    pub fn metrics(&self) -> Option<&AccuracyMetrics> {
        match self {
            Evaluation::Report(m) => Some(m),
            Evaluation::InsufficientData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
    InsufficientData,
}

/// Direction of stored evaluation accuracies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Accuracy change per evaluation
    pub slope: f64,
    pub evaluations: usize,
}

/// Summary of recent predictions regardless of model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionStats {
    pub total: usize,
    pub validated: usize,
    pub validation_rate: f64,
    pub avg_confidence: f64,
    pub avg_absolute_error: f64,
}

/// Records forecasts and scores them against observed load
///
/// Readers (status reporting) never block each other; the scaling loop is
/// the single writer.
pub struct AccuracyTracker {
    config: TrackerConfig,
    predictions: RwLock<BTreeMap<u64, PredictionRecord>>,
    evaluations: RwLock<Vec<AccuracyMetrics>>,
    next_id: AtomicU64,
    journal: Arc<Journal>,
}

impl AccuracyTracker {
    pub fn new(config: TrackerConfig, journal: Arc<Journal>) -> Self {
        Self {
            config,
            predictions: RwLock::new(BTreeMap::new()),
            evaluations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            journal,
        }
    }

    pub fn in_memory(config: TrackerConfig) -> Self {
        Self::new(config, Arc::new(Journal::disabled()))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Reload journaled predictions and evaluations
    ///
    /// The last journaled version of each prediction wins.
    pub fn restore(&self) -> Result<usize> {
        let records: Vec<PredictionRecord> = self.journal.replay(Table::Predictions)?;
        let evaluations: Vec<AccuracyMetrics> = self.journal.replay(Table::Evaluations)?;

        let mut predictions = self.predictions.write().unwrap_or_else(|e| e.into_inner());
        for record in records {
            predictions.insert(record.id, record);
        }
        let max_id = predictions.keys().next_back().copied().unwrap_or(0);
        self.next_id.fetch_max(max_id + 1, Ordering::SeqCst);
        let count = predictions.len();
        drop(predictions);

        *self.evaluations.write().unwrap_or_else(|e| e.into_inner()) = evaluations;
        info!(predictions = count, "Restored prediction history");
        Ok(count)
    }

    pub fn record_prediction(
        &self,
        value: f64,
        target_time: DateTime<Utc>,
        model: &str,
        confidence: f64,
    ) -> u64 {
        self.record_prediction_at(value, target_time, model, confidence, Utc::now())
    }

    pub fn record_prediction_at(
        &self,
        value: f64,
        target_time: DateTime<Utc>,
        model: &str,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = PredictionRecord {
            id,
            predicted_value: value,
            target_time,
            model: model.to_string(),
            confidence,
            created_at: now,
            actual_value: None,
            absolute_error: None,
            percentage_error: None,
            validated_at: None,
        };
        self.persist(&record);
        self.predictions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, record);
        debug!(prediction_id = id, model = %model, value, "Recorded prediction");
        id
    }

    pub fn get(&self, id: u64) -> Option<PredictionRecord> {
        self.predictions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Set the actual value of an unvalidated prediction
    ///
    /// Returns false for unknown or already validated ids.
    pub fn validate(&self, id: u64, actual: f64) -> bool {
        self.validate_at(id, actual, Utc::now())
    }

    pub fn validate_at(&self, id: u64, actual: f64, now: DateTime<Utc>) -> bool {
        let mut predictions = self.predictions.write().unwrap_or_else(|e| e.into_inner());
        let Some(record) = predictions.get_mut(&id) else {
            return false;
        };
        if record.is_validated() {
            return false;
        }
        apply_actual(record, actual, now);
        let snapshot = record.clone();
        drop(predictions);

        self.persist(&snapshot);
        true
    }

    /// Validate every unvalidated prediction whose target is within the
    /// validation window of `now`
    pub fn validate_due(&self, actual: f64, now: DateTime<Utc>) -> Vec<PredictionRecord> {
        let window = Duration::minutes(self.config.validation_window_mins);
        let mut validated = Vec::new();
        {
            let mut predictions = self.predictions.write().unwrap_or_else(|e| e.into_inner());
            for record in predictions.values_mut() {
                if !record.is_validated() && (record.target_time - now).abs() <= window {
                    apply_actual(record, actual, now);
                    validated.push(record.clone());
                }
            }
        }
        for record in &validated {
            self.persist(record);
        }
        validated
    }

    /// Score `model` over validated predictions targeting the trailing `window`
    pub fn evaluate(&self, model: &str, window: Duration) -> Evaluation {
        self.evaluate_at(model, window, Utc::now())
    }

    pub fn evaluate_at(&self, model: &str, window: Duration, now: DateTime<Utc>) -> Evaluation {
        let since = now - window;
        let pairs: Vec<(f64, f64)> = self
            .predictions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.model == model && r.target_time >= since && r.target_time <= now)
            .filter_map(|r| r.actual_value.map(|a| (a, r.predicted_value)))
            .collect();

        if pairs.len() < self.config.min_samples {
            return Evaluation::InsufficientData {
                samples: pairs.len(),
                required: self.config.min_samples,
            };
        }

        let actual: Vec<f64> = pairs.iter().map(|(a, _)| *a).collect();
        let predicted: Vec<f64> = pairs.iter().map(|(_, p)| *p).collect();
        let mse = actual
            .iter()
            .zip(&predicted)
            .map(|(a, p)| (a - p).powi(2))
            .sum::<f64>()
            / actual.len() as f64;
        let percentage_errors: Vec<f64> = pairs
            .iter()
            .filter(|(a, _)| a.abs() > f64::EPSILON)
            .map(|(a, p)| ((a - p) / a).abs() * 100.0)
            .collect();
        let mape = stats::mean(&percentage_errors);

        let metrics = AccuracyMetrics {
            model: model.to_string(),
            mae: stats::mean_absolute_error(&actual, &predicted),
            mse,
            rmse: mse.sqrt(),
            mape,
            r_squared: stats::r_squared(&actual, &predicted),
            accuracy_pct: (100.0 - mape).clamp(0.0, 100.0),
            sample_count: pairs.len(),
            window_hours: window.num_hours(),
            evaluated_at: now,
        };

        if let Err(e) = self.journal.append(Table::Evaluations, &metrics) {
            warn!(error = %e, "Failed to journal evaluation");
        }
        self.evaluations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(metrics.clone());
        Evaluation::Report(metrics)
    }

    /// Direction of accuracy across stored evaluations of `model`
    pub fn trend(&self, model: &str, days: i64) -> Trend {
        self.trend_at(model, days, Utc::now())
    }

    pub fn trend_at(&self, model: &str, days: i64, now: DateTime<Utc>) -> Trend {
        let since = now - Duration::days(days);
        let accuracies: Vec<f64> = self
            .evaluations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.model == model && e.evaluated_at >= since && e.evaluated_at <= now)
            .map(|e| e.accuracy_pct)
            .collect();

        if accuracies.len() < 2 {
            return Trend {
                direction: TrendDirection::InsufficientData,
                slope: 0.0,
                evaluations: accuracies.len(),
            };
        }

        let slope = stats::linear_regression_slope(&accuracies);
        let direction = if slope > 0.5 {
            TrendDirection::Improving
        } else if slope < -0.5 {
            TrendDirection::Degrading
        } else {
            TrendDirection::Stable
        };
        Trend {
            direction,
            slope,
            evaluations: accuracies.len(),
        }
    }

    /// Evaluate `model` over the configured window and score its health
    pub fn check_health(&self, model: &str) -> HealthReport {
        self.check_health_at(model, Utc::now())
    }

    pub fn check_health_at(&self, model: &str, now: DateTime<Utc>) -> HealthReport {
        let window = Duration::hours(self.config.evaluation_window_hours);
        let metrics = match self.evaluate_at(model, window, now) {
            Evaluation::Report(m) => m,
            Evaluation::InsufficientData { samples, required } => {
                return HealthReport::InsufficientData { samples, required }
            }
        };
        let trend = self.trend_at(model, self.config.trend_days, now);
        HealthReport::Assessed(assess(
            &metrics,
            trend.direction,
            self.config.accuracy_threshold,
            now,
        ))
    }

    /// Prediction counts and averages over the trailing `window`
    pub fn recent_stats(&self, window: Duration) -> PredictionStats {
        self.recent_stats_at(window, Utc::now())
    }

    pub fn recent_stats_at(&self, window: Duration, now: DateTime<Utc>) -> PredictionStats {
        let since = now - window;
        let predictions = self.predictions.read().unwrap_or_else(|e| e.into_inner());
        let recent: Vec<&PredictionRecord> = predictions
            .values()
            .filter(|r| r.created_at >= since)
            .collect();
        if recent.is_empty() {
            return PredictionStats::default();
        }

        let errors: Vec<f64> = recent.iter().filter_map(|r| r.absolute_error).collect();
        let confidences: Vec<f64> = recent.iter().map(|r| r.confidence).collect();
        PredictionStats {
            total: recent.len(),
            validated: errors.len(),
            validation_rate: errors.len() as f64 / recent.len() as f64,
            avg_confidence: stats::mean(&confidences),
            avg_absolute_error: stats::mean(&errors),
        }
    }

    /// Drop predictions and evaluations past the retention window
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(self.config.retention_days);
        let mut predictions = self.predictions.write().unwrap_or_else(|e| e.into_inner());
        let before = predictions.len();
        predictions.retain(|_, r| r.created_at >= cutoff);
        let removed = before - predictions.len();
        drop(predictions);

        self.evaluations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|e| e.evaluated_at >= cutoff);
        if removed > 0 {
            debug!(removed, "Cleaned up old predictions");
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.predictions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| !r.is_validated())
            .count()
    }

    fn persist(&self, record: &PredictionRecord) {
        if let Err(e) = self.journal.append(Table::Predictions, record) {
            warn!(prediction_id = record.id, error = %e, "Failed to journal prediction");
        }
    }
}

fn apply_actual(record: &mut PredictionRecord, actual: f64, now: DateTime<Utc>) {
    let error = (record.predicted_value - actual).abs();
    record.actual_value = Some(actual);
    record.absolute_error = Some(error);
    record.percentage_error = (actual.abs() > f64::EPSILON).then(|| error / actual.abs() * 100.0);
    record.validated_at = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn tracker() -> AccuracyTracker {
        AccuracyTracker::in_memory(TrackerConfig::default())
    }

    /// Record and validate `n` forest predictions with the given errors
    fn seed(tracker: &AccuracyTracker, n: usize, predicted: f64, actual: f64, at: DateTime<Utc>) {
        for i in 0..n {
            let target = at - Duration::minutes(i as i64);
            let id = tracker.record_prediction_at(predicted, target, "random_forest", 0.8, target);
            assert!(tracker.validate_at(id, actual, at));
        }
    }

    #[test]
    fn test_validate_once() {
        let tracker = tracker();
        let id = tracker.record_prediction_at(10.0, t0(), "random_forest", 0.9, t0());
        assert!(tracker.validate_at(id, 8.0, t0()));
        assert!(!tracker.validate_at(id, 9.0, t0()));
        assert!(!tracker.validate_at(999, 9.0, t0()));

        let record = tracker.get(id).unwrap();
        assert_eq!(record.actual_value, Some(8.0));
        assert_eq!(record.absolute_error, Some(2.0));
        assert_eq!(record.percentage_error, Some(25.0));
    }

    #[test]
    fn test_validate_due_window() {
        let tracker = tracker();
        let due = tracker.record_prediction_at(5.0, t0() + Duration::minutes(8), "arima", 0.5, t0());
        let early = tracker.record_prediction_at(5.0, t0() + Duration::minutes(30), "arima", 0.5, t0());
        let late = tracker.record_prediction_at(5.0, t0() - Duration::minutes(10), "arima", 0.5, t0());

        let validated = tracker.validate_due(6.0, t0());
        let ids: Vec<u64> = validated.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![due, late]);
        assert!(!tracker.get(early).unwrap().is_validated());
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn test_insufficient_data_below_five_samples() {
        let tracker = tracker();
        seed(&tracker, 4, 10.0, 10.0, t0());
        assert_eq!(
            tracker.evaluate_at("random_forest", Duration::hours(24), t0()),
            Evaluation::InsufficientData {
                samples: 4,
                required: 5
            }
        );
        assert!(matches!(
            tracker.check_health_at("random_forest", t0()),
            HealthReport::InsufficientData { .. }
        ));
    }

    #[test]
    fn test_evaluation_metrics() {
        let tracker = tracker();
        seed(&tracker, 5, 12.0, 10.0, t0());
        let Evaluation::Report(m) = tracker.evaluate_at("random_forest", Duration::hours(24), t0())
        else {
            panic!("expected a report");
        };
        assert_eq!(m.sample_count, 5);
        assert!((m.mae - 2.0).abs() < 1e-9);
        assert!((m.rmse - 2.0).abs() < 1e-9);
        assert!((m.mape - 20.0).abs() < 1e-9);
        assert!((m.accuracy_pct - 80.0).abs() < 1e-9);

        // Other models are evaluated independently
        assert!(tracker
            .evaluate_at("arima", Duration::hours(24), t0())
            .metrics()
            .is_none());
    }

    #[test]
    fn test_accuracy_clamped_to_zero() {
        let tracker = tracker();
        seed(&tracker, 6, 100.0, 10.0, t0());
        let evaluation = tracker.evaluate_at("random_forest", Duration::hours(24), t0());
        assert_eq!(evaluation.metrics().unwrap().accuracy_pct, 0.0);
    }

    #[test]
    fn test_trend_directions() {
        let tracker = tracker();
        assert_eq!(
            tracker.trend_at("random_forest", 7, t0()).direction,
            TrendDirection::InsufficientData
        );

        // Accuracy improves: 50%, 70%, 90% on successive evaluations
        for (hour, predicted) in [(0, 15.0), (1, 13.0), (2, 11.0)] {
            let at = t0() + Duration::hours(hour);
            seed(&tracker, 5, predicted, 10.0, at);
            tracker.evaluate_at("random_forest", Duration::minutes(30), at);
        }
        let trend = tracker.trend_at("random_forest", 7, t0() + Duration::hours(3));
        assert_eq!(trend.direction, TrendDirection::Improving);
        assert!((trend.slope - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_health_requires_retraining_when_inaccurate() {
        let tracker = tracker();
        seed(&tracker, 60, 13.0, 10.0, t0());
        let report = tracker.check_health_at("random_forest", t0());
        let health = report.health().unwrap();
        // 70% accuracy is below the 80% threshold
        assert!(health.requires_retraining);
        assert!(report.requires_retraining());
        assert!(!health.issues.is_empty());
        assert!(!health.recommendations.is_empty());
    }

    #[test]
    fn test_health_score_for_accurate_model() {
        let tracker = tracker();
        // Varied actuals so R² is meaningful; predictions off by 1%
        for i in 0..60 {
            let at = t0() - Duration::minutes(i);
            let actual = 50.0 + (i % 10) as f64 * 5.0;
            let id = tracker.record_prediction_at(actual * 1.01, at, "ensemble", 0.9, at);
            tracker.validate_at(id, actual, t0());
        }
        let report = tracker.check_health_at("ensemble", t0());
        let health = report.health().unwrap();
        assert!(health.accuracy_pct > 98.0);
        // 40 * 0.99 + 20 + ~20 + 10 (no trend yet)
        assert!(health.score > 85.0, "score {}", health.score);
        assert_eq!(health.grade, HealthGrade::Excellent);
        assert!(!health.requires_retraining);
    }

    #[test]
    fn test_recent_stats_and_cleanup() {
        let tracker = tracker();
        tracker.record_prediction_at(1.0, t0(), "arima", 0.4, t0() - Duration::days(40));
        let id = tracker.record_prediction_at(2.0, t0(), "arima", 0.6, t0());
        tracker.validate_at(id, 3.0, t0());
        tracker.record_prediction_at(2.0, t0(), "arima", 0.8, t0());

        let stats = tracker.recent_stats_at(Duration::hours(24), t0());
        assert_eq!(stats.total, 2);
        assert_eq!(stats.validated, 1);
        assert!((stats.validation_rate - 0.5).abs() < 1e-9);
        assert!((stats.avg_confidence - 0.7).abs() < 1e-9);
        assert!((stats.avg_absolute_error - 1.0).abs() < 1e-9);

        assert_eq!(tracker.cleanup_at(t0()), 1);
        assert_eq!(tracker.recent_stats_at(Duration::days(365), t0()).total, 2);
    }

    #[test]
    fn test_restore_keeps_latest_version() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::open(dir.path()).unwrap());
        let tracker = AccuracyTracker::new(TrackerConfig::default(), journal.clone());
        let id = tracker.record_prediction_at(4.0, t0(), "arima", 0.5, t0());
        tracker.validate_at(id, 5.0, t0());

        let restored = AccuracyTracker::new(TrackerConfig::default(), journal);
        assert_eq!(restored.restore().unwrap(), 1);
        assert_eq!(restored.get(id).unwrap().actual_value, Some(5.0));
        let next = restored.record_prediction_at(1.0, t0(), "arima", 0.5, t0());
        assert!(next > id);
    }
}
