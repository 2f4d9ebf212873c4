//! Feature engineering over resampled rows
//!
//! Per-row features:
//! - moving averages (window W, min periods 1) of queue, cpu, memory, response
//! - fractional change vs the previous row (0 on the first row or a zero base)
//! - calendar flags: hour, weekday (Mon=0), weekend, business hours
//! - composite load, GPU composite, processing efficiency
//!
//! Series-relative features (z-scores) use statistics of the whole queried
//! series, so a row's features depend on the query window but never on
//! anything outside it. A trained model carries its own [`SeriesStats`] and
//! re-normalises rows with [`SeriesStats::normalize`] before scoring them.

use super::resample::ResampledRow;
use super::LoadWeights;
use crate::models::FeatureVector;
use crate::stats;
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

const GPU_UTIL_WEIGHT: f64 = 0.6;
const GPU_MEMORY_WEIGHT: f64 = 0.4;

/// Mean and standard deviation of the columns used for z-scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub queue: (f64, f64),
    pub cpu: (f64, f64),
    pub memory: (f64, f64),
}

impl SeriesStats {
    pub fn from_rows(rows: &[ResampledRow]) -> Self {
        let column = |f: fn(&ResampledRow) -> f64| {
            let values: Vec<f64> = rows.iter().map(f).collect();
            (stats::mean(&values), stats::std_dev(&values))
        };
        Self {
            queue: column(|r| r.queue_depth),
            cpu: column(|r| r.cpu_percent),
            memory: column(|r| r.memory_percent),
        }
    }

    /// Statistics of the raw columns carried by feature vectors
    pub fn from_features(features: &[FeatureVector]) -> Self {
        let column = |f: fn(&FeatureVector) -> f64| {
            let values: Vec<f64> = features.iter().map(f).collect();
            (stats::mean(&values), stats::std_dev(&values))
        };
        Self {
            queue: column(|v| v.queue_depth),
            cpu: column(|v| v.cpu_percent),
            memory: column(|v| v.memory_percent),
        }
    }

    /// Recompute the z-score columns of `vector` against these statistics
    pub fn normalize(&self, vector: &mut FeatureVector) {
        vector.queue_zscore = zscore(vector.queue_depth, self.queue);
        vector.cpu_zscore = zscore(vector.cpu_percent, self.cpu);
        vector.memory_zscore = zscore(vector.memory_percent, self.memory);
    }
}

/// Build the feature vector of `rows[index]`
pub fn feature_row(
    rows: &[ResampledRow],
    index: usize,
    window: usize,
    weights: &LoadWeights,
    series: &SeriesStats,
) -> FeatureVector {
    let row = &rows[index];
    let previous = index.checked_sub(1).map(|i| &rows[i]);
    let start = (index + 1).saturating_sub(window.max(1));
    let recent = &rows[start..=index];

    let moving = |f: fn(&ResampledRow) -> f64| {
        recent.iter().map(f).sum::<f64>() / recent.len() as f64
    };
    let change = |f: fn(&ResampledRow) -> f64| match previous {
        Some(prev) => pct_change(f(prev), f(row)),
        None => 0.0,
    };
    let trend = |f: fn(&ResampledRow) -> f64| match previous {
        Some(prev) => sign(f(row) - f(prev)),
        None => 0.0,
    };

    let gpu_utilization = row.gpu_utilization.unwrap_or(0.0);
    let gpu_memory_percent = row.gpu_memory_percent.unwrap_or(0.0);
    let weekday = row.timestamp.weekday().num_days_from_monday();
    let hour = row.timestamp.hour();
    let is_weekend = weekday >= 5;
    let is_business_hours = !is_weekend && (9..18).contains(&hour);

    let processing_efficiency = if row.avg_response_ms > 0.0 {
        row.completed_last_hour / (row.avg_response_ms / 1000.0)
    } else {
        0.0
    };

    FeatureVector {
        timestamp: row.timestamp,
        queue_depth: row.queue_depth,
        pending_requests: row.pending_requests,
        active_tasks: row.active_tasks,
        cpu_percent: row.cpu_percent,
        memory_percent: row.memory_percent,
        memory_available_gb: row.memory_available_gb,
        gpu_utilization,
        gpu_memory_percent,
        gpu_temperature: row.gpu_temperature.unwrap_or(0.0),
        avg_response_ms: row.avg_response_ms,
        p95_response_ms: row.p95_response_ms,
        p99_response_ms: row.p99_response_ms,
        completed_last_hour: row.completed_last_hour,
        failed_last_hour: row.failed_last_hour,
        success_rate: row.success_rate,
        network_mbps: row.network_mbps,
        open_connections: row.open_connections,
        running_instances: row.running_instances,
        queue_ma: moving(|r| r.queue_depth),
        cpu_ma: moving(|r| r.cpu_percent),
        memory_ma: moving(|r| r.memory_percent),
        response_ma: moving(|r| r.avg_response_ms),
        queue_change: change(|r| r.queue_depth),
        active_change: change(|r| r.active_tasks),
        cpu_change: change(|r| r.cpu_percent),
        memory_change: change(|r| r.memory_percent),
        hour: hour as f64,
        day_of_week: weekday as f64,
        is_weekend: flag(is_weekend),
        is_business_hours: flag(is_business_hours),
        composite_load: weights.composite(row.cpu_percent, row.memory_percent, row.queue_depth),
        gpu_composite: GPU_UTIL_WEIGHT * gpu_utilization + GPU_MEMORY_WEIGHT * gpu_memory_percent,
        processing_efficiency,
        queue_zscore: zscore(row.queue_depth, series.queue),
        cpu_zscore: zscore(row.cpu_percent, series.cpu),
        memory_zscore: zscore(row.memory_percent, series.memory),
        queue_trend: trend(|r| r.queue_depth),
        cpu_trend: trend(|r| r.cpu_percent),
        memory_trend: trend(|r| r.memory_percent),
    }
}

fn pct_change(previous: f64, current: f64) -> f64 {
    if previous.abs() < f64::EPSILON {
        0.0
    } else {
        (current - previous) / previous
    }
}

fn zscore(value: f64, (mean, std): (f64, f64)) -> f64 {
    if std < f64::EPSILON {
        0.0
    } else {
        (value - mean) / std
    }
}

fn sign(delta: f64) -> f64 {
    if delta > 0.0 {
        1.0
    } else if delta < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(hour: u32, day: u32, queue: f64, cpu: f64) -> ResampledRow {
        ResampledRow {
            // 2024-01-01 is a Monday
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap(),
            queue_depth: queue,
            pending_requests: 0.0,
            active_tasks: 0.0,
            cpu_percent: cpu,
            memory_percent: 50.0,
            memory_available_gb: 8.0,
            gpu_utilization: Some(50.0),
            gpu_memory_percent: Some(25.0),
            gpu_temperature: Some(60.0),
            avg_response_ms: 500.0,
            p95_response_ms: 900.0,
            p99_response_ms: 1200.0,
            completed_last_hour: 100.0,
            failed_last_hour: 0.0,
            success_rate: 100.0,
            network_mbps: 1.0,
            open_connections: 3.0,
            running_instances: 2.0,
        }
    }

    #[test]
    fn test_moving_average_min_periods() {
        let rows = vec![row(10, 1, 2.0, 10.0), row(10, 1, 4.0, 20.0), row(10, 1, 9.0, 30.0)];
        let stats = SeriesStats::from_rows(&rows);
        let weights = LoadWeights::default();

        let first = feature_row(&rows, 0, 2, &weights, &stats);
        assert_eq!(first.queue_ma, 2.0);
        assert_eq!(first.queue_change, 0.0);
        assert_eq!(first.queue_trend, 0.0);

        let third = feature_row(&rows, 2, 2, &weights, &stats);
        assert!((third.queue_ma - 6.5).abs() < 1e-9);
        assert!((third.queue_change - 1.25).abs() < 1e-9);
        assert_eq!(third.queue_trend, 1.0);
    }

    #[test]
    fn test_calendar_flags() {
        let rows = vec![row(10, 1, 0.0, 0.0), row(20, 6, 0.0, 0.0)];
        let stats = SeriesStats::from_rows(&rows);
        let weights = LoadWeights::default();

        let monday = feature_row(&rows, 0, 5, &weights, &stats);
        assert_eq!(monday.day_of_week, 0.0);
        assert_eq!(monday.is_business_hours, 1.0);
        assert_eq!(monday.is_weekend, 0.0);

        let saturday = feature_row(&rows, 1, 5, &weights, &stats);
        assert_eq!(saturday.day_of_week, 5.0);
        assert_eq!(saturday.is_weekend, 1.0);
        assert_eq!(saturday.is_business_hours, 0.0);
    }

    #[test]
    fn test_composite_scores() {
        let rows = vec![row(10, 1, 10.0, 80.0)];
        let stats = SeriesStats::from_rows(&rows);
        let f = feature_row(&rows, 0, 5, &LoadWeights::default(), &stats);
        // 0.3 * 80 + 0.3 * 50 + 0.4 * 10
        assert!((f.composite_load - 43.0).abs() < 1e-9);
        // 0.6 * 50 + 0.4 * 25
        assert!((f.gpu_composite - 40.0).abs() < 1e-9);
        // 100 completed / 0.5 s
        assert!((f.processing_efficiency - 200.0).abs() < 1e-9);
        // Single-row series has no spread
        assert_eq!(f.queue_zscore, 0.0);
    }

    #[test]
    fn test_normalize_uses_given_statistics() {
        let wide = vec![row(10, 1, 0.0, 20.0), row(11, 1, 10.0, 40.0), row(12, 1, 20.0, 60.0)];
        let narrow = &wide[1..];
        let weights = LoadWeights::default();

        let trained = SeriesStats::from_rows(&wide);
        let mut served = feature_row(narrow, 1, 5, &weights, &SeriesStats::from_rows(narrow));
        let reference = feature_row(&wide, 2, 5, &weights, &trained);
        assert_ne!(served.queue_zscore, reference.queue_zscore);

        trained.normalize(&mut served);
        assert!((served.queue_zscore - reference.queue_zscore).abs() < 1e-12);
        assert!((served.cpu_zscore - reference.cpu_zscore).abs() < 1e-12);
        assert_eq!(served.memory_zscore, 0.0);

        let from_vectors = SeriesStats::from_features(&[
            feature_row(&wide, 0, 5, &weights, &trained),
            feature_row(&wide, 1, 5, &weights, &trained),
            reference,
        ]);
        assert_eq!(from_vectors, trained);
    }

    #[test]
    fn test_zero_base_change() {
        let rows = vec![row(10, 1, 0.0, 0.0), row(10, 1, 5.0, 0.0)];
        let stats = SeriesStats::from_rows(&rows);
        let f = feature_row(&rows, 1, 5, &LoadWeights::default(), &stats);
        assert_eq!(f.queue_change, 0.0);
    }
}
