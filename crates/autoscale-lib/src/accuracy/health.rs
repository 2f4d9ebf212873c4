//! Model health scoring

use super::{AccuracyMetrics, TrendDirection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// R² below this is reported as poor fit
const MIN_R_SQUARED: f64 = 0.7;

/// Score below this requires retraining
const RETRAIN_SCORE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            HealthGrade::Excellent
        } else if score >= 60.0 {
            HealthGrade::Good
        } else if score >= 40.0 {
            HealthGrade::Fair
        } else {
            HealthGrade::Poor
        }
    }
}

/// Assessed health of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub model: String,
    /// Composite score in [0, 100]
    pub score: f64,
    pub grade: HealthGrade,
    pub requires_retraining: bool,
    pub accuracy_pct: f64,
    pub r_squared: f64,
    pub sample_count: usize,
    pub trend: TrendDirection,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Result of [`AccuracyTracker::check_health`](super::AccuracyTracker::check_health)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthReport {
    Assessed(ModelHealth),
    InsufficientData { samples: usize, required: usize },
}

impl HealthReport {
    pub fn requires_retraining(&self) -> bool {
        matches!(self, HealthReport::Assessed(h) if h.requires_retraining)
    }

    pub fn health(&self) -> Option<&ModelHealth> {
        match self {
            HealthReport::Assessed(h) => Some(h),
            HealthReport::InsufficientData { .. } => None,
        }
    }
}

fn sample_points(samples: usize) -> f64 {
    match samples {
        n if n >= 50 => 20.0,
        n if n >= 20 => 15.0,
        n if n >= 10 => 10.0,
        _ => 5.0,
    }
}

fn trend_points(trend: TrendDirection) -> f64 {
    match trend {
        TrendDirection::Improving => 20.0,
        TrendDirection::Stable => 15.0,
        TrendDirection::InsufficientData => 10.0,
        TrendDirection::Degrading => 5.0,
    }
}

/// Combine an evaluation and a trend into a scored health assessment
pub fn assess(
    metrics: &AccuracyMetrics,
    trend: TrendDirection,
    accuracy_threshold: f64,
    now: DateTime<Utc>,
) -> ModelHealth {
    let accuracy_points = 40.0 * (metrics.accuracy_pct / 100.0).min(1.0);
    let fit_points = metrics.r_squared.clamp(0.0, 1.0) * 20.0;
    let score = (accuracy_points
        + sample_points(metrics.sample_count)
        + fit_points
        + trend_points(trend))
    .clamp(0.0, 100.0);

    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if metrics.accuracy_pct < accuracy_threshold {
        issues.push(format!(
            "Accuracy {:.1}% is below the {:.1}% threshold",
            metrics.accuracy_pct, accuracy_threshold
        ));
        recommendations.push("Retrain the model on recent data".to_string());
    }
    if metrics.sample_count < 20 {
        issues.push(format!(
            "Only {} validated predictions in the evaluation window",
            metrics.sample_count
        ));
        recommendations.push("Collect more validated predictions before trusting forecasts".to_string());
    }
    if metrics.r_squared < MIN_R_SQUARED {
        issues.push(format!("Poor fit (R² = {:.2})", metrics.r_squared));
        recommendations.push("Review the feature set; forecasts explain little variance".to_string());
    }
    if trend == TrendDirection::Degrading {
        issues.push("Accuracy has been degrading".to_string());
        recommendations.push("Investigate recent workload changes".to_string());
    }

    ModelHealth {
        model: metrics.model.clone(),
        score,
        grade: HealthGrade::from_score(score),
        requires_retraining: score < RETRAIN_SCORE || metrics.accuracy_pct < accuracy_threshold,
        accuracy_pct: metrics.accuracy_pct,
        r_squared: metrics.r_squared,
        sample_count: metrics.sample_count,
        trend,
        issues,
        recommendations,
        checked_at: now,
    }
}
