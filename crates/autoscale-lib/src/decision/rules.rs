//! Decision stages
//!
//! Each stage inspects one kind of evidence and returns a [`Signal`] when it
//! fires. Stages are pure so they can be tested without an engine.

use crate::config::{DecisionHeuristics, MetricThresholds, PredictionThresholds, ScalingThresholds};
use crate::models::{MetricSnapshot, PredictionInput, ScalingAction, ScalingReason};
use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};

/// Fraction of current load below which a forecast suggests scaling down
const PREDICTED_DROP_RATIO: f64 = 0.5;

/// Outcome of a stage that fired
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub action: ScalingAction,
    pub reasons: Vec<ScalingReason>,
    pub confidence: f64,
    pub urgency: u8,
}

/// The four metrics compared against thresholds
#[derive(Debug, Clone, Copy)]
struct Observed {
    cpu: f64,
    memory: f64,
    queue: f64,
    response_ms: f64,
}

impl From<&MetricSnapshot> for Observed {
    fn from(s: &MetricSnapshot) -> Self {
        Self {
            cpu: s.cpu_percent,
            memory: s.memory_percent,
            queue: s.queue_depth as f64,
            response_ms: s.avg_response_ms,
        }
    }
}

impl Observed {
    /// Reasons for every metric at or above `limits`
    fn at_or_above(&self, limits: &MetricThresholds) -> Vec<ScalingReason> {
        let mut reasons = Vec::new();
        if self.cpu >= limits.cpu_percent {
            reasons.push(ScalingReason::HighCpu);
        }
        if self.memory >= limits.memory_percent {
            reasons.push(ScalingReason::HighMemory);
        }
        if self.queue >= limits.queue_length {
            reasons.push(ScalingReason::HighQueue);
        }
        if self.response_ms >= limits.response_time_ms {
            reasons.push(ScalingReason::HighResponseTime);
        }
        reasons
    }

    fn at_or_below_count(&self, limits: &MetricThresholds) -> usize {
        [
            self.cpu <= limits.cpu_percent,
            self.memory <= limits.memory_percent,
            self.queue <= limits.queue_length,
            self.response_ms <= limits.response_time_ms,
        ]
        .into_iter()
        .filter(|hit| *hit)
        .count()
    }
}

/// Any metric at or above its urgent threshold
pub fn urgent(
    snapshot: &MetricSnapshot,
    thresholds: &ScalingThresholds,
    heuristics: &DecisionHeuristics,
) -> Option<Signal> {
    let reasons = Observed::from(snapshot).at_or_above(&thresholds.urgent);
    if reasons.is_empty() {
        return None;
    }
    Some(Signal {
        action: ScalingAction::UrgentScaleUp,
        reasons,
        confidence: heuristics.urgent_confidence,
        urgency: heuristics.urgent_urgency,
    })
}

/// Weighted overage score for scale-up, vote count for scale-down
pub fn standard(
    snapshot: &MetricSnapshot,
    thresholds: &ScalingThresholds,
    heuristics: &DecisionHeuristics,
) -> Option<Signal> {
    let observed = Observed::from(snapshot);
    let up = &thresholds.scale_up;
    let reasons = observed.at_or_above(up);

    let score: f64 = reasons
        .iter()
        .map(|reason| match reason {
            ScalingReason::HighCpu => (observed.cpu - up.cpu_percent) / 25.0,
            ScalingReason::HighMemory => (observed.memory - up.memory_percent) / 20.0,
            ScalingReason::HighQueue => (observed.queue / up.queue_length).min(2.0),
            ScalingReason::HighResponseTime => {
                (observed.response_ms / up.response_time_ms).min(2.0)
            }
            _ => 0.0,
        })
        .sum();

    if score >= heuristics.scale_up_score {
        return Some(Signal {
            action: ScalingAction::ScaleUp,
            reasons,
            confidence: (score / 2.0).min(1.0),
            urgency: heuristics.standard_urgency,
        });
    }

    // Any metric over a scale-up threshold vetoes a scale-down
    if !reasons.is_empty() {
        return None;
    }
    let votes = observed.at_or_below_count(&thresholds.scale_down);
    (votes >= heuristics.scale_down_votes).then(|| Signal {
        action: ScalingAction::ScaleDown,
        reasons: vec![ScalingReason::LowUtilization],
        confidence: votes as f64 / 4.0,
        urgency: heuristics.standard_urgency,
    })
}

/// Forecast of queue depth against the current queue depth
pub fn predicted(
    snapshot: &MetricSnapshot,
    prediction: &PredictionInput,
    limits: &PredictionThresholds,
    heuristics: &DecisionHeuristics,
) -> Option<Signal> {
    let current = snapshot.queue_depth as f64;
    let predicted = prediction.predicted_load;
    if !predicted.is_finite() || !prediction.confidence.is_finite() {
        return None;
    }
    let rising_bar = current.max(1.0) * limits.load_multiplier;

    if predicted >= rising_bar && prediction.confidence >= limits.confidence_threshold {
        return Some(Signal {
            action: ScalingAction::ScaleUp,
            reasons: vec![ScalingReason::PredictedLoadIncrease],
            confidence: prediction.confidence.min((predicted / rising_bar).min(1.0)),
            urgency: heuristics.prediction_urgency,
        });
    }

    if predicted < current * PREDICTED_DROP_RATIO && current > limits.scale_down_min_load {
        return Some(Signal {
            action: ScalingAction::ScaleDown,
            reasons: vec![ScalingReason::CostOptimization],
            confidence: ((current - predicted) / current).clamp(0.0, 1.0),
            urgency: heuristics.prediction_urgency,
        });
    }
    None
}

/// Time-of-day and day-of-week demand pattern
pub fn pattern(now: DateTime<Utc>, heuristics: &DecisionHeuristics) -> Option<Signal> {
    let offset = FixedOffset::east_opt(heuristics.pattern_utc_offset_minutes * 60)
        .unwrap_or_else(|| Utc.fix());
    let local = now.with_timezone(&offset);
    let hour = local.hour();
    let weekday = local.weekday().num_days_from_monday();

    let (action, confidence) = if weekday < 5 && hour == 8 {
        (ScalingAction::ScaleUp, heuristics.pre_business_confidence)
    } else if hour >= 22 || hour < 6 {
        (ScalingAction::ScaleDown, heuristics.night_confidence)
    } else if (weekday == 4 && hour >= 17) || weekday >= 5 {
        (ScalingAction::ScaleDown, heuristics.weekend_confidence)
    } else {
        return None;
    };

    Some(Signal {
        action,
        reasons: vec![ScalingReason::PatternBased],
        confidence,
        urgency: heuristics.pattern_urgency,
    })
}

/// Instance count an action recommends from `running`
pub fn recommended_instances(
    action: ScalingAction,
    snapshot: &MetricSnapshot,
    running: u32,
    max_instances: u32,
    heuristics: &DecisionHeuristics,
) -> u32 {
    match action {
        ScalingAction::Maintain => running,
        ScalingAction::UrgentScaleUp => (running * 2).max(running + 1).min(max_instances),
        ScalingAction::ScaleUp => {
            let step = if snapshot.queue_depth > 20 || snapshot.cpu_percent > 85.0 {
                2
            } else {
                1
            };
            (running + step).min(heuristics.scale_up_cap).min(max_instances)
        }
        ScalingAction::ScaleDown => running.saturating_sub(1).max(1),
    }
}
