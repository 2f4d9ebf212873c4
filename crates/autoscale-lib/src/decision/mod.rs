//! Scaling decision engine
//!
//! Stages run in strict precedence and the first that fires wins:
//! - urgent thresholds
//! - standard thresholds (weighted score up, vote count down)
//! - forecast of queue depth
//! - time-of-day pattern
//!
//! The winning action is then checked against its class cooldown. An
//! action in cooldown, or one whose recommendation would not change the
//! running count, is reported as maintain.

mod cooldown;
pub mod rules;


pub use cooldown::CooldownStore;
pub use rules::Signal;

use crate::config::ScalingConfig;
use crate::journal::{Journal, Table};
use crate::models::{ActionClass, MetricSnapshot, PredictionInput, ScalingAction, ScalingDecision};
use crate::observability::ScalerMetrics;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// How long decisions stay in the in-memory history
const HISTORY_WINDOW_HOURS: i64 = 24;

/// Confidence reported when a cooldown suppresses an action
const COOLDOWN_CONFIDENCE: f64 = 1.0;

/// Produces one [`ScalingDecision`] per invocation
pub struct DecisionEngine {
    config: RwLock<Arc<ScalingConfig>>,
    cooldowns: CooldownStore,
    history: RwLock<VecDeque<ScalingDecision>>,
    next_id: AtomicU64,
    journal: Arc<Journal>,
    metrics: ScalerMetrics,
}

impl DecisionEngine {
    pub fn new(config: Arc<ScalingConfig>, journal: Arc<Journal>) -> Self {
        Self {
            config: RwLock::new(config),
            cooldowns: CooldownStore::new(),
            history: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            journal,
            metrics: ScalerMetrics::new(),
        }
    }

    /// Swap in a new configuration for subsequent decisions
    pub fn set_config(&self, config: Arc<ScalingConfig>) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn config(&self) -> Arc<ScalingConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn cooldowns(&self) -> &CooldownStore {
        &self.cooldowns
    }

    pub fn decide(
        &self,
        current: &MetricSnapshot,
        predicted: Option<&PredictionInput>,
        running_instances: u32,
    ) -> ScalingDecision {
        self.decide_at(current, predicted, running_instances, Utc::now())
    }

    /// Decide as of `now`; cooldowns and time-of-day rules use this instant
    pub fn decide_at(
        &self,
        current: &MetricSnapshot,
        predicted: Option<&PredictionInput>,
        running_instances: u32,
        now: DateTime<Utc>,
    ) -> ScalingDecision {
        let config = self.config();
        let candidate = evaluate(&config, current, predicted, now);

        let signal = match candidate {
            Some(signal) => {
                let class = signal.action.class();
                if class.map_or(false, |c| self.cooldowns.is_active(c, now)) {
                    debug!(action = %signal.action, "Action suppressed by cooldown");
                    Signal {
                        action: ScalingAction::Maintain,
                        reasons: Vec::new(),
                        confidence: COOLDOWN_CONFIDENCE,
                        urgency: 1,
                    }
                } else {
                    signal
                }
            }
            None => maintain_signal(),
        };

        let mut decision = self.build(&config, signal, current, predicted, running_instances, now);

        if let Some(class) = decision.action.class() {
            let until = now + cooldown_for(&config, class);
            self.cooldowns.start(class, until);
            decision.cooldown_until = Some(until);
        }

        self.record(&decision);
        decision
    }

    /// Decisions made within the trailing `window`, oldest first
    pub fn history(&self, window: Duration) -> Vec<ScalingDecision> {
        let since = Utc::now() - window;
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|d| d.decided_at >= since)
            .cloned()
            .collect()
    }

    /// The most recent `limit` decisions, newest first
    pub fn recent(&self, limit: usize) -> Vec<ScalingDecision> {
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn last_decision(&self) -> Option<ScalingDecision> {
        self.recent(1).pop()
    }

    fn build(
        &self,
        config: &ScalingConfig,
        signal: Signal,
        current: &MetricSnapshot,
        predicted: Option<&PredictionInput>,
        running: u32,
        now: DateTime<Utc>,
    ) -> ScalingDecision {
        let recommended = rules::recommended_instances(
            signal.action,
            current,
            running,
            config.max_instances,
            &config.heuristics,
        );

        // An action that leaves the count unchanged (or moves it the wrong
        // way at a bound) is a maintain
        let effective = match signal.action {
            ScalingAction::ScaleUp | ScalingAction::UrgentScaleUp if recommended <= running => None,
            ScalingAction::ScaleDown if recommended >= running => None,
            _ => Some(signal),
        };
        let (signal, recommended) = match effective {
            Some(signal) => (signal, recommended),
            None => (maintain_signal(), running),
        };

        ScalingDecision {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            action: signal.action,
            reasons: signal.reasons,
            confidence: signal.confidence,
            urgency: signal.urgency,
            current_instances: running,
            recommended_instances: recommended,
            metrics: current.clone(),
            prediction: predicted.cloned(),
            cost_impact: cost_impact(config, running, recommended),
            decided_at: now,
            cooldown_until: None,
        }
    }

    fn record(&self, decision: &ScalingDecision) {
        self.metrics.inc_decisions(&decision.action.to_string());
        if let Err(e) = self.journal.append(Table::Decisions, decision) {
            warn!(decision_id = decision.id, error = %e, "Failed to journal decision");
        }

        let cutoff = decision.decided_at - Duration::hours(HISTORY_WINDOW_HOURS);
        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
        history.push_back(decision.clone());
        while history.front().map_or(false, |d| d.decided_at < cutoff) {
            history.pop_front();
        }
    }
}

/// Run the stages in precedence order
fn evaluate(
    config: &ScalingConfig,
    current: &MetricSnapshot,
    predicted: Option<&PredictionInput>,
    now: DateTime<Utc>,
) -> Option<Signal> {
    let thresholds = &config.thresholds;
    let heuristics = &config.heuristics;

    rules::urgent(current, thresholds, heuristics)
        .or_else(|| rules::standard(current, thresholds, heuristics))
        .or_else(|| {
            predicted.and_then(|p| rules::predicted(current, p, &config.prediction, heuristics))
        })
        .or_else(|| rules::pattern(now, heuristics))
}

fn maintain_signal() -> Signal {
    Signal {
        action: ScalingAction::Maintain,
        reasons: Vec::new(),
        confidence: 0.0,
        urgency: 1,
    }
}

fn cooldown_for(config: &ScalingConfig, class: ActionClass) -> Duration {
    let secs = match class {
        ActionClass::Up => config.cooldowns.scale_up_secs,
        ActionClass::Down => config.cooldowns.scale_down_secs,
    };
    Duration::seconds(secs as i64)
}

fn cost_impact(config: &ScalingConfig, current: u32, recommended: u32) -> f64 {
    (recommended as f64 - current as f64) * config.launch_instance_cost()
}
