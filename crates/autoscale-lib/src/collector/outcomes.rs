//! Rolling window of request outcomes

use crate::stats;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::trace;

/// Outcomes older than this fall out of every summary
pub const DEFAULT_OUTCOME_WINDOW: std::time::Duration = std::time::Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: DateTime<Utc>,
    latency_ms: f64,
    success: bool,
}

/// Latency and success figures over the window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub avg_response_ms: f64,
    pub p95_response_ms: f64,
    pub p99_response_ms: f64,
    pub completed: u64,
    pub failed: u64,
    /// Percent of successful requests; 100 when the window is empty
    pub success_rate: f64,
}

impl Default for OutcomeSummary {
    fn default() -> Self {
        Self {
            avg_response_ms: 0.0,
            p95_response_ms: 0.0,
            p99_response_ms: 0.0,
            completed: 0,
            failed: 0,
            success_rate: 100.0,
        }
    }
}

/// Thread-safe trailing window of request outcomes
#[derive(Debug)]
pub struct OutcomeWindow {
    window: Duration,
    outcomes: Mutex<VecDeque<Outcome>>,
}

impl OutcomeWindow {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::hours(1)),
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, endpoint: &str, latency_ms: f64, success: bool) {
        self.record_at(endpoint, latency_ms, success, Utc::now());
    }

    pub fn record_at(&self, endpoint: &str, latency_ms: f64, success: bool, at: DateTime<Utc>) {
        trace!(endpoint = %endpoint, latency_ms, success, "Recorded request outcome");
        let mut outcomes = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        outcomes.push_back(Outcome {
            at,
            latency_ms: latency_ms.max(0.0),
            success,
        });
        Self::evict(&mut outcomes, at - self.window);
    }

    pub fn summary(&self) -> OutcomeSummary {
        self.summary_at(Utc::now())
    }

    pub fn summary_at(&self, now: DateTime<Utc>) -> OutcomeSummary {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict(&mut outcomes, now - self.window);
        if outcomes.is_empty() {
            return OutcomeSummary::default();
        }

        let latencies: Vec<f64> = outcomes.iter().map(|o| o.latency_ms).collect();
        let completed = outcomes.iter().filter(|o| o.success).count() as u64;
        let failed = outcomes.len() as u64 - completed;

        OutcomeSummary {
            avg_response_ms: stats::mean(&latencies),
            p95_response_ms: stats::percentile(&latencies, 0.95),
            p99_response_ms: stats::percentile(&latencies, 0.99),
            completed,
            failed,
            success_rate: completed as f64 / outcomes.len() as f64 * 100.0,
        }
    }

    fn evict(outcomes: &mut VecDeque<Outcome>, cutoff: DateTime<Utc>) {
        while outcomes.front().is_some_and(|o| o.at < cutoff) {
            outcomes.pop_front();
        }
    }
}
