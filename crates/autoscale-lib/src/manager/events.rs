//! Time-windowed log of scaling events

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DecisionMade,
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    CostLimitExceeded,
    ManualScaling,
    ManualScalingFailed,
    ConfigurationUpdated,
    ModelTrained,
    CycleError,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::DecisionMade => "decision_made",
            EventKind::ExecutionStarted => "execution_started",
            EventKind::ExecutionCompleted => "execution_completed",
            EventKind::ExecutionFailed => "execution_failed",
            EventKind::CostLimitExceeded => "cost_limit_exceeded",
            EventKind::ManualScaling => "manual_scaling",
            EventKind::ManualScalingFailed => "manual_scaling_failed",
            EventKind::ConfigurationUpdated => "configuration_updated",
            EventKind::ModelTrained => "model_trained",
            EventKind::CycleError => "cycle_error",
        };
        f.write_str(name)
    }
}

/// One entry of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Full context of the event (decision, execution, error text)
    pub details: serde_json::Value,
}

/// In-memory event log bounded by age
#[derive(Debug)]
pub struct EventLog {
    retention: Duration,
    events: RwLock<VecDeque<ScalingEvent>>,
    next_id: AtomicU64,
}

impl EventLog {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            events: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn record(
        &self,
        kind: EventKind,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> ScalingEvent {
        self.record_at(kind, message, details, Utc::now())
    }

    pub fn record_at(
        &self,
        kind: EventKind,
        message: impl Into<String>,
        details: serde_json::Value,
        at: DateTime<Utc>,
    ) -> ScalingEvent {
        let event = ScalingEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            kind,
            timestamp: at,
            message: message.into(),
            details,
        };
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(event.clone());
        event
    }

    /// Drop events older than the retention window; returns how many
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        before - events.len()
    }

    /// The most recent `limit` events, newest first
    pub fn recent(&self, limit: usize) -> Vec<ScalingEvent> {
        self.since(None, limit)
    }

    /// Events at or after `since`, newest first, at most `limit`
    pub fn since(&self, since: Option<DateTime<Utc>>, limit: usize) -> Vec<ScalingEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .filter(|e| since.map_or(true, |s| e.timestamp >= s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent event of `kind`
    pub fn last_of(&self, kind: EventKind) -> Option<ScalingEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
