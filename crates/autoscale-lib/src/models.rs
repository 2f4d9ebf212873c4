//! Core data models for the autoscaler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One timestamped reading of every monitored metric
///
/// Created once per collection tick and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub queue_depth: u64,
    pub pending_requests: u64,
    pub active_tasks: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_gb: f64,
    pub gpu_utilization: Option<f64>,
    pub gpu_memory_percent: Option<f64>,
    pub gpu_temperature: Option<f64>,
    pub avg_response_ms: f64,
    pub p95_response_ms: f64,
    pub p99_response_ms: f64,
    pub completed_last_hour: u64,
    pub failed_last_hour: u64,
    pub success_rate: f64,
    pub network_mbps: f64,
    pub open_connections: u64,
    pub running_instances: u32,
    /// Most recent forecast of queue depth, if one was available
    pub predicted_load: Option<f64>,
}

impl MetricSnapshot {
    /// A snapshot with every source defaulted
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            queue_depth: 0,
            pending_requests: 0,
            active_tasks: 0,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_available_gb: 0.0,
            gpu_utilization: None,
            gpu_memory_percent: None,
            gpu_temperature: None,
            avg_response_ms: 0.0,
            p95_response_ms: 0.0,
            p99_response_ms: 0.0,
            completed_last_hour: 0,
            failed_last_hour: 0,
            success_rate: 100.0,
            network_mbps: 0.0,
            open_connections: 0,
            running_instances: 0,
            predicted_load: None,
        }
    }
}

/// Number of model inputs produced by [`FeatureVector::to_row`]
pub const FEATURE_COUNT: usize = 39;

/// Column names matching [`FeatureVector::to_row`]
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "queue_depth",
    "pending_requests",
    "active_tasks",
    "cpu_percent",
    "memory_percent",
    "memory_available_gb",
    "gpu_utilization",
    "gpu_memory_percent",
    "gpu_temperature",
    "avg_response_ms",
    "p95_response_ms",
    "p99_response_ms",
    "completed_last_hour",
    "failed_last_hour",
    "success_rate",
    "network_mbps",
    "open_connections",
    "running_instances",
    "queue_ma",
    "cpu_ma",
    "memory_ma",
    "response_ma",
    "queue_change",
    "active_change",
    "cpu_change",
    "memory_change",
    "hour",
    "day_of_week",
    "is_weekend",
    "is_business_hours",
    "composite_load",
    "gpu_composite",
    "processing_efficiency",
    "queue_zscore",
    "cpu_zscore",
    "memory_zscore",
    "queue_trend",
    "cpu_trend",
    "memory_trend",
];

/// Snapshot fields plus derived rolling and contextual signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub timestamp: DateTime<Utc>,
    pub queue_depth: f64,
    pub pending_requests: f64,
    pub active_tasks: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_gb: f64,
    pub gpu_utilization: f64,
    pub gpu_memory_percent: f64,
    pub gpu_temperature: f64,
    pub avg_response_ms: f64,
    pub p95_response_ms: f64,
    pub p99_response_ms: f64,
    pub completed_last_hour: f64,
    pub failed_last_hour: f64,
    pub success_rate: f64,
    pub network_mbps: f64,
    pub open_connections: f64,
    pub running_instances: f64,
    pub queue_ma: f64,
    pub cpu_ma: f64,
    pub memory_ma: f64,
    pub response_ma: f64,
    pub queue_change: f64,
    pub active_change: f64,
    pub cpu_change: f64,
    pub memory_change: f64,
    pub hour: f64,
    pub day_of_week: f64,
    pub is_weekend: f64,
    pub is_business_hours: f64,
    pub composite_load: f64,
    pub gpu_composite: f64,
    pub processing_efficiency: f64,
    pub queue_zscore: f64,
    pub cpu_zscore: f64,
    pub memory_zscore: f64,
    pub queue_trend: f64,
    pub cpu_trend: f64,
    pub memory_trend: f64,
}

impl FeatureVector {
    /// Flatten into a model input row, ordered as [`FEATURE_NAMES`]
    pub fn to_row(&self) -> Vec<f64> {
        vec![
            self.queue_depth,
            self.pending_requests,
            self.active_tasks,
            self.cpu_percent,
            self.memory_percent,
            self.memory_available_gb,
            self.gpu_utilization,
            self.gpu_memory_percent,
            self.gpu_temperature,
            self.avg_response_ms,
            self.p95_response_ms,
            self.p99_response_ms,
            self.completed_last_hour,
            self.failed_last_hour,
            self.success_rate,
            self.network_mbps,
            self.open_connections,
            self.running_instances,
            self.queue_ma,
            self.cpu_ma,
            self.memory_ma,
            self.response_ma,
            self.queue_change,
            self.active_change,
            self.cpu_change,
            self.memory_change,
            self.hour,
            self.day_of_week,
            self.is_weekend,
            self.is_business_hours,
            self.composite_load,
            self.gpu_composite,
            self.processing_efficiency,
            self.queue_zscore,
            self.cpu_zscore,
            self.memory_zscore,
            self.queue_trend,
            self.cpu_trend,
            self.memory_trend,
        ]
    }
}

/// A forecast awaiting comparison against the observed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: u64,
    pub predicted_value: f64,
    pub target_time: DateTime<Utc>,
    pub model: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub actual_value: Option<f64>,
    pub absolute_error: Option<f64>,
    pub percentage_error: Option<f64>,
    pub validated_at: Option<DateTime<Utc>>,
}

impl PredictionRecord {
    pub fn is_validated(&self) -> bool {
        self.validated_at.is_some()
    }
}

/// Scaling action chosen by the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    UrgentScaleUp,
    ScaleDown,
    Maintain,
}

/// Cooldown bucket an action belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    Up,
    Down,
}

impl ScalingAction {
    /// Cooldown class, `None` for maintain
    pub fn class(&self) -> Option<ActionClass> {
        match self {
            ScalingAction::ScaleUp | ScalingAction::UrgentScaleUp => Some(ActionClass::Up),
            ScalingAction::ScaleDown => Some(ActionClass::Down),
            ScalingAction::Maintain => None,
        }
    }

    pub fn is_scale_up(&self) -> bool {
        self.class() == Some(ActionClass::Up)
    }
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingAction::ScaleUp => write!(f, "scale_up"),
            ScalingAction::UrgentScaleUp => write!(f, "urgent_scale_up"),
            ScalingAction::ScaleDown => write!(f, "scale_down"),
            ScalingAction::Maintain => write!(f, "maintain"),
        }
    }
}

/// Why a decision was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingReason {
    HighCpu,
    HighMemory,
    HighQueue,
    HighResponseTime,
    PredictedLoadIncrease,
    CostOptimization,
    LowUtilization,
    PatternBased,
    ManualOverride,
}

/// Forecast handed to the decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub predicted_load: f64,
    pub confidence: f64,
    pub model: String,
}

/// Output of one decision cycle, consumed by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub id: u64,
    pub action: ScalingAction,
    pub reasons: Vec<ScalingReason>,
    pub confidence: f64,
    pub urgency: u8,
    pub current_instances: u32,
    pub recommended_instances: u32,
    pub metrics: MetricSnapshot,
    pub prediction: Option<PredictionInput>,
    /// Change in hourly spend if the recommendation is applied (USD/hour)
    pub cost_impact: f64,
    pub decided_at: DateTime<Utc>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Execution lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::RolledBack
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::InProgress => write!(f, "in_progress"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// A decision being carried out against the cloud provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingExecution {
    pub execution_id: String,
    pub decision_id: u64,
    pub action: ScalingAction,
    pub target_instances: u32,
    pub status: ExecutionStatus,
    pub created_instances: Vec<String>,
    pub terminated_instances: Vec<String>,
    pub load_balancer_updated: bool,
    pub rollback_performed: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Hourly cost change attributed to this execution (USD/hour)
    pub cost_estimate: f64,
}

/// Lifecycle state of a managed instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Terminated,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Pending => write!(f, "pending"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Terminated => write!(f, "terminated"),
        }
    }
}

/// One row per cloud instance under management; never deleted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub instance_type: String,
    pub state: InstanceState,
    pub launched_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub hourly_cost: f64,
    /// Execution that created the instance, if it was created by us
    pub execution_id: Option<String>,
}
