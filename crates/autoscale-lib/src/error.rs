//! Error types for the autoscaling subsystem
//!
//! Genuine failures are typed errors. "Not enough data yet" conditions are
//! never errors; they are reported through `Option` or dedicated enum
//! variants on the component that produces them.

use thiserror::Error;

/// Result alias used by the public component APIs
pub type Result<T> = std::result::Result<T, ScalingError>;

/// Top-level error for every public operation of the subsystem
#[derive(Debug, Error)]
pub enum ScalingError {
    /// Invalid configuration or configuration update
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Request exceeds a hard safety ceiling; rejected before any cloud call
    #[error("safety limit exceeded: {0}")]
    SafetyLimit(String),

    /// Request would exceed the allowed hourly spend
    #[error("estimated cost ${estimated:.2}/hour exceeds limit ${limit:.2}/hour")]
    CostLimit { estimated: f64, limit: f64 },

    /// Cloud provider call failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Instances did not reach the running state in time
    #[error("timed out after {waited_secs}s waiting for instances {instance_ids:?}")]
    Timeout {
        instance_ids: Vec<String>,
        waited_secs: u64,
    },

    /// Execution ended in a terminal failure
    #[error("execution {execution_id} failed: {message}")]
    Execution {
        execution_id: String,
        message: String,
    },

    #[error(transparent)]
    Predictor(#[from] PredictorError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("scaling manager is already running")]
    AlreadyRunning,

    #[error("scaling manager is not running")]
    NotRunning,
}

/// Configuration validation failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unrecognized configuration option: {0}")]
    UnknownOption(String),

    #[error("{field} = {value} is out of range: {reason}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("thresholds for {metric} must satisfy scale_down < scale_up <= urgent")]
    InconsistentThresholds { metric: &'static str },
}

/// Errors returned by a cloud provider implementation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Timeouts, throttling and other retryable API failures
    #[error("transient provider error during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("provider rejected {operation}: {message}")]
    Rejected { operation: String, message: String },
}

impl ProviderError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if the call may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }
}

/// Predictor failures that are not data insufficiency
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("feature row has {actual} columns, model expects {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("feature rows ({rows}) and targets ({targets}) differ in length")]
    LengthMismatch { rows: usize, targets: usize },

    #[error("model was trained for horizon {trained}, requested {requested}")]
    HorizonMismatch { trained: usize, requested: usize },

    #[error("model checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("model persistence failed: {0}")]
    Persistence(String),

    #[error("{model} produced a non-finite forecast")]
    NonFiniteForecast { model: String },
}

/// Journal I/O failures
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode journal record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::transient("create", "throttled").is_transient());
        assert!(!ProviderError::rejected("create", "quota").is_transient());
        assert!(!ProviderError::NotFound("i-1".into()).is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = ScalingError::CostLimit {
            estimated: 25.0,
            limit: 20.0,
        };
        assert_eq!(
            err.to_string(),
            "estimated cost $25.00/hour exceeds limit $20.00/hour"
        );

        let err: ScalingError = ConfigError::InconsistentThresholds { metric: "cpu" }.into();
        assert!(err.to_string().contains("cpu"));
    }
}
