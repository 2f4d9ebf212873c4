//! Scaling configuration
//!
//! Every tunable of the control loop lives in [`ScalingConfig`]. Sections
//! deserialize independently with defaults so a partial file or a handful
//! of environment variables is enough to configure a deployment.
//!
//! Runtime changes go through [`ConfigUpdate`], which only accepts the
//! recognized options and is validated before it replaces the live config.

use crate::accuracy::TrackerConfig;
use crate::error::ConfigError;
use crate::predictor::PredictorConfig;
use crate::timeseries::TimeSeriesConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Hard ceiling on managed instances, independent of configuration
pub const MAX_INSTANCES_CEILING: u32 = 10;

/// Lowest accepted monitoring interval
pub const MIN_MONITORING_INTERVAL_SECS: u64 = 30;

/// Lowest accepted hourly cost cap
pub const MIN_COST_LIMIT_PER_HOUR: f64 = 1.0;

/// Hourly cost assumed for instance types missing from the cost table
pub const FALLBACK_INSTANCE_COST: f64 = 0.05;

/// Complete configuration of the autoscaling subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,

    #[serde(default = "default_true")]
    pub auto_scaling_enabled: bool,

    /// Hourly spend ceiling in USD
    #[serde(default = "default_cost_limit")]
    pub cost_limit_per_hour: f64,

    #[serde(default = "default_max_instances")]
    pub max_instances: u32,

    #[serde(default)]
    pub thresholds: ScalingThresholds,

    #[serde(default)]
    pub prediction: PredictionThresholds,

    #[serde(default)]
    pub cooldowns: Cooldowns,

    #[serde(default)]
    pub heuristics: DecisionHeuristics,

    /// Instance type to hourly cost (USD)
    #[serde(default = "default_instance_costs")]
    pub instance_costs: BTreeMap<String, f64>,

    #[serde(default)]
    pub launch: LaunchTemplate,

    #[serde(default)]
    pub load_balancer: LoadBalancerTarget,

    #[serde(default)]
    pub executor: ExecutorTimings,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub timeseries: TimeSeriesConfig,

    #[serde(default)]
    pub predictor: PredictorConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_monitoring_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_cost_limit() -> f64 {
    10.0
}

fn default_max_instances() -> u32 {
    MAX_INSTANCES_CEILING
}

fn default_instance_costs() -> BTreeMap<String, f64> {
    [
        ("t3.medium", 0.0464),
        ("t3.large", 0.0928),
        ("t3.xlarge", 0.1856),
        ("g4dn.xlarge", 0.526),
        ("g4dn.2xlarge", 1.052),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            monitoring_interval_secs: default_monitoring_interval(),
            auto_scaling_enabled: true,
            cost_limit_per_hour: default_cost_limit(),
            max_instances: default_max_instances(),
            thresholds: ScalingThresholds::default(),
            prediction: PredictionThresholds::default(),
            cooldowns: Cooldowns::default(),
            heuristics: DecisionHeuristics::default(),
            instance_costs: default_instance_costs(),
            launch: LaunchTemplate::default(),
            load_balancer: LoadBalancerTarget::default(),
            executor: ExecutorTimings::default(),
            schedule: ScheduleConfig::default(),
            timeseries: TimeSeriesConfig::default(),
            predictor: PredictorConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

/// Per-metric limits for one threshold level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThresholds {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub queue_length: f64,
    pub response_time_ms: f64,
}

/// Urgent, scale-up and scale-down limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingThresholds {
    pub scale_up: MetricThresholds,
    pub urgent: MetricThresholds,
    pub scale_down: MetricThresholds,
}

impl Default for ScalingThresholds {
    fn default() -> Self {
        Self {
            scale_up: MetricThresholds {
                cpu_percent: 75.0,
                memory_percent: 80.0,
                queue_length: 10.0,
                response_time_ms: 3000.0,
            },
            urgent: MetricThresholds {
                cpu_percent: 90.0,
                memory_percent: 95.0,
                queue_length: 25.0,
                response_time_ms: 5000.0,
            },
            scale_down: MetricThresholds {
                cpu_percent: 30.0,
                memory_percent: 40.0,
                queue_length: 2.0,
                response_time_ms: 1000.0,
            },
        }
    }
}

impl ScalingThresholds {
    fn validate(&self) -> Result<(), ConfigError> {
        let levels = [
            (
                "cpu_percent",
                self.scale_down.cpu_percent,
                self.scale_up.cpu_percent,
                self.urgent.cpu_percent,
            ),
            (
                "memory_percent",
                self.scale_down.memory_percent,
                self.scale_up.memory_percent,
                self.urgent.memory_percent,
            ),
            (
                "queue_length",
                self.scale_down.queue_length,
                self.scale_up.queue_length,
                self.urgent.queue_length,
            ),
            (
                "response_time_ms",
                self.scale_down.response_time_ms,
                self.scale_up.response_time_ms,
                self.urgent.response_time_ms,
            ),
        ];

        for (metric, down, up, urgent) in levels {
            if down < 0.0 || !down.is_finite() || !up.is_finite() || !urgent.is_finite() {
                return Err(ConfigError::OutOfRange {
                    field: metric,
                    value: down,
                    reason: "thresholds must be finite and non-negative",
                });
            }
            if !(down < up && up <= urgent) {
                return Err(ConfigError::InconsistentThresholds { metric });
            }
        }
        Ok(())
    }
}

/// Limits for forecast-driven decisions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionThresholds {
    /// Minimum forecast confidence to act on a predicted increase
    pub confidence_threshold: f64,
    /// Predicted/current ratio that signals a scale-up
    pub load_multiplier: f64,
    /// Current load below which predicted decreases are ignored
    pub scale_down_min_load: f64,
}

impl Default for PredictionThresholds {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            load_multiplier: 1.5,
            scale_down_min_load: 5.0,
        }
    }
}

/// Suppression windows after a decision, per action class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cooldowns {
    pub scale_up_secs: u64,
    pub scale_down_secs: u64,
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self {
            scale_up_secs: 10 * 60,
            scale_down_secs: 30 * 60,
        }
    }
}

/// Heuristic point values attached to decisions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionHeuristics {
    pub urgent_confidence: f64,
    pub urgent_urgency: u8,
    pub standard_urgency: u8,
    pub prediction_urgency: u8,
    pub pattern_urgency: u8,
    /// Weighted overage score that triggers a standard scale-up
    pub scale_up_score: f64,
    /// Metrics at or below scale-down thresholds required to scale down
    pub scale_down_votes: usize,
    /// Instance count a standard scale-up never exceeds
    pub scale_up_cap: u32,
    pub pre_business_confidence: f64,
    pub night_confidence: f64,
    pub weekend_confidence: f64,
    /// Offset from UTC used for time-of-day rules
    pub pattern_utc_offset_minutes: i32,
}

impl Default for DecisionHeuristics {
    fn default() -> Self {
        Self {
            urgent_confidence: 0.95,
            urgent_urgency: 10,
            standard_urgency: 5,
            prediction_urgency: 3,
            pattern_urgency: 2,
            scale_up_score: 1.5,
            scale_down_votes: 3,
            scale_up_cap: 8,
            pre_business_confidence: 0.6,
            night_confidence: 0.5,
            weekend_confidence: 0.4,
            pattern_utc_offset_minutes: 0,
        }
    }
}

/// Parameters for new instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchTemplate {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub subnet_id: String,
    pub user_data: String,
    #[serde(default)]
    pub extra_tags: BTreeMap<String, String>,
}

impl Default for LaunchTemplate {
    fn default() -> Self {
        Self {
            image_id: "ami-0c94855ba95b798c7".to_string(),
            instance_type: "t3.large".to_string(),
            key_name: "pipeline-worker-key".to_string(),
            security_group_ids: vec!["sg-default".to_string()],
            subnet_id: "subnet-default".to_string(),
            user_data: String::new(),
            extra_tags: BTreeMap::new(),
        }
    }
}

/// Load balancer target group receiving managed instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerTarget {
    pub target_group: String,
    pub port: u16,
}

impl Default for LoadBalancerTarget {
    fn default() -> Self {
        Self {
            target_group: "pipeline-workers".to_string(),
            port: 80,
        }
    }
}

/// Timing of provider interactions during an execution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutorTimings {
    pub poll_interval_ms: u64,
    pub running_timeout_ms: u64,
    pub drain_grace_ms: u64,
}

impl Default for ExecutorTimings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            running_timeout_ms: 300_000,
            drain_grace_ms: 30_000,
        }
    }
}

impl ExecutorTimings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn running_timeout(&self) -> Duration {
        Duration::from_millis(self.running_timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

/// Cadence of the slower activities inside the monitoring loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub training_interval_hours: u64,
    pub prediction_interval_minutes: u64,
    pub accuracy_check_interval_hours: u64,
    pub event_retention_hours: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            training_interval_hours: 24,
            prediction_interval_minutes: 60,
            accuracy_check_interval_hours: 6,
            event_retention_hours: 48,
        }
    }
}

impl ScalingConfig {
    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_secs)
    }

    /// Hourly cost of one instance of the given type
    pub fn instance_cost(&self, instance_type: &str) -> f64 {
        self.instance_costs
            .get(instance_type)
            .copied()
            .unwrap_or(FALLBACK_INSTANCE_COST)
    }

    /// Hourly cost of one instance of the launch type
    pub fn launch_instance_cost(&self) -> f64 {
        self.instance_cost(&self.launch.instance_type)
    }

    /// Check every invariant the control loop relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitoring_interval_secs < MIN_MONITORING_INTERVAL_SECS {
            return Err(ConfigError::OutOfRange {
                field: "monitoring_interval_secs",
                value: self.monitoring_interval_secs as f64,
                reason: "must be at least 30 seconds",
            });
        }
        if !(self.cost_limit_per_hour >= MIN_COST_LIMIT_PER_HOUR) {
            return Err(ConfigError::OutOfRange {
                field: "cost_limit_per_hour",
                value: self.cost_limit_per_hour,
                reason: "must be at least 1.0",
            });
        }
        if self.max_instances == 0 || self.max_instances > MAX_INSTANCES_CEILING {
            return Err(ConfigError::OutOfRange {
                field: "max_instances",
                value: self.max_instances as f64,
                reason: "must be between 1 and 10",
            });
        }
        self.thresholds.validate()?;

        let p = &self.prediction;
        if !(p.confidence_threshold > 0.0 && p.confidence_threshold <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "prediction.confidence_threshold",
                value: p.confidence_threshold,
                reason: "must be in (0, 1]",
            });
        }
        if !(p.load_multiplier > 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "prediction.load_multiplier",
                value: p.load_multiplier,
                reason: "must be greater than 1.0",
            });
        }
        if self.heuristics.scale_down_votes == 0 || self.heuristics.scale_down_votes > 4 {
            return Err(ConfigError::OutOfRange {
                field: "heuristics.scale_down_votes",
                value: self.heuristics.scale_down_votes as f64,
                reason: "must be between 1 and 4",
            });
        }
        if self.instance_costs.values().any(|c| !(*c >= 0.0)) {
            return Err(ConfigError::OutOfRange {
                field: "instance_costs",
                value: -1.0,
                reason: "costs must be non-negative",
            });
        }
        Ok(())
    }

    /// Produce a new configuration with `update` applied
    ///
    /// Returns the new config and the names of the sections that changed.
    /// The receiver is left untouched so a rejected update keeps the prior
    /// configuration in force.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<(ScalingConfig, Vec<&'static str>), ConfigError> {
        let mut next = self.clone();
        let mut changed = Vec::new();

        if let Some(interval) = update.monitoring_interval_secs {
            next.monitoring_interval_secs = interval.max(MIN_MONITORING_INTERVAL_SECS);
            changed.push("monitoring_interval_secs");
        }
        if let Some(enabled) = update.auto_scaling_enabled {
            next.auto_scaling_enabled = enabled;
            changed.push("auto_scaling_enabled");
        }
        if let Some(limit) = update.cost_limit_per_hour {
            if !limit.is_finite() {
                return Err(ConfigError::OutOfRange {
                    field: "cost_limit_per_hour",
                    value: limit,
                    reason: "must be finite",
                });
            }
            next.cost_limit_per_hour = limit.max(MIN_COST_LIMIT_PER_HOUR);
            changed.push("cost_limit_per_hour");
        }
        if let Some(thresholds) = &update.thresholds {
            thresholds.scale_up.apply_to(&mut next.thresholds.scale_up);
            thresholds.urgent.apply_to(&mut next.thresholds.urgent);
            thresholds.scale_down.apply_to(&mut next.thresholds.scale_down);
            changed.push("thresholds");
        }
        if let Some(prediction) = &update.prediction {
            if let Some(v) = prediction.confidence_threshold {
                next.prediction.confidence_threshold = v;
            }
            if let Some(v) = prediction.load_multiplier {
                next.prediction.load_multiplier = v;
            }
            changed.push("prediction");
        }
        if let Some(cooldowns) = &update.cooldowns {
            if let Some(v) = cooldowns.scale_up_secs {
                next.cooldowns.scale_up_secs = v;
            }
            if let Some(v) = cooldowns.scale_down_secs {
                next.cooldowns.scale_down_secs = v;
            }
            changed.push("cooldowns");
        }

        next.validate()?;
        Ok((next, changed))
    }
}

/// Partial runtime configuration change
///
/// Unknown keys are rejected when deserializing, which makes the set of
/// recognized options explicit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scaling_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_limit_per_hour: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<ThresholdsUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldowns: Option<CooldownsUpdate>,
}

impl ConfigUpdate {
    /// Parse an update, mapping unrecognized keys to a configuration error
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| {
            let message = e.to_string();
            let field = message
                .split('`')
                .nth(1)
                .map(str::to_string)
                .unwrap_or(message);
            ConfigError::UnknownOption(field)
        })
    }

    pub fn is_empty(&self) -> bool {
        self == &ConfigUpdate::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdsUpdate {
    #[serde(default)]
    pub scale_up: MetricThresholdsUpdate,
    #[serde(default)]
    pub urgent: MetricThresholdsUpdate,
    #[serde(default)]
    pub scale_down: MetricThresholdsUpdate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricThresholdsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
}

impl MetricThresholdsUpdate {
    fn apply_to(&self, target: &mut MetricThresholds) {
        if let Some(v) = self.cpu_percent {
            target.cpu_percent = v;
        }
        if let Some(v) = self.memory_percent {
            target.memory_percent = v;
        }
        if let Some(v) = self.queue_length {
            target.queue_length = v;
        }
        if let Some(v) = self.response_time_ms {
            target.response_time_ms = v;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_multiplier: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CooldownsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScalingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.monitoring_interval_secs, 60);
        assert_eq!(config.cost_limit_per_hour, 10.0);
        assert_eq!(config.thresholds.urgent.cpu_percent, 90.0);
        assert_eq!(config.cooldowns.scale_down_secs, 1800);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: ScalingConfig =
            serde_json::from_value(json!({ "region": "eu-west-1", "cost_limit_per_hour": 4.0 }))
                .unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.cost_limit_per_hour, 4.0);
        assert_eq!(config.max_instances, 10);
        assert_eq!(config.launch_instance_cost(), 0.0928);
    }

    #[test]
    fn test_unknown_instance_type_uses_fallback_cost() {
        let config = ScalingConfig::default();
        assert_eq!(config.instance_cost("m9.huge"), FALLBACK_INSTANCE_COST);
    }

    #[test]
    fn test_apply_clamps_interval_and_cost() {
        let config = ScalingConfig::default();
        let update = ConfigUpdate {
            monitoring_interval_secs: Some(5),
            cost_limit_per_hour: Some(0.25),
            ..Default::default()
        };

        let (next, changed) = config.apply(&update).unwrap();
        assert_eq!(next.monitoring_interval_secs, 30);
        assert_eq!(next.cost_limit_per_hour, 1.0);
        assert_eq!(changed, vec!["monitoring_interval_secs", "cost_limit_per_hour"]);
    }

    #[test]
    fn test_apply_rejects_inconsistent_thresholds() {
        let config = ScalingConfig::default();
        let update = ConfigUpdate::from_json(json!({
            "thresholds": { "scale_down": { "cpu_percent": 80.0 } }
        }))
        .unwrap();

        let err = config.apply(&update).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InconsistentThresholds {
                metric: "cpu_percent"
            }
        );
        // Receiver unchanged
        assert_eq!(config.thresholds.scale_down.cpu_percent, 30.0);
    }

    #[test]
    fn test_apply_threshold_override() {
        let config = ScalingConfig::default();
        let update = ConfigUpdate::from_json(json!({
            "thresholds": { "scale_up": { "queue_length": 15.0 } },
            "prediction": { "confidence_threshold": 0.8 }
        }))
        .unwrap();

        let (next, changed) = config.apply(&update).unwrap();
        assert_eq!(next.thresholds.scale_up.queue_length, 15.0);
        assert_eq!(next.thresholds.scale_up.cpu_percent, 75.0);
        assert_eq!(next.prediction.confidence_threshold, 0.8);
        assert_eq!(changed, vec!["thresholds", "prediction"]);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = ConfigUpdate::from_json(json!({ "max_budget": 3 })).unwrap_err();
        assert_eq!(err, ConfigError::UnknownOption("max_budget".to_string()));

        let err = ConfigUpdate::from_json(json!({
            "thresholds": { "urgent": { "gpu_percent": 3 } }
        }))
        .unwrap_err();
        assert_eq!(err, ConfigError::UnknownOption("gpu_percent".to_string()));
    }

    #[test]
    fn test_invalid_prediction_values() {
        let mut config = ScalingConfig::default();
        config.prediction.load_multiplier = 0.9;
        assert!(config.validate().is_err());

        let mut config = ScalingConfig::default();
        config.prediction.confidence_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_instances_bounded_by_ceiling() {
        let mut config = ScalingConfig::default();
        config.max_instances = 11;
        assert!(config.validate().is_err());
        config.max_instances = 0;
        assert!(config.validate().is_err());
    }
}
