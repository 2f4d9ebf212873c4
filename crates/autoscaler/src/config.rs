//! Daemon configuration
//!
//! Layered from an optional TOML file (`AUTOSCALER_CONFIG`, default
//! `autoscaler.toml`) and `AUTOSCALER__`-prefixed environment variables,
//! e.g. `AUTOSCALER__SCALING__COST_LIMIT_PER_HOUR=5`.

use anyhow::{Context, Result};
use autoscale_lib::config::ScalingConfig;
use serde::Deserialize;
use std::path::PathBuf;

const CONFIG_PATH_ENV: &str = "AUTOSCALER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "autoscaler.toml";

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Port of the status/control API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Metrics collection interval in seconds
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,

    /// Journal directory; persistence is off when unset
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,

    /// Where trained models are saved and loaded
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// Alternate procfs root for the host probe
    #[serde(default)]
    pub proc_path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub gpu_probe: bool,

    #[serde(default = "default_nvidia_smi")]
    pub nvidia_smi: String,

    #[serde(default)]
    pub simulated_cloud: SimulatedCloudConfig,

    #[serde(default)]
    pub scaling: ScalingConfig,
}

/// Settings of the in-process cloud provider
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedCloudConfig {
    #[serde(default = "default_boot_latency")]
    pub boot_latency_secs: u64,

    /// Managed instances present at startup
    #[serde(default = "default_initial_instances")]
    pub initial_instances: usize,
}

impl Default for SimulatedCloudConfig {
    fn default() -> Self {
        Self {
            boot_latency_secs: default_boot_latency(),
            initial_instances: default_initial_instances(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_collection_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_nvidia_smi() -> String {
    "nvidia-smi".to_string()
}

fn default_boot_latency() -> u64 {
    5
}

fn default_initial_instances() -> usize {
    1
}

impl DaemonConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load with `path` as the (optional) config file
    pub fn load_from(path: &str) -> Result<Self> {
        let config: DaemonConfig = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("AUTOSCALER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config
            .scaling
            .validate()
            .context("Invalid scaling configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = DaemonConfig::load_from("/nonexistent/autoscaler").unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.collection_interval_secs, 60);
        assert!(config.journal_dir.is_none());
        assert_eq!(config.simulated_cloud.initial_instances, 1);
        assert_eq!(config.scaling.cost_limit_per_hour, 10.0);
    }

    #[test]
    fn test_file_overrides_nested_scaling_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoscaler.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
api_port = 9100
journal_dir = "/var/lib/autoscaler"

[scaling]
region = "eu-central-1"
cost_limit_per_hour = 4.5

[scaling.cooldowns]
scale_up_secs = 300
scale_down_secs = 900
"#
        )
        .unwrap();

        let config = DaemonConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.journal_dir, Some(PathBuf::from("/var/lib/autoscaler")));
        assert_eq!(config.scaling.region, "eu-central-1");
        assert_eq!(config.scaling.cost_limit_per_hour, 4.5);
        assert_eq!(config.scaling.cooldowns.scale_up_secs, 300);
        assert_eq!(config.scaling.max_instances, 10);
    }

    #[test]
    fn test_invalid_scaling_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[scaling]\nmonitoring_interval_secs = 5\n").unwrap();

        assert!(DaemonConfig::load_from(path.to_str().unwrap()).is_err());
    }
}
