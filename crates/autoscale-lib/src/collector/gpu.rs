//! Accelerator metrics via nvidia-smi

use super::{GpuProbe, GpuReading};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use tokio::process::Command;

const QUERY: &str = "--query-gpu=utilization.gpu,memory.used,memory.total,temperature.gpu";

/// Reads the first GPU reported by `nvidia-smi`
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    binary: String,
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self {
            binary: "nvidia-smi".to_string(),
        }
    }
}

impl NvidiaSmiProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Parse `utilization, memory.used, memory.total, temperature` CSV output
    pub fn parse_csv(output: &str) -> Result<Option<GpuReading>> {
        let Some(line) = output.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Ok(None);
        };

        let fields: Vec<f64> = line
            .split(',')
            .map(|f| f.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("Unparseable nvidia-smi line: {}", line))?;
        if fields.len() < 4 {
            anyhow::bail!("Expected 4 fields from nvidia-smi, got {}", fields.len());
        }

        let memory_percent = if fields[2] > 0.0 {
            fields[1] / fields[2] * 100.0
        } else {
            0.0
        };
        Ok(Some(GpuReading {
            utilization: fields[0],
            memory_percent,
            temperature: fields[3],
        }))
    }
}

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    async fn read(&self) -> Result<Option<GpuReading>> {
        let output = match Command::new(&self.binary)
            .arg(QUERY)
            .arg("--format=csv,noheader,nounits")
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to run nvidia-smi"),
        };

        if !output.status.success() {
            anyhow::bail!("nvidia-smi exited with {}", output.status);
        }
        Self::parse_csv(&String::from_utf8_lossy(&output.stdout))
    }
}
