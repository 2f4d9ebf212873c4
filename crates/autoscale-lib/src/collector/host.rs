//! Host metrics from procfs
//!
//! Reads:
//! - /proc/stat for aggregate CPU time
//! - /proc/meminfo for total and available memory
//! - /proc/net/dev for interface byte counters
//! - /proc/net/tcp and tcp6 for established connections

use super::{HostProbe, MemoryReading};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

/// TCP state code for ESTABLISHED in /proc/net/tcp
const TCP_ESTABLISHED: &str = "01";

/// Aggregate CPU counters from the first line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

/// Host probe backed by procfs
pub struct ProcHostProbe {
    proc_path: PathBuf,
    previous_cpu: Mutex<Option<CpuTimes>>,
}

impl Default for ProcHostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcHostProbe {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create probe with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            previous_cpu: Mutex::new(None),
        }
    }

    /// Parse the aggregate `cpu` line of /proc/stat
    ///
    /// Idle time includes iowait.
    pub fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu "))
            .context("No aggregate cpu line in /proc/stat")?;

        let values: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if values.len() < 4 {
            anyhow::bail!("Truncated cpu line in /proc/stat");
        }

        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        Ok(CpuTimes {
            total: values.iter().sum(),
            idle,
        })
    }

    /// Utilisation between two readings; with no previous reading the
    /// cumulative figure since boot is used
    pub fn cpu_percent_between(previous: Option<CpuTimes>, current: CpuTimes) -> f64 {
        let (total, idle) = match previous {
            Some(prev) if current.total > prev.total => (
                current.total - prev.total,
                current.idle.saturating_sub(prev.idle),
            ),
            Some(_) => return 0.0,
            None => (current.total, current.idle),
        };
        if total == 0 {
            return 0.0;
        }
        ((1.0 - idle as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
    }

    /// Parse /proc/meminfo into usage percent and available gigabytes
    pub fn parse_meminfo(content: &str) -> Result<MemoryReading> {
        let mut total_kb = None;
        let mut available_kb = None;

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                match parts[0] {
                    "MemTotal:" => total_kb = parts[1].parse::<u64>().ok(),
                    "MemAvailable:" => available_kb = parts[1].parse::<u64>().ok(),
                    _ => {}
                }
            }
        }

        let total_kb = total_kb.context("MemTotal missing from /proc/meminfo")?;
        let available_kb = available_kb.context("MemAvailable missing from /proc/meminfo")?;
        if total_kb == 0 {
            anyhow::bail!("MemTotal is zero");
        }

        let used = total_kb.saturating_sub(available_kb);
        Ok(MemoryReading {
            percent: used as f64 / total_kb as f64 * 100.0,
            available_gb: available_kb as f64 / (1024.0 * 1024.0),
        })
    }

    /// Sum received and transmitted bytes over every non-loopback interface
    pub fn parse_net_dev(content: &str) -> u64 {
        content
            .lines()
            .filter_map(|line| line.split_once(':'))
            .filter(|(iface, _)| iface.trim() != "lo")
            .map(|(_, counters)| {
                let fields: Vec<u64> = counters
                    .split_whitespace()
                    .map(|v| v.parse().unwrap_or(0))
                    .collect();
                // Column 0 is rx_bytes, column 8 is tx_bytes
                fields.first().copied().unwrap_or(0) + fields.get(8).copied().unwrap_or(0)
            })
            .sum()
    }

    /// Count ESTABLISHED sockets in a /proc/net/tcp style table
    pub fn count_established(content: &str) -> u64 {
        content
            .lines()
            .skip(1)
            .filter(|line| line.split_whitespace().nth(3) == Some(TCP_ESTABLISHED))
            .count() as u64
    }

    async fn read(&self, relative: &str) -> Result<String> {
        let path = self.proc_path.join(relative);
        read_file(&path).await
    }
}

async fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

#[async_trait]
impl HostProbe for ProcHostProbe {
    async fn cpu_percent(&self) -> Result<f64> {
        let current = Self::parse_cpu_times(&self.read("stat").await?)?;
        let mut previous = self.previous_cpu.lock().unwrap_or_else(|e| e.into_inner());
        let percent = Self::cpu_percent_between(*previous, current);
        *previous = Some(current);
        Ok(percent)
    }

    async fn memory(&self) -> Result<MemoryReading> {
        Self::parse_meminfo(&self.read("meminfo").await?)
    }

    async fn network_bytes(&self) -> Result<u64> {
        Ok(Self::parse_net_dev(&self.read("net/dev").await?))
    }

    async fn open_connections(&self) -> Result<u64> {
        let v4 = self.read("net/tcp").await?;
        // tcp6 is absent when IPv6 is disabled
        let v6 = self.read("net/tcp6").await.unwrap_or_default();
        Ok(Self::count_established(&v4) + Self::count_established(&v6))
    }
}
