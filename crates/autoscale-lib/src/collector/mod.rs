//! Metrics collection for the scaling loop
//!
//! A [`MetricsCollector`] samples host, accelerator and workload counters
//! through pluggable probes and folds in a rolling window of request
//! outcomes. Each probe may fail independently; a failed probe leaves its
//! fields at their defaults and never aborts the snapshot.

mod gpu;
mod host;
mod r#loop;
mod outcomes;
mod workload;


pub use gpu::NvidiaSmiProbe;
pub use host::ProcHostProbe;
pub use outcomes::{OutcomeSummary, OutcomeWindow, DEFAULT_OUTCOME_WINDOW};
pub use r#loop::{CollectionConfig, CollectionLoop, CollectionLoopBuilder};
pub use workload::WorkloadGauge;

use crate::models::MetricSnapshot;
use crate::observability::ScalerMetrics;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::debug;

/// Memory reading from the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    pub percent: f64,
    pub available_gb: f64,
}

/// Reading from the first accelerator on the host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    pub utilization: f64,
    pub memory_percent: f64,
    pub temperature: f64,
}

/// Queue and task counts reported by the workload subsystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadReading {
    pub queue_depth: u64,
    pub pending_requests: u64,
    pub active_tasks: u64,
}

/// Host-level counters
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// CPU utilisation since the previous call, in percent
    async fn cpu_percent(&self) -> Result<f64>;

    async fn memory(&self) -> Result<MemoryReading>;

    /// Cumulative received plus transmitted bytes across interfaces
    async fn network_bytes(&self) -> Result<u64>;

    /// Number of established TCP connections
    async fn open_connections(&self) -> Result<u64>;
}

/// Accelerator inventory
#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// `Ok(None)` when the host has no accelerator
    async fn read(&self) -> Result<Option<GpuReading>>;
}

/// Queue state of the workload being scaled
#[async_trait]
pub trait WorkloadProbe: Send + Sync {
    async fn read(&self) -> Result<WorkloadReading>;
}

/// Values owned by other components that are stamped onto each snapshot
#[derive(Debug, Default)]
pub struct ControlSignals {
    running_instances: AtomicU32,
    predicted_load: Mutex<Option<f64>>,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running_instances(&self, count: u32) {
        self.running_instances.store(count, Ordering::SeqCst);
    }

    pub fn running_instances(&self) -> u32 {
        self.running_instances.load(Ordering::SeqCst)
    }

    pub fn set_predicted_load(&self, value: Option<f64>) {
        *self.predicted_load.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    pub fn predicted_load(&self) -> Option<f64> {
        *self.predicted_load.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Samples every metric source into a [`MetricSnapshot`]
pub struct MetricsCollector {
    host: Arc<dyn HostProbe>,
    gpu: Option<Arc<dyn GpuProbe>>,
    workload: Arc<dyn WorkloadProbe>,
    outcomes: OutcomeWindow,
    signals: Arc<ControlSignals>,
    last_network: Mutex<Option<(DateTime<Utc>, u64)>>,
    metrics: ScalerMetrics,
}

impl MetricsCollector {
    pub fn new(
        host: Arc<dyn HostProbe>,
        gpu: Option<Arc<dyn GpuProbe>>,
        workload: Arc<dyn WorkloadProbe>,
        signals: Arc<ControlSignals>,
    ) -> Self {
        Self {
            host,
            gpu,
            workload,
            outcomes: OutcomeWindow::new(DEFAULT_OUTCOME_WINDOW),
            signals,
            last_network: Mutex::new(None),
            metrics: ScalerMetrics::new(),
        }
    }

    /// Replace the request-outcome window
    pub fn with_outcome_window(mut self, window: OutcomeWindow) -> Self {
        self.outcomes = window;
        self
    }

    pub fn signals(&self) -> &Arc<ControlSignals> {
        &self.signals
    }

    /// Record a finished request for latency and success accounting
    pub fn record_outcome(&self, endpoint: &str, latency_ms: f64, success: bool) {
        self.outcomes.record(endpoint, latency_ms, success);
    }

    pub fn outcome_summary(&self) -> OutcomeSummary {
        self.outcomes.summary()
    }

    /// Take one snapshot now
    pub async fn collect(&self) -> MetricSnapshot {
        self.collect_at(Utc::now()).await
    }

    /// Take one snapshot stamped with `now`
    pub async fn collect_at(&self, now: DateTime<Utc>) -> MetricSnapshot {
        let start = Instant::now();
        let mut snapshot = MetricSnapshot::empty(now);

        match self.host.cpu_percent().await {
            Ok(cpu) => snapshot.cpu_percent = cpu,
            Err(e) => self.source_failed("cpu", &e),
        }
        match self.host.memory().await {
            Ok(mem) => {
                snapshot.memory_percent = mem.percent;
                snapshot.memory_available_gb = mem.available_gb;
            }
            Err(e) => self.source_failed("memory", &e),
        }
        match self.host.network_bytes().await {
            Ok(bytes) => snapshot.network_mbps = self.network_mbps(now, bytes),
            Err(e) => self.source_failed("network", &e),
        }
        match self.host.open_connections().await {
            Ok(count) => snapshot.open_connections = count,
            Err(e) => self.source_failed("connections", &e),
        }

        if let Some(gpu) = &self.gpu {
            match gpu.read().await {
                Ok(Some(reading)) => {
                    snapshot.gpu_utilization = Some(reading.utilization);
                    snapshot.gpu_memory_percent = Some(reading.memory_percent);
                    snapshot.gpu_temperature = Some(reading.temperature);
                }
                Ok(None) => {}
                Err(e) => self.source_failed("gpu", &e),
            }
        }

        match self.workload.read().await {
            Ok(w) => {
                snapshot.queue_depth = w.queue_depth;
                snapshot.pending_requests = w.pending_requests;
                snapshot.active_tasks = w.active_tasks;
            }
            Err(e) => self.source_failed("workload", &e),
        }

        let outcomes = self.outcomes.summary_at(now);
        snapshot.avg_response_ms = outcomes.avg_response_ms;
        snapshot.p95_response_ms = outcomes.p95_response_ms;
        snapshot.p99_response_ms = outcomes.p99_response_ms;
        snapshot.completed_last_hour = outcomes.completed;
        snapshot.failed_last_hour = outcomes.failed;
        snapshot.success_rate = outcomes.success_rate;

        snapshot.running_instances = self.signals.running_instances();
        snapshot.predicted_load = self.signals.predicted_load();

        self.metrics
            .observe_collection_latency(start.elapsed().as_secs_f64());
        self.metrics.set_queue_depth(snapshot.queue_depth as i64);
        snapshot
    }

    fn network_mbps(&self, now: DateTime<Utc>, bytes: u64) -> f64 {
        let mut last = self.last_network.lock().unwrap_or_else(|e| e.into_inner());
        let rate = match *last {
            Some((then, prev_bytes)) => {
                let secs = (now - then).num_milliseconds() as f64 / 1000.0;
                if secs > 0.0 && bytes >= prev_bytes {
                    (bytes - prev_bytes) as f64 * 8.0 / 1_000_000.0 / secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        *last = Some((now, bytes));
        rate
    }

    fn source_failed(&self, source: &str, error: &anyhow::Error) {
        self.metrics.inc_collection_errors(source);
        debug!(source = %source, error = %error, "Metric source failed, using default");
    }
}
