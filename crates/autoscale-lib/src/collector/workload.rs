//! Workload gauge fed by the pipeline

use super::{WorkloadProbe, WorkloadReading};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Last reported queue state, updated by the workload itself
#[derive(Debug, Default)]
pub struct WorkloadGauge {
    queue_depth: AtomicU64,
    pending_requests: AtomicU64,
    active_tasks: AtomicU64,
}

impl WorkloadGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, reading: WorkloadReading) {
        self.queue_depth.store(reading.queue_depth, Ordering::SeqCst);
        self.pending_requests
            .store(reading.pending_requests, Ordering::SeqCst);
        self.active_tasks.store(reading.active_tasks, Ordering::SeqCst);
    }

    pub fn get(&self) -> WorkloadReading {
        WorkloadReading {
            queue_depth: self.queue_depth.load(Ordering::SeqCst),
            pending_requests: self.pending_requests.load(Ordering::SeqCst),
            active_tasks: self.active_tasks.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl WorkloadProbe for WorkloadGauge {
    async fn read(&self) -> Result<WorkloadReading> {
        Ok(self.get())
    }
}
