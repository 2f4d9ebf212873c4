//! Metrics collection loop
//!
//! Runs the collector on its own timer, independent of the scaling cycle,
//! and appends every snapshot to the time-series store.

use super::MetricsCollector;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::timeseries::TimeSeriesStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the metrics collection loop
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Collection interval (default: 60 seconds)
    pub interval: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Periodic collection into the store
pub struct CollectionLoop {
    collector: Arc<MetricsCollector>,
    store: Arc<TimeSeriesStore>,
    config: CollectionConfig,
    health: Option<HealthRegistry>,
}

impl CollectionLoop {
    pub fn new(
        collector: Arc<MetricsCollector>,
        store: Arc<TimeSeriesStore>,
        config: CollectionConfig,
    ) -> Self {
        Self {
            collector,
            store,
            config,
            health: None,
        }
    }

    /// Run until the shutdown signal fires
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting metrics collection loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut collection_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    self.collect_once().await;
                    collection_count += 1;

                    if collection_count % 10 == 0 {
                        debug!(
                            collections = collection_count,
                            elapsed_ms = start.elapsed().as_millis(),
                            "Collection cycle complete"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down metrics collection loop");
                    break;
                }
            }
        }
    }

    /// Collect one snapshot and append it to the store
    pub async fn collect_once(&self) {
        let snapshot = self.collector.collect().await;
        match self.store.append(snapshot).await {
            Ok(()) => self.report(ComponentStatus::Healthy, None).await,
            Err(e) => {
                warn!(error = %e, "Failed to persist metric snapshot");
                self.report(ComponentStatus::Degraded, Some(e.to_string()))
                    .await;
            }
        }
    }

    async fn report(&self, status: ComponentStatus, message: Option<String>) {
        if let Some(health) = &self.health {
            health.report(components::COLLECTOR, status, message).await;
        }
    }
}

/// Builder for creating the collection loop
pub struct CollectionLoopBuilder {
    collector: Option<Arc<MetricsCollector>>,
    store: Option<Arc<TimeSeriesStore>>,
    config: CollectionConfig,
    health: Option<HealthRegistry>,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            collector: None,
            store: None,
            config: CollectionConfig::default(),
            health: None,
        }
    }

    pub fn collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn store(mut self, store: Arc<TimeSeriesStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the collection interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Report collector health into `health`
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<CollectionLoop> {
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("Collector is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;

        let mut collection_loop = CollectionLoop::new(collector, store, self.config);
        collection_loop.health = self.health;
        Ok(collection_loop)
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
