//! Time-series store for metric snapshots
//!
//! Holds raw snapshots for the retention window and serves derived views:
//! - uniform-cadence resampled rows
//! - engineered [`FeatureVector`]s, computed lazily per query
//! - supervised training pairs (features, queue depth `horizon` rows ahead)
//! - hourly and weekday demand patterns

mod features;
mod resample;

pub use features::SeriesStats;
pub use resample::{fill_missing, resample, ResampledRow};

use crate::error::Result;
use crate::journal::{Journal, Table};
use crate::models::{FeatureVector, MetricSnapshot};
use crate::stats;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Weights of the composite load score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadWeights {
    pub cpu: f64,
    pub memory: f64,
    pub queue: f64,
}

impl Default for LoadWeights {
    fn default() -> Self {
        Self {
            cpu: 0.3,
            memory: 0.3,
            queue: 0.4,
        }
    }
}

impl LoadWeights {
    pub fn composite(&self, cpu: f64, memory: f64, queue: f64) -> f64 {
        self.cpu * cpu + self.memory * memory + self.queue * queue
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesConfig {
    /// Resampling cadence
    pub resample_interval_secs: u64,
    /// Rolling window W in resampled rows
    pub window: usize,
    pub weights: LoadWeights,
    /// Raw snapshots older than this are purged
    pub retention_days: i64,
    /// Lookback used for the latest feature vector and forecasts
    pub feature_lookback_hours: i64,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            resample_interval_secs: 300,
            window: 5,
            weights: LoadWeights::default(),
            retention_days: 7,
            feature_lookback_hours: 24,
        }
    }
}

/// A finite, restartable sequence of feature vectors
///
/// Vectors are computed on iteration; iterating twice yields identical output.
#[derive(Debug, Clone)]
pub struct FeatureSeries {
    rows: Arc<[ResampledRow]>,
    window: usize,
    weights: LoadWeights,
    stats: SeriesStats,
}

impl FeatureSeries {
    fn new(rows: Vec<ResampledRow>, window: usize, weights: LoadWeights) -> Self {
        let stats = SeriesStats::from_rows(&rows);
        Self {
            rows: rows.into(),
            window,
            weights,
            stats,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ResampledRow] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<FeatureVector> {
        (index < self.rows.len()).then(|| {
            features::feature_row(&self.rows, index, self.window, &self.weights, &self.stats)
        })
    }

    pub fn last(&self) -> Option<FeatureVector> {
        self.rows.len().checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn iter(&self) -> FeatureIter<'_> {
        FeatureIter {
            series: self,
            next: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<FeatureVector> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &'a FeatureSeries {
    type Item = FeatureVector;
    type IntoIter = FeatureIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`FeatureSeries`]
pub struct FeatureIter<'a> {
    series: &'a FeatureSeries,
    next: usize,
}

impl Iterator for FeatureIter<'_> {
    type Item = FeatureVector;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.series.get(self.next)?;
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.series.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FeatureIter<'_> {}

/// Supervised pairs for the demand predictor
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub features: Vec<FeatureVector>,
    /// Queue depth `horizon` rows after each feature row
    pub targets: Vec<f64>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Mean queue depth by calendar position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandPatterns {
    pub hourly: BTreeMap<u32, f64>,
    /// Keyed by weekday, Monday = 0
    pub weekday: BTreeMap<u32, f64>,
    /// Busiest three hours, highest first
    pub peak_hours: Vec<u32>,
    /// Quietest three hours, lowest first
    pub low_hours: Vec<u32>,
}

/// Snapshot store with resampling and feature engineering
pub struct TimeSeriesStore {
    config: TimeSeriesConfig,
    snapshots: RwLock<VecDeque<MetricSnapshot>>,
    journal: Arc<Journal>,
}

impl TimeSeriesStore {
    pub fn new(config: TimeSeriesConfig, journal: Arc<Journal>) -> Self {
        Self {
            config,
            snapshots: RwLock::new(VecDeque::new()),
            journal,
        }
    }

    /// Store without persistence
    pub fn in_memory(config: TimeSeriesConfig) -> Self {
        Self::new(config, Arc::new(Journal::disabled()))
    }

    pub fn config(&self) -> &TimeSeriesConfig {
        &self.config
    }

    /// Load journaled snapshots still inside the retention window
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(self.config.retention_days);
        let mut replayed: Vec<MetricSnapshot> = self.journal.replay(Table::Snapshots)?;
        replayed.retain(|s| s.timestamp >= cutoff);
        replayed.sort_by_key(|s| s.timestamp);

        let count = replayed.len();
        let mut snapshots = self.snapshots.write().await;
        *snapshots = replayed.into();
        info!(snapshots = count, "Restored metric history");
        Ok(count)
    }

    /// Append a snapshot and purge anything past retention
    pub async fn append(&self, snapshot: MetricSnapshot) -> Result<()> {
        self.journal.append(Table::Snapshots, &snapshot)?;

        let cutoff = snapshot.timestamp - Duration::days(self.config.retention_days);
        let mut snapshots = self.snapshots.write().await;
        let position = snapshots.partition_point(|s| s.timestamp <= snapshot.timestamp);
        snapshots.insert(position, snapshot);

        let before = snapshots.len();
        while snapshots.front().is_some_and(|s| s.timestamp < cutoff) {
            snapshots.pop_front();
        }
        let purged = before - snapshots.len();
        if purged > 0 {
            debug!(purged, "Purged expired snapshots");
        }
        Ok(())
    }

    /// Remove snapshots older than the retention window relative to `now`
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(self.config.retention_days);
        let mut snapshots = self.snapshots.write().await;
        let before = snapshots.len();
        snapshots.retain(|s| s.timestamp >= cutoff);
        before - snapshots.len()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }

    pub async fn latest_snapshot(&self) -> Option<MetricSnapshot> {
        self.snapshots.read().await.back().cloned()
    }

    /// Raw snapshots with `since <= timestamp <= until`, oldest first
    pub async fn snapshots_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<MetricSnapshot> {
        self.snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.timestamp >= since && s.timestamp <= until)
            .cloned()
            .collect()
    }

    /// Resampled rows covering `window` back from `now`
    pub async fn resampled(&self, window: Duration, now: DateTime<Utc>) -> Vec<ResampledRow> {
        let raw = self.snapshots_between(now - window, now).await;
        resample(&raw, self.config.resample_interval_secs)
    }

    /// Feature vectors for the trailing `window`
    pub async fn query(&self, window: Duration, now: DateTime<Utc>) -> FeatureSeries {
        let rows = self.resampled(window, now).await;
        FeatureSeries::new(rows, self.config.window, self.config.weights.clone())
    }

    /// Feature vector of the most recent resampled row
    pub async fn latest_features(&self, now: DateTime<Utc>) -> Option<FeatureVector> {
        self.query(Duration::hours(self.config.feature_lookback_hours), now)
            .await
            .last()
    }

    /// Feature rows paired with queue depth `horizon` rows ahead
    pub async fn training_set(
        &self,
        window: Duration,
        horizon: usize,
        now: DateTime<Utc>,
    ) -> TrainingSet {
        let series = self.query(window, now).await;
        let usable = series.len().saturating_sub(horizon);
        let rows = series.rows();

        let mut set = TrainingSet::default();
        for (i, features) in series.iter().take(usable).enumerate() {
            set.targets.push(rows[i + horizon].queue_depth);
            set.features.push(features);
        }
        set
    }

    /// Average demand by hour of day and weekday over `window`
    pub async fn demand_patterns(&self, window: Duration, now: DateTime<Utc>) -> DemandPatterns {
        let rows = self.resampled(window, now).await;
        if rows.is_empty() {
            return DemandPatterns::default();
        }

        let mut by_hour: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        let mut by_weekday: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for row in &rows {
            by_hour
                .entry(row.timestamp.hour())
                .or_default()
                .push(row.queue_depth);
            by_weekday
                .entry(row.timestamp.weekday().num_days_from_monday())
                .or_default()
                .push(row.queue_depth);
        }

        let hourly: BTreeMap<u32, f64> = by_hour
            .into_iter()
            .map(|(h, values)| (h, stats::mean(&values)))
            .collect();
        let weekday = by_weekday
            .into_iter()
            .map(|(d, values)| (d, stats::mean(&values)))
            .collect();

        let mut ranked: Vec<(u32, f64)> = hourly.iter().map(|(h, v)| (*h, *v)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let peak_hours = ranked.iter().take(3).map(|(h, _)| *h).collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        let low_hours = ranked.iter().take(3).map(|(h, _)| *h).collect();

        DemandPatterns {
            hourly,
            weekday,
            peak_hours,
            low_hours,
        }
    }
}
