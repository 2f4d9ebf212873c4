//! Resampling of raw snapshots to a uniform cadence
//!
//! Snapshots are grouped into fixed buckets aligned to the Unix epoch and
//! collapsed by mean per numeric field. Buckets without snapshots are
//! dropped. Optional fields are then filled forward, backward and finally
//! with zero.

use crate::models::MetricSnapshot;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// One resampled interval
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledRow {
    /// Start of the bucket
    pub timestamp: DateTime<Utc>,
    pub queue_depth: f64,
    pub pending_requests: f64,
    pub active_tasks: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_gb: f64,
    pub gpu_utilization: Option<f64>,
    pub gpu_memory_percent: Option<f64>,
    pub gpu_temperature: Option<f64>,
    pub avg_response_ms: f64,
    pub p95_response_ms: f64,
    pub p99_response_ms: f64,
    pub completed_last_hour: f64,
    pub failed_last_hour: f64,
    pub success_rate: f64,
    pub network_mbps: f64,
    pub open_connections: f64,
    pub running_instances: f64,
}

/// Bucket `snapshots` by `interval_secs` and fill missing optional values
///
/// Input must be ordered by timestamp; output is ordered by bucket start.
pub fn resample(snapshots: &[MetricSnapshot], interval_secs: u64) -> Vec<ResampledRow> {
    let interval = interval_secs.max(1) as i64;
    let mut buckets: BTreeMap<i64, Vec<&MetricSnapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        let key = snapshot.timestamp.timestamp().div_euclid(interval) * interval;
        buckets.entry(key).or_default().push(snapshot);
    }

    let mut rows: Vec<ResampledRow> = buckets
        .into_iter()
        .filter_map(|(start, bucket)| {
            let timestamp = Utc.timestamp_opt(start, 0).single()?;
            Some(collapse(timestamp, &bucket))
        })
        .collect();

    fill_missing(&mut rows);
    rows
}

fn collapse(timestamp: DateTime<Utc>, bucket: &[&MetricSnapshot]) -> ResampledRow {
    ResampledRow {
        timestamp,
        queue_depth: mean_of(bucket, |s| s.queue_depth as f64),
        pending_requests: mean_of(bucket, |s| s.pending_requests as f64),
        active_tasks: mean_of(bucket, |s| s.active_tasks as f64),
        cpu_percent: mean_of(bucket, |s| s.cpu_percent),
        memory_percent: mean_of(bucket, |s| s.memory_percent),
        memory_available_gb: mean_of(bucket, |s| s.memory_available_gb),
        gpu_utilization: mean_present(bucket, |s| s.gpu_utilization),
        gpu_memory_percent: mean_present(bucket, |s| s.gpu_memory_percent),
        gpu_temperature: mean_present(bucket, |s| s.gpu_temperature),
        avg_response_ms: mean_of(bucket, |s| s.avg_response_ms),
        p95_response_ms: mean_of(bucket, |s| s.p95_response_ms),
        p99_response_ms: mean_of(bucket, |s| s.p99_response_ms),
        completed_last_hour: mean_of(bucket, |s| s.completed_last_hour as f64),
        failed_last_hour: mean_of(bucket, |s| s.failed_last_hour as f64),
        success_rate: mean_of(bucket, |s| s.success_rate),
        network_mbps: mean_of(bucket, |s| s.network_mbps),
        open_connections: mean_of(bucket, |s| s.open_connections as f64),
        running_instances: mean_of(bucket, |s| s.running_instances as f64),
    }
}

fn mean_of(bucket: &[&MetricSnapshot], field: impl Fn(&MetricSnapshot) -> f64) -> f64 {
    if bucket.is_empty() {
        return 0.0;
    }
    bucket.iter().map(|s| field(s)).sum::<f64>() / bucket.len() as f64
}

fn mean_present(
    bucket: &[&MetricSnapshot],
    field: impl Fn(&MetricSnapshot) -> Option<f64>,
) -> Option<f64> {
    let present: Vec<f64> = bucket.iter().filter_map(|s| field(s)).collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

/// Forward-fill, then back-fill, then zero-fill every optional column
pub fn fill_missing(rows: &mut [ResampledRow]) {
    fill_column(rows, |r| &mut r.gpu_utilization);
    fill_column(rows, |r| &mut r.gpu_memory_percent);
    fill_column(rows, |r| &mut r.gpu_temperature);
}

fn fill_column(rows: &mut [ResampledRow], column: fn(&mut ResampledRow) -> &mut Option<f64>) {
    let mut last = None;
    for row in rows.iter_mut() {
        let cell = column(row);
        match *cell {
            Some(v) => last = Some(v),
            None => *cell = last,
        }
    }

    let mut next = None;
    for row in rows.iter_mut().rev() {
        let cell = column(row);
        match *cell {
            Some(v) => next = Some(v),
            None => *cell = next,
        }
    }

    for row in rows.iter_mut() {
        let cell = column(row);
        if cell.is_none() {
            *cell = Some(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(secs: i64, queue: u64, cpu: f64, gpu: Option<f64>) -> MetricSnapshot {
        let mut s = MetricSnapshot::empty(Utc.timestamp_opt(secs, 0).unwrap());
        s.queue_depth = queue;
        s.cpu_percent = cpu;
        s.gpu_utilization = gpu;
        s
    }

    #[test]
    fn test_bucket_mean_and_alignment() {
        let snaps = vec![
            snap(0, 2, 10.0, None),
            snap(60, 4, 30.0, None),
            snap(299, 6, 50.0, None),
            snap(300, 10, 70.0, None),
        ];
        let rows = resample(&snaps, 300);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp.timestamp(), 0);
        assert!((rows[0].queue_depth - 4.0).abs() < 1e-9);
        assert!((rows[0].cpu_percent - 30.0).abs() < 1e-9);
        assert_eq!(rows[1].timestamp.timestamp(), 300);
        assert!((rows[1].queue_depth - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_buckets_dropped() {
        let snaps = vec![snap(0, 1, 0.0, None), snap(3000, 1, 0.0, None)];
        let rows = resample(&snaps, 300);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].timestamp.timestamp(), 3000);
    }

    #[test]
    fn test_fill_order_forward_backward_zero() {
        let snaps = vec![
            snap(0, 0, 0.0, None),
            snap(300, 0, 0.0, Some(40.0)),
            snap(600, 0, 0.0, None),
            snap(900, 0, 0.0, Some(80.0)),
        ];
        let rows = resample(&snaps, 300);
        let gpu: Vec<f64> = rows.iter().map(|r| r.gpu_utilization.unwrap()).collect();
        // Leading gap back-filled, interior gap forward-filled
        assert_eq!(gpu, vec![40.0, 40.0, 40.0, 80.0]);

        // Column with no values at all is zero-filled
        assert!(rows.iter().all(|r| r.gpu_temperature == Some(0.0)));
    }

    #[test]
    fn test_optional_mean_ignores_missing() {
        let snaps = vec![snap(0, 0, 0.0, Some(20.0)), snap(10, 0, 0.0, None)];
        let rows = resample(&snaps, 300);
        assert_eq!(rows[0].gpu_utilization, Some(20.0));
    }
}
