//! Managed instance inventory
//!
//! One row per instance ever managed. Rows change state but are never
//! removed, so cost history stays explainable.

use crate::journal::{Journal, Table};
use crate::models::{InstanceRecord, InstanceState};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

pub struct InstanceInventory {
    records: DashMap<String, InstanceRecord>,
    journal: Arc<Journal>,
}

impl InstanceInventory {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            records: DashMap::new(),
            journal,
        }
    }

    /// Record a launched instance; a no-op for ids already known
    pub fn record_launch(
        &self,
        instance_id: &str,
        instance_type: &str,
        hourly_cost: f64,
        state: InstanceState,
        launched_at: DateTime<Utc>,
        execution_id: Option<&str>,
    ) {
        if self.records.contains_key(instance_id) {
            return;
        }
        let record = InstanceRecord {
            instance_id: instance_id.to_string(),
            instance_type: instance_type.to_string(),
            state,
            launched_at,
            terminated_at: None,
            hourly_cost,
            execution_id: execution_id.map(str::to_string),
        };
        self.persist(&record);
        self.records.insert(instance_id.to_string(), record);
    }

    pub fn mark_running(&self, instance_id: &str) {
        self.transition(instance_id, InstanceState::Running, None);
    }

    pub fn mark_terminated(&self, instance_id: &str, at: DateTime<Utc>) {
        self.transition(instance_id, InstanceState::Terminated, Some(at));
    }

    fn transition(&self, instance_id: &str, state: InstanceState, at: Option<DateTime<Utc>>) {
        let updated = self.records.get_mut(instance_id).and_then(|mut record| {
            if record.state == state || record.state == InstanceState::Terminated {
                return None;
            }
            record.state = state;
            if at.is_some() {
                record.terminated_at = at;
            }
            Some(record.clone())
        });
        if let Some(record) = updated {
            self.persist(&record);
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<InstanceRecord> {
        self.records.get(instance_id).map(|r| r.clone())
    }

    /// Running instances, oldest launch first
    pub fn running(&self) -> Vec<InstanceRecord> {
        let mut running: Vec<InstanceRecord> = self
            .records
            .iter()
            .filter(|r| r.state == InstanceState::Running)
            .map(|r| r.clone())
            .collect();
        running.sort_by_key(|r| r.launched_at);
        running
    }

    pub fn running_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == InstanceState::Running)
            .count()
    }

    /// Sum of hourly cost over running instances
    pub fn hourly_cost(&self) -> f64 {
        self.records
            .iter()
            .filter(|r| r.state == InstanceState::Running)
            .map(|r| r.hourly_cost)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self, record: &InstanceRecord) {
        if let Err(e) = self.journal.append(Table::Instances, record) {
            warn!(instance_id = %record.instance_id, error = %e, "Failed to journal instance");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_rows_are_never_removed() {
        let inventory = InstanceInventory::new(Arc::new(Journal::disabled()));
        let now = Utc::now();
        inventory.record_launch("i-1", "t3.large", 0.1, InstanceState::Running, now, None);
        inventory.record_launch("i-2", "t3.large", 0.1, InstanceState::Pending, now, Some("exec_1"));
        inventory.mark_running("i-2");
        inventory.mark_terminated("i-1", now);

        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory.running_count(), 1);
        assert_eq!(inventory.get("i-1").unwrap().terminated_at, Some(now));

        // Terminated rows stay terminated
        inventory.mark_running("i-1");
        assert_eq!(inventory.get("i-1").unwrap().state, InstanceState::Terminated);
    }

    #[test]
    fn test_cost_and_ordering() {
        let inventory = InstanceInventory::new(Arc::new(Journal::disabled()));
        let now = Utc::now();
        inventory.record_launch("i-new", "g4dn.xlarge", 0.5, InstanceState::Running, now, None);
        inventory.record_launch(
            "i-old",
            "t3.large",
            0.1,
            InstanceState::Running,
            now - Duration::hours(1),
            None,
        );

        assert!((inventory.hourly_cost() - 0.6).abs() < 1e-9);
        let ids: Vec<String> = inventory.running().into_iter().map(|r| r.instance_id).collect();
        assert_eq!(ids, vec!["i-old", "i-new"]);
    }
}
