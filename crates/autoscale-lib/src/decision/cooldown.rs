//! Per-class cooldown windows

use crate::models::ActionClass;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Cooldown expiry per action class
///
/// Status callers read concurrently while the decision path writes.
#[derive(Debug, Default)]
pub struct CooldownStore {
    until: RwLock<HashMap<ActionClass, DateTime<Utc>>>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or extend) the cooldown of `class` until `until`
    pub fn start(&self, class: ActionClass, until: DateTime<Utc>) {
        let mut map = self.until.write().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(class).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }

    pub fn is_active(&self, class: ActionClass, now: DateTime<Utc>) -> bool {
        self.expiry(class).map_or(false, |until| now < until)
    }

    pub fn expiry(&self, class: ActionClass) -> Option<DateTime<Utc>> {
        self.until
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&class)
            .copied()
    }

    /// Cooldowns still in force at `now`
    pub fn active(&self, now: DateTime<Utc>) -> Vec<(ActionClass, DateTime<Utc>)> {
        let mut active: Vec<_> = self
            .until
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(class, until)| (*class, *until))
            .collect();
        active.sort_by_key(|(_, until)| *until);
        active
    }

    pub fn clear(&self) {
        self.until.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
