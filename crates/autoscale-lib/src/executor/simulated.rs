//! In-process cloud provider
//!
//! Instances boot after a configurable latency and every call is logged.
//! Faults can be injected per call to exercise failure handling.

use super::provider::{CloudProvider, InstanceDescription, LaunchSpec};
use crate::error::ProviderError;
use crate::models::InstanceState;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// One provider call as observed by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create { instance_id: Option<String> },
    Describe(Vec<String>),
    ListManaged,
    Terminate(Vec<String>),
    Register(Vec<String>),
    Deregister(Vec<String>),
}

#[derive(Debug)]
struct SimInstance {
    description: InstanceDescription,
    ready_at: Instant,
}

#[derive(Debug, Default)]
struct Faults {
    /// 1-based create call numbers that fail
    create_calls: HashSet<usize>,
    register: bool,
    deregister: bool,
    terminate: HashSet<String>,
    never_boot: bool,
    /// Pending instances terminate instead of reaching running
    boot_failure: bool,
}

#[derive(Debug, Default)]
struct SimState {
    instances: BTreeMap<String, SimInstance>,
    targets: HashMap<String, BTreeSet<String>>,
    creates: usize,
    sequence: u64,
    calls: Vec<ProviderCall>,
    faults: Faults,
}

/// Simulated provider backing the daemon and the tests
#[derive(Debug)]
pub struct SimulatedCloud {
    boot_latency: Duration,
    state: Mutex<SimState>,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl SimulatedCloud {
    pub fn new(boot_latency: Duration) -> Self {
        Self {
            boot_latency,
            state: Mutex::new(SimState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `count` managed instances that are already running
    ///
    /// Launch times are spaced a minute apart, oldest first.
    pub fn with_running(self, count: usize, instance_type: &str) -> Self {
        let now = Utc::now();
        {
            let mut state = self.state();
            for i in 0..count {
                let launched_at = now - ChronoDuration::minutes((count - i) as i64);
                let id = next_id(&mut state);
                let mut tags = BTreeMap::new();
                tags.insert(
                    super::provider::MANAGED_BY_TAG.to_string(),
                    super::provider::MANAGED_BY_VALUE.to_string(),
                );
                state.instances.insert(
                    id.clone(),
                    SimInstance {
                        description: InstanceDescription {
                            instance_id: id,
                            instance_type: instance_type.to_string(),
                            state: InstanceState::Running,
                            launched_at,
                            tags,
                        },
                        ready_at: Instant::now(),
                    },
                );
            }
        }
        self
    }

    /// Fail the `n`th create call (1-based)
    pub fn fail_create_call(&self, n: usize) {
        self.state().faults.create_calls.insert(n);
    }

    pub fn fail_registration(&self, fail: bool) {
        self.state().faults.register = fail;
    }

    pub fn fail_deregistration(&self, fail: bool) {
        self.state().faults.deregister = fail;
    }

    pub fn fail_termination_of(&self, instance_id: &str) {
        self.state().faults.terminate.insert(instance_id.to_string());
    }

    /// Keep new instances pending forever
    pub fn stall_boot(&self, stall: bool) {
        self.state().faults.never_boot = stall;
    }

    /// Terminate new instances when their boot completes
    pub fn fail_boot(&self, fail: bool) {
        self.state().faults.boot_failure = fail;
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    /// Ids passed to terminate calls, in order
    pub fn terminated_ids(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                ProviderCall::Terminate(ids) => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.state()
            .instances
            .values()
            .filter(|i| i.description.state == InstanceState::Running)
            .map(|i| i.description.instance_id.clone())
            .collect()
    }

    /// Members of a target group
    pub fn targets(&self, target_group: &str) -> Vec<String> {
        self.state()
            .targets
            .get(target_group)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn refresh(state: &mut SimState) {
        if state.faults.never_boot {
            return;
        }
        let now = Instant::now();
        let booted = if state.faults.boot_failure {
            InstanceState::Terminated
        } else {
            InstanceState::Running
        };
        for instance in state.instances.values_mut() {
            if instance.description.state == InstanceState::Pending && now >= instance.ready_at {
                instance.description.state = booted;
            }
        }
    }
}

fn next_id(state: &mut SimState) -> String {
    state.sequence += 1;
    format!("i-{:017x}", state.sequence)
}

#[async_trait]
impl CloudProvider for SimulatedCloud {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn create_instance(&self, spec: &LaunchSpec) -> Result<String, ProviderError> {
        let mut state = self.state();
        state.creates += 1;
        if state.faults.create_calls.contains(&state.creates) {
            state.calls.push(ProviderCall::Create { instance_id: None });
            return Err(ProviderError::transient(
                "create_instance",
                "InsufficientInstanceCapacity",
            ));
        }

        let id = next_id(&mut state);
        state.instances.insert(
            id.clone(),
            SimInstance {
                description: InstanceDescription {
                    instance_id: id.clone(),
                    instance_type: spec.instance_type.clone(),
                    state: InstanceState::Pending,
                    launched_at: Utc::now(),
                    tags: spec.tags.clone(),
                },
                ready_at: Instant::now() + self.boot_latency,
            },
        );
        state.calls.push(ProviderCall::Create {
            instance_id: Some(id.clone()),
        });
        debug!(instance_id = %id, "Simulated instance launched");
        Ok(id)
    }

    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceDescription>, ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::Describe(instance_ids.to_vec()));
        Self::refresh(&mut state);
        instance_ids
            .iter()
            .map(|id| {
                state
                    .instances
                    .get(id)
                    .map(|i| i.description.clone())
                    .ok_or_else(|| ProviderError::NotFound(id.clone()))
            })
            .collect()
    }

    async fn list_managed(&self) -> Result<Vec<InstanceDescription>, ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::ListManaged);
        Self::refresh(&mut state);
        Ok(state
            .instances
            .values()
            .map(|i| &i.description)
            .filter(|d| d.is_managed() && d.state != InstanceState::Terminated)
            .cloned()
            .collect())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::Terminate(instance_ids.to_vec()));
        if let Some(id) = instance_ids
            .iter()
            .find(|id| state.faults.terminate.contains(*id))
        {
            return Err(ProviderError::transient(
                "terminate_instances",
                format!("throttled while terminating {}", id),
            ));
        }
        for id in instance_ids {
            let instance = state
                .instances
                .get_mut(id)
                .ok_or_else(|| ProviderError::NotFound(id.clone()))?;
            instance.description.state = InstanceState::Terminated;
        }
        for members in state.targets.values_mut() {
            for id in instance_ids {
                members.remove(id);
            }
        }
        Ok(())
    }

    async fn register_targets(
        &self,
        target_group: &str,
        instance_ids: &[String],
        _port: u16,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::Register(instance_ids.to_vec()));
        if state.faults.register {
            return Err(ProviderError::transient(
                "register_targets",
                "target group unavailable",
            ));
        }
        state
            .targets
            .entry(target_group.to_string())
            .or_default()
            .extend(instance_ids.iter().cloned());
        Ok(())
    }

    async fn deregister_targets(
        &self,
        target_group: &str,
        instance_ids: &[String],
        _port: u16,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::Deregister(instance_ids.to_vec()));
        if state.faults.deregister {
            return Err(ProviderError::transient(
                "deregister_targets",
                "target group unavailable",
            ));
        }
        if let Some(members) = state.targets.get_mut(target_group) {
            for id in instance_ids {
                members.remove(id);
            }
        }
        Ok(())
    }
}
