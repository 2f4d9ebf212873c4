//! Scaling execution against a cloud provider
//!
//! Turns a [`ScalingDecision`] into provider calls:
//! - scale-up launches one instance per missing slot, waits for them to
//!   run, then registers them with the load balancer
//! - scale-down removes the oldest instances first, draining each before
//!   termination, and never leaves fewer than one running
//!
//! A failed scale-up terminates every instance it created. Scale-down
//! failures cannot be undone and are only recorded.

mod inventory;
pub mod provider;
mod simulated;


pub use inventory::InstanceInventory;
pub use provider::{CloudProvider, InstanceDescription, LaunchSpec};
pub use simulated::{ProviderCall, SimulatedCloud};

use crate::collector::ControlSignals;
use crate::config::{ScalingConfig, MAX_INSTANCES_CEILING};
use crate::error::{ProviderError, Result, ScalingError};
use crate::journal::{Journal, Table};
use crate::models::{
    ExecutionStatus, InstanceState, MetricSnapshot, ScalingAction, ScalingDecision,
    ScalingExecution, ScalingReason,
};
use crate::observability::{ScalerMetrics, StructuredLogger};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long executions stay in the in-memory history
const HISTORY_WINDOW_HOURS: i64 = 24;

/// Manual requests may cost at most this multiple of the hourly cap
const MANUAL_COST_FACTOR: f64 = 2.0;

/// Spend of the running managed fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub running_instances: usize,
    pub cost_per_hour: f64,
    pub cost_per_day: f64,
    pub cost_per_month: f64,
    pub currency: String,
}

impl CostEstimate {
    fn from_hourly(running_instances: usize, cost_per_hour: f64) -> Self {
        Self {
            running_instances,
            cost_per_hour,
            cost_per_day: cost_per_hour * 24.0,
            cost_per_month: cost_per_hour * 24.0 * 30.0,
            currency: "USD".to_string(),
        }
    }
}

/// Carries out decisions and owns the instance inventory
pub struct CloudExecutor {
    provider: Arc<dyn CloudProvider>,
    config: RwLock<Arc<ScalingConfig>>,
    inventory: InstanceInventory,
    history: RwLock<VecDeque<ScalingExecution>>,
    sequence: AtomicU64,
    signals: Option<Arc<ControlSignals>>,
    journal: Arc<Journal>,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

impl CloudExecutor {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        config: Arc<ScalingConfig>,
        journal: Arc<Journal>,
    ) -> Self {
        let logger = StructuredLogger::new(config.region.clone());
        Self {
            provider,
            config: RwLock::new(config),
            inventory: InstanceInventory::new(journal.clone()),
            history: RwLock::new(VecDeque::new()),
            sequence: AtomicU64::new(1),
            signals: None,
            journal,
            metrics: ScalerMetrics::new(),
            logger,
        }
    }

    /// Publish the running count to the collector after every change
    pub fn with_signals(mut self, signals: Arc<ControlSignals>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn set_config(&self, config: Arc<ScalingConfig>) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn config(&self) -> Arc<ScalingConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn provider(&self) -> &Arc<dyn CloudProvider> {
        &self.provider
    }

    pub fn inventory(&self) -> &InstanceInventory {
        &self.inventory
    }

    /// Reconcile the inventory with the provider's managed instances
    ///
    /// Returns the number of running managed instances.
    pub async fn sync_inventory(&self) -> Result<u32> {
        let config = self.config();
        let managed = self.provider.list_managed().await?;
        let now = Utc::now();

        for instance in &managed {
            self.inventory.record_launch(
                &instance.instance_id,
                &instance.instance_type,
                config.instance_cost(&instance.instance_type),
                instance.state,
                instance.launched_at,
                None,
            );
            if instance.state == InstanceState::Running {
                self.inventory.mark_running(&instance.instance_id);
            }
        }
        for record in self.inventory.running() {
            if !managed.iter().any(|m| m.instance_id == record.instance_id) {
                self.inventory.mark_terminated(&record.instance_id, now);
            }
        }

        let running = managed
            .iter()
            .filter(|m| m.state == InstanceState::Running)
            .count() as u32;
        self.publish(running);
        Ok(running)
    }

    /// Number of running managed instances according to the provider
    pub async fn running_count(&self) -> Result<u32> {
        self.sync_inventory().await
    }

    /// Spend of the running managed fleet
    pub fn current_cost_estimate(&self) -> CostEstimate {
        CostEstimate::from_hourly(self.inventory.running_count(), self.inventory.hourly_cost())
    }

    /// Carry out `decision`
    ///
    /// Failures are reported through the returned execution's status and
    /// error message rather than as an `Err`.
    pub async fn execute(&self, decision: &ScalingDecision) -> ScalingExecution {
        let config = self.config();
        let mut execution = ScalingExecution {
            execution_id: self.next_execution_id(),
            decision_id: decision.id,
            action: decision.action,
            target_instances: decision.recommended_instances.min(config.max_instances),
            status: ExecutionStatus::Pending,
            created_instances: Vec::new(),
            terminated_instances: Vec::new(),
            load_balancer_updated: false,
            rollback_performed: false,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            cost_estimate: decision.cost_impact,
        };
        self.persist(&execution);

        execution.status = ExecutionStatus::InProgress;
        self.persist(&execution);
        self.logger.log_execution_started(&execution);

        let outcome = match self.sync_inventory().await {
            Ok(current) => match decision.action {
                ScalingAction::ScaleUp | ScalingAction::UrgentScaleUp => {
                    let to_add = execution.target_instances.saturating_sub(current);
                    let result = self.scale_up(&config, &mut execution, to_add).await;
                    if result.is_err() {
                        self.rollback(&mut execution).await;
                    }
                    result
                }
                ScalingAction::ScaleDown => {
                    let to_remove = current.saturating_sub(execution.target_instances);
                    self.scale_down(&config, &mut execution, current, to_remove)
                        .await
                }
                ScalingAction::Maintain => Ok(()),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => execution.status = ExecutionStatus::Completed,
            Err(e) => {
                execution.status = ExecutionStatus::Failed;
                execution.error_message = Some(e.to_string());
            }
        }
        execution.completed_at = Some(Utc::now());
        self.finish(&execution);
        execution
    }

    /// Scale to `target` on operator request
    ///
    /// Bypasses cooldowns. Targets outside `1..=max_instances` and targets
    /// whose hourly cost would exceed twice the cap are rejected before any
    /// provider call.
    pub async fn manual_override(&self, target: u32, reason: &str) -> Result<ScalingExecution> {
        let config = self.config();
        let ceiling = config.max_instances.min(MAX_INSTANCES_CEILING);
        if target > ceiling {
            return Err(ScalingError::SafetyLimit(format!(
                "target {} exceeds the maximum of {} instances",
                target, ceiling
            )));
        }
        if target < 1 {
            return Err(ScalingError::SafetyLimit(
                "at least one instance must keep running".to_string(),
            ));
        }
        let estimated = target as f64 * config.launch_instance_cost();
        let limit = config.cost_limit_per_hour * MANUAL_COST_FACTOR;
        if estimated > limit {
            return Err(ScalingError::CostLimit { estimated, limit });
        }

        let current = self.running_count().await?;
        let action = match target.cmp(&current) {
            std::cmp::Ordering::Greater => ScalingAction::ScaleUp,
            std::cmp::Ordering::Less => ScalingAction::ScaleDown,
            std::cmp::Ordering::Equal => ScalingAction::Maintain,
        };
        info!(target, current, reason = %reason, "Manual scaling override");

        let now = Utc::now();
        let decision = ScalingDecision {
            id: 0,
            action,
            reasons: vec![ScalingReason::ManualOverride],
            confidence: 1.0,
            urgency: config.heuristics.standard_urgency,
            current_instances: current,
            recommended_instances: target,
            metrics: MetricSnapshot::empty(now),
            prediction: None,
            cost_impact: (target as f64 - current as f64) * config.launch_instance_cost(),
            decided_at: now,
            cooldown_until: None,
        };
        Ok(self.execute(&decision).await)
    }

    /// Undo a completed scale-up by removing the instances it created
    ///
    /// Instances are drained before termination and at least one instance
    /// is always kept running.
    pub async fn revert(&self, execution_id: &str) -> Result<ScalingExecution> {
        let mut execution = self.get(execution_id).ok_or_else(|| ScalingError::Execution {
            execution_id: execution_id.to_string(),
            message: "unknown execution".to_string(),
        })?;
        if execution.status != ExecutionStatus::Completed
            || !execution.action.is_scale_up()
            || execution.created_instances.is_empty()
        {
            return Err(ScalingError::Execution {
                execution_id: execution_id.to_string(),
                message: "only completed scale-ups with created instances can be reverted"
                    .to_string(),
            });
        }

        let config = self.config();
        let current = self.sync_inventory().await?;
        let mut removable: Vec<String> = execution
            .created_instances
            .iter()
            .filter(|id| {
                self.inventory
                    .get(id)
                    .map_or(false, |r| r.state == InstanceState::Running)
            })
            .cloned()
            .collect();
        let keep_floor = current.saturating_sub(1) as usize;
        removable.truncate(keep_floor);

        for id in &removable {
            self.drain_and_terminate(&config, id).await?;
            execution.terminated_instances.push(id.clone());
        }

        execution.status = ExecutionStatus::RolledBack;
        execution.rollback_performed = true;
        execution.completed_at = Some(Utc::now());
        self.metrics.inc_rollbacks();
        self.logger.log_rollback(execution_id, &removable, 0);
        self.replace(&execution);
        self.finish_counts();
        Ok(execution)
    }

    pub fn get(&self, execution_id: &str) -> Option<ScalingExecution> {
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.execution_id == execution_id)
            .cloned()
    }

    /// Executions started within the trailing `window`, oldest first
    pub fn history(&self, window: ChronoDuration) -> Vec<ScalingExecution> {
        let since = Utc::now() - window;
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.started_at >= since)
            .cloned()
            .collect()
    }

    /// The most recent `limit` executions, newest first
    pub fn recent(&self, limit: usize) -> Vec<ScalingExecution> {
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    async fn scale_up(
        &self,
        config: &ScalingConfig,
        execution: &mut ScalingExecution,
        count: u32,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        info!(
            execution_id = %execution.execution_id,
            count,
            "Launching instances"
        );

        let spec = LaunchSpec::from_template(&config.launch, Utc::now());
        let hourly_cost = config.instance_cost(&spec.instance_type);
        for _ in 0..count {
            let id = self.provider.create_instance(&spec).await?;
            self.inventory.record_launch(
                &id,
                &spec.instance_type,
                hourly_cost,
                InstanceState::Pending,
                Utc::now(),
                Some(&execution.execution_id),
            );
            execution.created_instances.push(id);
        }

        self.wait_until_running(config, &execution.created_instances)
            .await?;
        for id in &execution.created_instances {
            self.inventory.mark_running(id);
        }

        self.provider
            .register_targets(
                &config.load_balancer.target_group,
                &execution.created_instances,
                config.load_balancer.port,
            )
            .await?;
        execution.load_balancer_updated = true;
        Ok(())
    }

    async fn wait_until_running(&self, config: &ScalingConfig, ids: &[String]) -> Result<()> {
        let timings = config.executor;
        let started = Instant::now();

        loop {
            match self.provider.describe_instances(ids).await {
                Ok(descriptions) => {
                    if let Some(lost) = descriptions.iter().find(|d| {
                        matches!(d.state, InstanceState::Stopping | InstanceState::Terminated)
                    }) {
                        return Err(ProviderError::rejected(
                            "launch",
                            format!(
                                "instance {} is {} before reaching running",
                                lost.instance_id, lost.state
                            ),
                        )
                        .into());
                    }
                    if descriptions.len() == ids.len()
                        && descriptions
                            .iter()
                            .all(|d| d.state == InstanceState::Running)
                    {
                        debug!(instances = ?ids, "All instances running");
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, "Instance state poll failed, retrying"),
            }

            if started.elapsed() >= timings.running_timeout() {
                return Err(ScalingError::Timeout {
                    instance_ids: ids.to_vec(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(timings.poll_interval()).await;
        }
    }

    async fn scale_down(
        &self,
        config: &ScalingConfig,
        execution: &mut ScalingExecution,
        current: u32,
        requested: u32,
    ) -> Result<()> {
        let removable = requested.min(current.saturating_sub(1));
        if removable < requested {
            warn!(
                execution_id = %execution.execution_id,
                requested,
                removable,
                "Reduced removal count to keep one instance running"
            );
        }
        if removable == 0 {
            return Ok(());
        }

        let victims: Vec<String> = self
            .inventory
            .running()
            .into_iter()
            .take(removable as usize)
            .map(|r| r.instance_id)
            .collect();

        for id in &victims {
            self.drain_and_terminate(config, id).await?;
            execution.load_balancer_updated = true;
            execution.terminated_instances.push(id.clone());
        }
        Ok(())
    }

    async fn drain_and_terminate(&self, config: &ScalingConfig, instance_id: &str) -> Result<()> {
        let ids = [instance_id.to_string()];
        self.provider
            .deregister_targets(
                &config.load_balancer.target_group,
                &ids,
                config.load_balancer.port,
            )
            .await?;
        tokio::time::sleep(config.executor.drain_grace()).await;
        self.provider.terminate_instances(&ids).await?;
        self.inventory.mark_terminated(instance_id, Utc::now());
        Ok(())
    }

    /// Terminate everything this execution created, one call per instance
    async fn rollback(&self, execution: &mut ScalingExecution) {
        let mut terminated = Vec::new();
        let mut failures = 0;

        for id in &execution.created_instances {
            match self.provider.terminate_instances(std::slice::from_ref(id)).await {
                Ok(()) => {
                    self.inventory.mark_terminated(id, Utc::now());
                    terminated.push(id.clone());
                }
                Err(e) => {
                    failures += 1;
                    warn!(instance_id = %id, error = %e, "Rollback termination failed");
                }
            }
        }

        execution.terminated_instances.extend(terminated.iter().cloned());
        execution.rollback_performed = true;
        self.metrics.inc_rollbacks();
        self.logger
            .log_rollback(&execution.execution_id, &terminated, failures);
    }

    fn next_execution_id(&self) -> String {
        format!(
            "exec_{}_{}",
            Utc::now().timestamp(),
            self.sequence.fetch_add(1, Ordering::SeqCst)
        )
    }

    fn publish(&self, running: u32) {
        if let Some(signals) = &self.signals {
            signals.set_running_instances(running);
        }
        self.metrics.set_running_instances(running as i64);
        self.metrics.set_hourly_cost(self.inventory.hourly_cost());
    }

    fn finish_counts(&self) {
        self.publish(self.inventory.running_count() as u32);
    }

    fn finish(&self, execution: &ScalingExecution) {
        self.persist(execution);
        self.metrics.inc_executions(&execution.status.to_string());
        self.logger.log_execution_finished(execution);

        let cutoff = execution.started_at - ChronoDuration::hours(HISTORY_WINDOW_HOURS);
        {
            let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
            history.push_back(execution.clone());
            while history.front().map_or(false, |e| e.started_at < cutoff) {
                history.pop_front();
            }
        }
        self.finish_counts();
    }

    fn replace(&self, execution: &ScalingExecution) {
        self.persist(execution);
        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = history
            .iter_mut()
            .find(|e| e.execution_id == execution.execution_id)
        {
            *slot = execution.clone();
        }
    }

    fn persist(&self, execution: &ScalingExecution) {
        if let Err(e) = self.journal.append(Table::Executions, execution) {
            warn!(execution_id = %execution.execution_id, error = %e, "Failed to journal execution");
        }
    }
}
