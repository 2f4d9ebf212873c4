//! Cloud provider boundary

use crate::config::LaunchTemplate;
use crate::error::ProviderError;
use crate::models::InstanceState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Tag key identifying instances this subsystem manages
pub const MANAGED_BY_TAG: &str = "ManagedBy";
pub const MANAGED_BY_VALUE: &str = "AutoScalingSystem";

/// Everything needed to launch one instance
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub subnet_id: String,
    pub user_data: String,
    pub tags: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Launch parameters from the template plus the management tags
    pub fn from_template(template: &LaunchTemplate, now: DateTime<Utc>) -> Self {
        let mut tags = template.extra_tags.clone();
        tags.insert(MANAGED_BY_TAG.to_string(), MANAGED_BY_VALUE.to_string());
        tags.insert("Purpose".to_string(), "AutoScaling".to_string());
        tags.insert("Name".to_string(), format!("autoscaler-{}", now.timestamp()));

        Self {
            image_id: template.image_id.clone(),
            instance_type: template.instance_type.clone(),
            key_name: template.key_name.clone(),
            security_group_ids: template.security_group_ids.clone(),
            subnet_id: template.subnet_id.clone(),
            user_data: template.user_data.clone(),
            tags,
        }
    }
}

/// Provider view of one instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub instance_type: String,
    pub state: InstanceState,
    pub launched_at: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
}

impl InstanceDescription {
    pub fn is_managed(&self) -> bool {
        self.tags.get(MANAGED_BY_TAG).map(String::as_str) == Some(MANAGED_BY_VALUE)
    }
}

/// Instance and load balancer operations the executor relies on
///
/// Any call may fail transiently. Only the running-state poll retries;
/// every other failure ends the execution.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Launch one instance and return its id
    async fn create_instance(&self, spec: &LaunchSpec) -> Result<String, ProviderError>;

    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceDescription>, ProviderError>;

    /// Every non-terminated instance carrying the management tag
    async fn list_managed(&self) -> Result<Vec<InstanceDescription>, ProviderError>;

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<(), ProviderError>;

    async fn register_targets(
        &self,
        target_group: &str,
        instance_ids: &[String],
        port: u16,
    ) -> Result<(), ProviderError>;

    async fn deregister_targets(
        &self,
        target_group: &str,
        instance_ids: &[String],
        port: u16,
    ) -> Result<(), ProviderError>;
}
