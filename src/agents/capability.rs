use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::errors::{CapabilityError, CapabilityResult};
use crate::domain::agent::TaskResult;

/// Settings handed to a capability once, at registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityConfig {
    #[serde(default)]
    pub settings: Map<String, Value>,
}

/// One invocation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityParams {
    pub action: String,
    pub parameters: Map<String, Value>,
}

/// A pluggable tool an agent can invoke
///
/// Implementations live outside this crate (mail, calendar, storage, ...).
/// `execute` may report a soft failure through `TaskResult::success`; an `Err`
/// means the call itself broke and puts the agent into its error state.
#[async_trait]
pub trait Capability: Send + Sync {
    fn id(&self) -> &str;

    async fn configure(&self, config: &CapabilityConfig) -> CapabilityResult<()>;

    async fn validate(&self, params: &CapabilityParams) -> bool;

    async fn execute(&self, params: CapabilityParams) -> CapabilityResult<TaskResult>;

    async fn handle_error(&self, error: &CapabilityError);
}

/// Registered capabilities plus the task-type routing table
///
/// Resolution is a plain table lookup; a task type with no route is an error.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, Arc<dyn Capability>>>,
    routes: RwLock<HashMap<String, String>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures and registers a capability
    ///
    /// # Returns
    /// `AlreadyRegistered` if the id is taken, or the capability's own
    /// configuration error
    pub async fn register(
        &self,
        capability: Arc<dyn Capability>,
        config: &CapabilityConfig,
    ) -> CapabilityResult<()> {
        let id = capability.id().to_string();
        if self.contains(&id) {
            return Err(CapabilityError::AlreadyRegistered(id));
        }

        capability.configure(config).await?;

        let mut capabilities = self.capabilities.write().unwrap_or_else(|e| e.into_inner());
        if capabilities.contains_key(&id) {
            return Err(CapabilityError::AlreadyRegistered(id));
        }
        capabilities.insert(id.clone(), capability);
        tracing::info!(capability_id = %id, "Capability registered");
        Ok(())
    }

    /// Routes every task of `task_type` to the capability `capability_id`
    pub fn map(&self, task_type: impl Into<String>, capability_id: &str) -> CapabilityResult<()> {
        if !self.contains(capability_id) {
            return Err(CapabilityError::NotFound(capability_id.to_string()));
        }
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_type.into(), capability_id.to_string());
        Ok(())
    }

    pub fn get(&self, capability_id: &str) -> CapabilityResult<Arc<dyn Capability>> {
        self.capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(capability_id)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound(capability_id.to_string()))
    }

    /// The capability routed for `task_type`
    pub fn resolve(&self, task_type: &str) -> CapabilityResult<Arc<dyn Capability>> {
        let capability_id = self
            .routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_type)
            .cloned()
            .ok_or_else(|| CapabilityError::Unresolved(task_type.to_string()))?;
        self.get(&capability_id)
    }

    fn contains(&self, capability_id: &str) -> bool {
        self.capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(capability_id)
    }
}
