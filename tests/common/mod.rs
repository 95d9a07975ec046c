//! Shared fixtures for the integration tests
#![allow(dead_code)]

use agent_ledger::agents::{
    Agent, AgentConfig, Capability, CapabilityConfig, CapabilityError, CapabilityParams,
    CapabilityResult,
};
use agent_ledger::clock::{Clock, ManualClock};
use agent_ledger::domain::agent::TaskResult;
use agent_ledger::event_log::{EventLog, EventLogConfig};
use agent_ledger::infrastructure::repositories::InMemoryEventStorage;
use agent_ledger::runtime::AgentRuntime;
use agent_ledger::tasks::SchedulerConfig;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
}

/// One scripted response of a [`ScriptedCapability`]
#[derive(Clone)]
pub enum Step {
    Succeed(Value),
    /// Returns `success: false`
    SoftFail(String),
    /// Returns `Err`, putting the agent into its error state
    Fail(String),
    /// Waits for the notify, then succeeds
    Wait(Arc<Notify>),
}

/// Capability that replays scripted steps, then succeeds forever
pub struct ScriptedCapability {
    id: String,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    errors_handled: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new(id: &str, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            errors_handled: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn errors_handled(&self) -> usize {
        self.errors_handled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    fn id(&self) -> &str {
        &self.id
    }

    async fn configure(&self, _config: &CapabilityConfig) -> CapabilityResult<()> {
        Ok(())
    }

    async fn validate(&self, params: &CapabilityParams) -> bool {
        params.parameters.get("invalid").is_none()
    }

    async fn execute(&self, _params: CapabilityParams) -> CapabilityResult<TaskResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(TaskResult::ok(None)),
            Some(Step::Succeed(data)) => Ok(TaskResult::ok(Some(data))),
            Some(Step::SoftFail(error)) => Ok(TaskResult::failed(error)),
            Some(Step::Fail(error)) => Err(CapabilityError::ExecutionFailed(error)),
            Some(Step::Wait(gate)) => {
                gate.notified().await;
                Ok(TaskResult::ok(None))
            }
        }
    }

    async fn handle_error(&self, _error: &CapabilityError) {
        self.errors_handled.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub runtime: AgentRuntime,
    pub clock: Arc<ManualClock>,
    pub storage: InMemoryEventStorage,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_scheduler(SchedulerConfig::default())
    }

    pub fn with_scheduler(config: SchedulerConfig) -> Self {
        let storage = InMemoryEventStorage::new();
        let clock = Arc::new(ManualClock::new(start_time()));
        let log = Arc::new(EventLog::new(
            Arc::new(storage.clone()),
            clock.clone(),
            EventLogConfig::default(),
        ));
        let runtime = AgentRuntime::new(log, config, Duration::from_millis(10));
        Self {
            runtime,
            clock,
            storage,
        }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        self.runtime.log()
    }

    /// Registers `capability`, routes `task_types` to it and registers an agent
    /// allowed to use it
    pub async fn agent(
        &self,
        agent_id: &str,
        capability: Arc<ScriptedCapability>,
        task_types: &[&str],
    ) -> Arc<Agent> {
        let capabilities = self.runtime.capabilities();
        let capability_id = capability.id().to_string();
        if capabilities.get(&capability_id).is_err() {
            capabilities
                .register(capability, &CapabilityConfig::default())
                .await
                .unwrap();
        }
        for task_type in task_types {
            capabilities.map(*task_type, &capability_id).unwrap();
        }

        self.runtime
            .register_agent(AgentConfig::new(agent_id, vec![capability_id]))
            .await
            .unwrap()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_ms(&self, ms: i64) {
        self.clock.advance(chrono::Duration::milliseconds(ms));
    }
}
