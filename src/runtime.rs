use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::agents::{
    Agent, AgentConfig, AgentStateError, CapabilityRegistry, DiscardFailedTask, RecoveryHandler,
};
use crate::event_log::EventLog;
use crate::tasks::{ProcessOutcome, SchedulerConfig, TaskScheduler};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentStateError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Owns the event log, the scheduler, the capability registry and the agents
///
/// There are no process-wide registries; everything hangs off one runtime
/// value that the driver loop holds.
pub struct AgentRuntime {
    log: Arc<EventLog>,
    scheduler: Arc<TaskScheduler>,
    capabilities: Arc<CapabilityRegistry>,
    recovery: Arc<dyn RecoveryHandler>,
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    /// Serializes registrations so a duplicate id never reaches the event log
    registration: AsyncMutex<()>,
    poll_interval: Duration,
}

impl AgentRuntime {
    pub fn new(log: Arc<EventLog>, scheduler_config: SchedulerConfig, poll_interval: Duration) -> Self {
        Self {
            scheduler: Arc::new(TaskScheduler::new(log.clone(), scheduler_config)),
            log,
            capabilities: Arc::new(CapabilityRegistry::new()),
            recovery: Arc::new(DiscardFailedTask),
            agents: RwLock::new(HashMap::new()),
            registration: AsyncMutex::new(()),
            poll_interval,
        }
    }

    /// Replaces the recovery hook given to agents registered afterwards
    pub fn with_recovery_handler(mut self, recovery: Arc<dyn RecoveryHandler>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    /// Registers a new agent and records `AGENT_REGISTERED`
    pub async fn register_agent(&self, config: AgentConfig) -> RuntimeResult<Arc<Agent>> {
        let _guard = self.registration.lock().await;
        if self.agent(&config.id).is_some() {
            return Err(RuntimeError::DuplicateAgent(config.id));
        }

        let agent = Arc::new(
            Agent::register(
                config,
                self.log.clone(),
                self.capabilities.clone(),
                self.recovery.clone(),
            )
            .await?,
        );

        self.agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent.id().to_string(), agent.clone());
        Ok(agent)
    }

    pub fn agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .cloned()
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Gives every agent one `process_queue` call, concurrently
    ///
    /// Failures are logged per agent and do not stop the others.
    pub async fn tick(&self) -> Vec<ProcessOutcome> {
        let handles: Vec<_> = self
            .agents()
            .into_iter()
            .map(|agent| {
                let scheduler = self.scheduler.clone();
                tokio::spawn(async move {
                    let result = scheduler.process_queue(&agent).await;
                    (agent, result)
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((_, Ok(Some(outcome)))) => outcomes.push(outcome),
                Ok((_, Ok(None))) => {}
                Ok((agent, Err(e))) => {
                    tracing::error!(agent_id = %agent.id(), error = %e, "Queue processing failed");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Queue processing task panicked");
                }
            }
        }
        outcomes
    }

    /// Drives `tick` every poll interval until `shutdown` resolves
    ///
    /// Agents are started on entry and stopped on exit.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> RuntimeResult<()> {
        for agent in self.agents() {
            agent.start().await?;
        }

        tracing::info!(
            agents = self.agents().len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting driver loop"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcomes = self.tick().await;
                    if !outcomes.is_empty() {
                        tracing::debug!(dispatched = outcomes.len(), "Driver tick completed");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping driver loop");
                    break;
                }
            }
        }

        for agent in self.agents() {
            agent.stop().await?;
        }
        tracing::info!("Driver loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::domain::event::EventType;
    use crate::event_log::EventLogConfig;
    use crate::infrastructure::repositories::InMemoryEventStorage;

    fn runtime() -> AgentRuntime {
        let log = Arc::new(EventLog::new(
            Arc::new(InMemoryEventStorage::new()),
            Arc::new(SystemClock),
            EventLogConfig::default(),
        ));
        AgentRuntime::new(log, SchedulerConfig::default(), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn duplicate_agent_is_rejected() {
        let runtime = runtime();
        runtime
            .register_agent(AgentConfig::new("agent-1", vec![]))
            .await
            .unwrap();

        let result = runtime.register_agent(AgentConfig::new("agent-1", vec![])).await;

        assert!(matches!(result, Err(RuntimeError::DuplicateAgent(id)) if id == "agent-1"));
        assert_eq!(runtime.agents().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_duplicate_registration_records_one_event() {
        let runtime = Arc::new(runtime());

        let (first, second) = tokio::join!(
            runtime.register_agent(AgentConfig::new("agent-1", vec![])),
            runtime.register_agent(AgentConfig::new("agent-1", vec![])),
        );

        assert!(first.is_ok() != second.is_ok());
        let registered = runtime
            .log()
            .get_events("agent-1", None, None)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == EventType::AgentRegistered)
            .count();
        assert_eq!(registered, 1);
    }

    #[tokio::test]
    async fn run_brackets_the_loop_with_lifecycle_events() {
        let runtime = runtime();
        runtime
            .register_agent(AgentConfig::new("agent-1", vec![]))
            .await
            .unwrap();

        runtime
            .run(tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();

        let types: Vec<_> = runtime
            .log()
            .get_events("agent-1", None, None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                EventType::AgentRegistered,
                EventType::AgentStarted,
                EventType::AgentStopped
            ]
        );
    }
}
