use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::capability::{CapabilityParams, CapabilityRegistry};
use super::errors::{AgentResult, AgentStateError, CapabilityError};
use super::recovery::{RecoveryHandler, RecoveryOutcome};
use crate::domain::agent::{
    AgentState, AgentStatus, CurrentTask, RecoveryStrategy, TaskExecution, TaskRequest,
    TaskResult, TaskStatus,
};
use crate::domain::event::{AgentEvent, EventDraft, EventType};
use crate::event_log::EventLog;

/// Registration settings for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub id: String,
    /// Capability ids the agent may invoke
    pub tools: Vec<String>,
    #[serde(default)]
    pub recovery_strategy: RecoveryStrategy,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, tools: Vec<String>) -> Self {
        Self {
            id: id.into(),
            tools,
            recovery_strategy: RecoveryStrategy::default(),
        }
    }

    pub fn with_recovery_strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.recovery_strategy = strategy;
        self
    }
}

/// Single-task execution unit with an explicit status machine
///
/// Every status change is appended to the event log before the in-memory state
/// is replaced. The state lock is held across the check and the append, so two
/// concurrent `execute_task` calls cannot both leave `Idle`. It is not held
/// while a capability runs, which keeps `pause` and `state` responsive.
pub struct Agent {
    id: String,
    state: Mutex<AgentState>,
    recovery_strategy: RecoveryStrategy,
    log: Arc<EventLog>,
    capabilities: Arc<CapabilityRegistry>,
    recovery: Arc<dyn RecoveryHandler>,
}

impl Agent {
    /// Creates an idle agent and records `AGENT_REGISTERED`
    ///
    /// # Arguments
    /// * `config` - Agent id, tool allow-list and recovery strategy
    /// * `log` - Event log every transition is written to
    /// * `capabilities` - Registry used to resolve task types
    /// * `recovery` - Hook run by `recover()`
    pub async fn register(
        config: AgentConfig,
        log: Arc<EventLog>,
        capabilities: Arc<CapabilityRegistry>,
        recovery: Arc<dyn RecoveryHandler>,
    ) -> AgentResult<Self> {
        let state = AgentState::new(config.id.clone(), config.tools.clone(), log.clock().now());

        log.emit(EventDraft::new(&config.id, EventType::AgentRegistered).data(json!({
            "tools": config.tools,
            "recoveryStrategy": config.recovery_strategy,
        })))
        .await?;

        tracing::info!(agent_id = %config.id, tools = ?config.tools, "Agent registered");

        Ok(Self {
            id: config.id,
            state: Mutex::new(state),
            recovery_strategy: config.recovery_strategy,
            log,
            capabilities,
            recovery,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// A copy of the current state
    pub async fn state(&self) -> AgentState {
        self.state.lock().await.clone()
    }

    pub async fn status(&self) -> AgentStatus {
        self.state.lock().await.status
    }

    /// Records `AGENT_STARTED`; the status machine is untouched
    pub async fn start(&self) -> AgentResult<()> {
        self.log
            .emit(EventDraft::new(&self.id, EventType::AgentStarted))
            .await?;
        tracing::info!(agent_id = %self.id, "Agent started");
        Ok(())
    }

    /// Records `AGENT_STOPPED`; the status machine is untouched
    pub async fn stop(&self) -> AgentResult<()> {
        self.log
            .emit(EventDraft::new(&self.id, EventType::AgentStopped))
            .await?;
        tracing::info!(agent_id = %self.id, "Agent stopped");
        Ok(())
    }

    /// Records `ASSISTANCE_REQUESTED` for whoever delivers notifications
    pub async fn request_assistance(&self, reason: &str) -> AgentResult<AgentEvent> {
        let state = self.state.lock().await;
        let event = self
            .log
            .emit(EventDraft::new(&self.id, EventType::AssistanceRequested).data(json!({
                "reason": reason,
                "status": state.status,
                "taskId": state.current_task.as_ref().map(|t| t.id),
            })))
            .await?;
        tracing::warn!(agent_id = %self.id, reason = %reason, "Assistance requested");
        Ok(event)
    }

    /// Runs one task to completion
    ///
    /// # Returns
    /// The capability's result. Resolution and capability failures come back
    /// as `success: false` and leave the agent in `Error`; only state machine
    /// and event log failures are `Err`.
    pub async fn execute_task(&self, request: TaskRequest) -> AgentResult<TaskResult> {
        let correlation_id = request.id;

        let (task, tools) = {
            let mut state = self.state.lock().await;
            match state.status {
                AgentStatus::Idle => {}
                AgentStatus::Executing => {
                    return Err(AgentStateError::AlreadyExecuting {
                        agent_id: self.id.clone(),
                    })
                }
                from => {
                    return Err(AgentStateError::InvalidTransition {
                        from,
                        to: AgentStatus::Executing,
                    })
                }
            }

            let now = self.now();
            let task = TaskExecution::start(request.clone(), now);
            let next = state.transitioned(AgentStatus::Executing, CurrentTask::Set(task.clone()), now);
            self.record(&state, &next, correlation_id).await?;
            *state = next;
            (task, state.tools.clone())
        };

        tracing::info!(
            agent_id = %self.id,
            task_id = %task.id,
            task_type = %task.task_type,
            "Executing task"
        );

        let outcome = self.invoke(&tools, &request).await;
        let now = self.now();
        let (finished, result) = match outcome {
            Ok(result) => (task.complete(result.clone(), now), result),
            Err(error) => {
                let message = error.to_string();
                tracing::warn!(agent_id = %self.id, task_id = %task.id, error = %message, "Task failed");
                self.audit(
                    EventDraft::new(&self.id, EventType::ErrorOccurred)
                        .data(json!({
                            "error": message,
                            "taskId": task.id,
                            "taskType": task.task_type,
                        }))
                        .correlation_id(correlation_id),
                )
                .await;
                (task.fail(message.clone(), now), TaskResult::failed(message))
            }
        };

        self.settle(finished, correlation_id).await?;
        Ok(result)
    }

    /// Moves `Executing -> Paused`; an in-flight capability call keeps running
    pub async fn pause(&self) -> AgentResult<()> {
        let mut state = self.state.lock().await;
        require(&state, AgentStatus::Executing, AgentStatus::Paused)?;

        let next = state.transitioned(AgentStatus::Paused, CurrentTask::Keep, self.now());
        self.record(&state, &next, Uuid::new_v4()).await?;
        *state = next;
        tracing::info!(agent_id = %self.id, "Agent paused");
        Ok(())
    }

    /// Moves `Paused -> Executing`
    ///
    /// If the task finished while paused, the agent settles straight away to
    /// `Idle` or `Error`.
    pub async fn resume(&self) -> AgentResult<()> {
        let mut state = self.state.lock().await;
        require(&state, AgentStatus::Paused, AgentStatus::Executing)?;
        let correlation_id = Uuid::new_v4();

        let next = state.transitioned(AgentStatus::Executing, CurrentTask::Keep, self.now());
        self.record(&state, &next, correlation_id).await?;
        *state = next;
        tracing::info!(agent_id = %self.id, "Agent resumed");

        let finished = state
            .current_task
            .as_ref()
            .filter(|task| task.status.is_finished())
            .map(settled_status);
        if let Some(status) = finished {
            let settled = state.transitioned(status, CurrentTask::Keep, self.now());
            self.record(&state, &settled, correlation_id).await?;
            *state = settled;
        }
        Ok(())
    }

    /// Moves `Error -> Recovering -> Idle`, running the recovery handler between
    pub async fn recover(&self) -> AgentResult<()> {
        let mut state = self.state.lock().await;
        require(&state, AgentStatus::Error, AgentStatus::Recovering)?;
        let correlation_id = Uuid::new_v4();

        let recovering = state.transitioned(AgentStatus::Recovering, CurrentTask::Keep, self.now());
        self.record(&state, &recovering, correlation_id).await?;
        *state = recovering;

        let outcome = self
            .recovery
            .recover(&self.id, self.recovery_strategy, state.current_task.as_ref())
            .await;
        let task = match outcome {
            RecoveryOutcome::Discard => CurrentTask::Clear,
            RecoveryOutcome::Retain => CurrentTask::Keep,
        };

        let idle = state.transitioned(AgentStatus::Idle, task, self.now());
        self.record(&state, &idle, correlation_id).await?;
        *state = idle;
        tracing::info!(agent_id = %self.id, outcome = ?outcome, "Agent recovered");
        Ok(())
    }

    /// Records the finished task, leaving `Executing` unless paused meanwhile
    ///
    /// While paused the outcome is still written as a `STATE_UPDATED` whose
    /// previous and new status are both `Paused`. Such an event carries the
    /// task delta only and is not a status transition; `resume()` performs the
    /// `Executing -> Idle | Error` move.
    async fn settle(&self, finished: TaskExecution, correlation_id: Uuid) -> AgentResult<()> {
        let mut state = self.state.lock().await;
        let status = match state.status {
            AgentStatus::Executing => settled_status(&finished),
            AgentStatus::Paused => AgentStatus::Paused,
            from => {
                return Err(AgentStateError::InvalidTransition {
                    from,
                    to: settled_status(&finished),
                })
            }
        };

        let next = state.transitioned(status, CurrentTask::Set(finished), self.now());
        self.record(&state, &next, correlation_id).await?;
        *state = next;
        Ok(())
    }

    /// Resolves and calls the capability for `request`
    async fn invoke(
        &self,
        tools: &[String],
        request: &TaskRequest,
    ) -> Result<TaskResult, CapabilityError> {
        let capability = self.capabilities.resolve(&request.task_type)?;
        let capability_id = capability.id().to_string();
        if !tools.iter().any(|tool| *tool == capability_id) {
            return Err(CapabilityError::NotPermitted {
                capability_id,
                agent_id: self.id.clone(),
            });
        }

        let params = CapabilityParams {
            action: request.task_type.clone(),
            parameters: request.parameters.clone(),
        };
        if !capability.validate(&params).await {
            let error = CapabilityError::InvalidParameters(capability_id);
            capability.handle_error(&error).await;
            return Err(error);
        }

        let outcome = capability.execute(params).await;
        if let Err(error) = &outcome {
            capability.handle_error(error).await;
        }

        self.audit(
            EventDraft::new(&self.id, EventType::ToolAccessed)
                .data(json!({
                    "toolId": capability_id,
                    "action": request.task_type,
                    "taskId": request.id,
                    "success": matches!(&outcome, Ok(result) if result.success),
                }))
                .correlation_id(request.id),
        )
        .await;

        outcome
    }

    /// Appends the `STATE_UPDATED` event for `previous -> next`
    async fn record(
        &self,
        previous: &AgentState,
        next: &AgentState,
        correlation_id: Uuid,
    ) -> AgentResult<()> {
        let draft = EventDraft::new(&self.id, EventType::StateUpdated)
            .data(json!({
                "previousState": previous,
                "newState": next,
            }))
            .state_delta(next.state_delta())
            .correlation_id(correlation_id);
        self.log.emit(draft).await?;

        tracing::debug!(
            agent_id = %self.id,
            from = %previous.status,
            to = %next.status,
            "Agent state updated"
        );
        Ok(())
    }

    /// Appends an audit event; a failure is logged, not propagated
    async fn audit(&self, draft: EventDraft) {
        let event_type = draft.event_type;
        if let Err(e) = self.log.emit(draft).await {
            tracing::error!(
                agent_id = %self.id,
                event_type = %event_type,
                error = %e,
                "Failed to record audit event"
            );
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.log.clock().now()
    }
}

fn require(state: &AgentState, expected: AgentStatus, to: AgentStatus) -> AgentResult<()> {
    if state.status != expected {
        return Err(AgentStateError::InvalidTransition {
            from: state.status,
            to,
        });
    }
    Ok(())
}

fn settled_status(task: &TaskExecution) -> AgentStatus {
    match task.status {
        TaskStatus::Failed => AgentStatus::Error,
        _ => AgentStatus::Idle,
    }
}
