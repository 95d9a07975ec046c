use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::errors::{SchedulerError, SchedulerResult};
use crate::agents::Agent;
use crate::domain::agent::{AgentStatus, TaskRequest, TaskResult};
use crate::domain::event::{EventDraft, EventType, SYSTEM_AGENT_ID};
use crate::domain::task::{QueueStatus, QueuedTask, TaskDefinition, TaskQueue, TaskSchedule};
use crate::event_log::EventLog;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Recover an agent found in `error` before dispatching to it
    pub auto_recover: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { auto_recover: true }
    }
}

/// What one `process_queue` call did
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub instance_id: Uuid,
    pub task_id: String,
    pub status: QueueStatus,
    pub attempts: u32,
    pub will_retry: bool,
}

/// Task registry plus per-agent queues
///
/// Definitions are immutable once registered. Queues are only mutated here;
/// readers get copies. `process_queue` calls for the same agent are serialized.
pub struct TaskScheduler {
    log: Arc<EventLog>,
    config: SchedulerConfig,
    definitions: RwLock<HashMap<String, Arc<TaskDefinition>>>,
    queues: Mutex<HashMap<String, TaskQueue>>,
    dispatch_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TaskScheduler {
    pub fn new(log: Arc<EventLog>, config: SchedulerConfig) -> Self {
        Self {
            log,
            config,
            definitions: RwLock::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            dispatch_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a definition to the registry
    ///
    /// # Arguments
    /// * `definition` - The definition; its id must not be registered yet
    ///
    /// # Returns
    /// `DuplicateTask` if the id is taken. On success `TASK_REGISTERED` is
    /// recorded for the `system` agent.
    pub async fn register_task(&self, definition: TaskDefinition) -> SchedulerResult<()> {
        let task_id = definition.id.clone();
        let data = json!({
            "taskId": definition.id,
            "name": definition.name,
            "version": definition.version,
            "toolRequirements": definition.tool_requirements,
        });

        {
            let mut definitions = self.definitions.write().unwrap_or_else(|e| e.into_inner());
            if definitions.contains_key(&task_id) {
                return Err(SchedulerError::DuplicateTask(task_id));
            }
            definitions.insert(task_id.clone(), Arc::new(definition));
        }

        if let Err(e) = self
            .log
            .emit(EventDraft::new(SYSTEM_AGENT_ID, EventType::TaskRegistered).data(data))
            .await
        {
            self.definitions
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&task_id);
            return Err(e.into());
        }

        tracing::info!(task_id = %task_id, "Task definition registered");
        Ok(())
    }

    pub fn definition(&self, task_id: &str) -> Option<Arc<TaskDefinition>> {
        self.definitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned()
    }

    /// Queues a task instance for an agent
    ///
    /// Parameters are validated against the definition and defaults filled in.
    /// Only one live instance per `(agent, task)` is allowed.
    ///
    /// # Returns
    /// The id of the new queue instance
    pub async fn schedule_task(&self, schedule: TaskSchedule) -> SchedulerResult<Uuid> {
        let definition = self
            .definition(&schedule.task_id)
            .ok_or_else(|| SchedulerError::UnknownTask(schedule.task_id.clone()))?;

        let parameters = definition
            .normalize_parameters(&schedule.parameters)
            .map_err(|errors| SchedulerError::InvalidParameters {
                task_id: schedule.task_id.clone(),
                errors,
            })?;
        let schedule = TaskSchedule {
            parameters,
            ..schedule
        };

        let now = self.log.clock().now();
        let task = QueuedTask::new(schedule);
        let instance_id = task.id;
        let agent_id = task.schedule.agent_id.clone();
        let task_id = task.schedule.task_id.clone();
        let data = json!({
            "instanceId": instance_id,
            "taskId": task_id,
            "priority": task.schedule.priority,
            "scheduledTime": task.schedule.scheduled_time,
            "dependencies": task.schedule.dependencies,
        });

        {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            let queue = queues
                .entry(agent_id.clone())
                .or_insert_with(|| TaskQueue::new(agent_id.clone(), now));
            if queue.has_live(&task_id) {
                return Err(SchedulerError::DuplicateLiveSchedule { agent_id, task_id });
            }
            queue.push(task, now);
        }

        let emitted = self
            .log
            .emit(
                EventDraft::new(&agent_id, EventType::TaskScheduled)
                    .data(data)
                    .correlation_id(instance_id),
            )
            .await;
        if let Err(e) = emitted {
            self.withdraw(&agent_id, instance_id);
            return Err(e.into());
        }

        tracing::info!(
            agent_id = %agent_id,
            task_id = %task_id,
            instance_id = %instance_id,
            "Task scheduled"
        );
        Ok(instance_id)
    }

    /// Drops a just-queued instance whose `TASK_SCHEDULED` could not be recorded
    fn withdraw(&self, agent_id: &str, instance_id: Uuid) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(queue) = queues.get_mut(agent_id) {
            queue
                .tasks
                .retain(|t| t.id != instance_id || t.status != QueueStatus::Pending);
        }
    }

    /// Runs at most one ready task on `agent`
    ///
    /// Ready means pending (or retrying with its backoff elapsed), scheduled
    /// time reached and every dependency completed. The highest priority wins,
    /// earliest scheduled time breaks ties. Task failures are recorded on the
    /// instance and never returned as errors.
    ///
    /// # Returns
    /// `None` when the agent is not idle or nothing is ready
    pub async fn process_queue(&self, agent: &Agent) -> SchedulerResult<Option<ProcessOutcome>> {
        let lock = self.dispatch_lock(agent.id());
        let _guard = lock.lock().await;

        match agent.status().await {
            AgentStatus::Idle => {}
            AgentStatus::Error if self.config.auto_recover => {
                tracing::info!(agent_id = %agent.id(), "Recovering agent before dispatch");
                agent.recover().await?;
            }
            status => {
                tracing::debug!(agent_id = %agent.id(), status = %status, "Agent not ready for dispatch");
                return Ok(None);
            }
        }

        let now = self.log.clock().now();
        let (instance_id, schedule) = {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            let Some(queue) = queues.get_mut(agent.id()) else {
                return Ok(None);
            };
            let Some(instance_id) = queue.next_ready(now).map(|t| t.id) else {
                return Ok(None);
            };
            let Some(task) = queue.get_mut(instance_id) else {
                return Ok(None);
            };
            task.begin_attempt(now);
            let schedule = task.schedule.clone();
            queue.metadata.updated_at = now;
            (instance_id, schedule)
        };

        let definition = self.definition(&schedule.task_id);
        let outcome = match &definition {
            Some(definition) => self.attempt(agent, definition, &schedule).await,
            None => Err(SchedulerError::UnknownTask(schedule.task_id.clone()).to_string()),
        };
        let retry_policy = definition.as_ref().and_then(|d| d.retry_policy);

        let now = self.log.clock().now();
        let (attempts, result, will_retry, next_attempt) = {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            let task = queues
                .get_mut(agent.id())
                .and_then(|queue| queue.get_mut(instance_id))
                .ok_or_else(|| SchedulerError::UnknownInstance {
                    agent_id: agent.id().to_string(),
                    instance_id,
                })?;

            match outcome {
                Ok(result) => {
                    task.complete(result.clone());
                    (task.attempts, Ok(result), false, None)
                }
                Err(error) => {
                    let will_retry = task.fail(error.clone(), retry_policy.as_ref(), now);
                    (task.attempts, Err(error), will_retry, task.next_attempt)
                }
            }
        };

        let (event_type, data, status) = match result {
            Ok(result) => {
                tracing::info!(
                    agent_id = %agent.id(),
                    task_id = %schedule.task_id,
                    attempts,
                    "Task completed"
                );
                (
                    EventType::TaskCompleted,
                    json!({
                        "instanceId": instance_id,
                        "taskId": schedule.task_id,
                        "attempts": attempts,
                        "result": result,
                    }),
                    QueueStatus::Completed,
                )
            }
            Err(error) => {
                tracing::warn!(
                    agent_id = %agent.id(),
                    task_id = %schedule.task_id,
                    attempts,
                    will_retry,
                    error = %error,
                    "Task attempt failed"
                );
                let status = if will_retry {
                    QueueStatus::Retrying
                } else {
                    QueueStatus::Failed
                };
                (
                    EventType::TaskFailed,
                    json!({
                        "instanceId": instance_id,
                        "taskId": schedule.task_id,
                        "attempts": attempts,
                        "error": error,
                        "willRetry": will_retry,
                        "nextAttempt": next_attempt,
                    }),
                    status,
                )
            }
        };

        self.log
            .emit(
                EventDraft::new(agent.id(), event_type)
                    .data(data)
                    .correlation_id(instance_id),
            )
            .await?;

        Ok(Some(ProcessOutcome {
            instance_id,
            task_id: schedule.task_id,
            status,
            attempts,
            will_retry,
        }))
    }

    /// One attempt: preconditions, the agent call, then postconditions
    async fn attempt(
        &self,
        agent: &Agent,
        definition: &TaskDefinition,
        schedule: &TaskSchedule,
    ) -> Result<TaskResult, String> {
        if let Some(failed) = definition
            .preconditions()
            .iter()
            .find(|condition| !condition.check(&schedule.parameters))
        {
            return Err(SchedulerError::PreconditionFailed {
                task_id: definition.id.clone(),
                message: failed.message.clone(),
            }
            .to_string());
        }

        let request = TaskRequest::new(definition.id.clone(), schedule.parameters.clone());
        let result = agent.execute_task(request).await.map_err(|e| e.to_string())?;
        if !result.success {
            return Err(result
                .error
                .unwrap_or_else(|| "Task reported failure".to_string()));
        }

        if let Some(failed) = definition
            .postconditions()
            .iter()
            .find(|condition| !condition.check(&result))
        {
            return Err(SchedulerError::PostconditionFailed {
                task_id: definition.id.clone(),
                message: failed.message.clone(),
            }
            .to_string());
        }

        Ok(result)
    }

    /// Cancels a waiting instance
    ///
    /// Executing and terminal instances cannot be cancelled.
    pub async fn cancel_task(&self, agent_id: &str, instance_id: Uuid) -> SchedulerResult<()> {
        let task_id = {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            let task = queues
                .get_mut(agent_id)
                .and_then(|queue| queue.get_mut(instance_id))
                .ok_or_else(|| SchedulerError::UnknownInstance {
                    agent_id: agent_id.to_string(),
                    instance_id,
                })?;
            if !task.status.can_transition_to(QueueStatus::Cancelled) {
                return Err(SchedulerError::NotCancellable {
                    instance_id,
                    status: task.status,
                });
            }
            task.status = QueueStatus::Cancelled;
            task.next_attempt = None;
            task.schedule.task_id.clone()
        };

        self.log
            .emit(
                EventDraft::new(agent_id, EventType::TaskCancelled)
                    .data(json!({ "instanceId": instance_id, "taskId": task_id }))
                    .correlation_id(instance_id),
            )
            .await?;

        tracing::info!(agent_id = %agent_id, task_id = %task_id, "Task cancelled");
        Ok(())
    }

    /// A copy of the agent's queue
    pub fn queue(&self, agent_id: &str) -> Option<TaskQueue> {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .cloned()
    }

    /// A copy of one queued instance
    pub fn task(&self, agent_id: &str, instance_id: Uuid) -> Option<QueuedTask> {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .and_then(|queue| queue.get(instance_id))
            .cloned()
    }

    fn dispatch_lock(&self, agent_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.dispatch_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
