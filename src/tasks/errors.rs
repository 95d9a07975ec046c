use thiserror::Error;
use uuid::Uuid;

use crate::agents::AgentStateError;
use crate::domain::task::QueueStatus;
use crate::event_log::EventLogError;

/// Errors that can occur in the task registry and scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Task definition not found: {0}")]
    UnknownTask(String),

    #[error("Task definition already registered: {0}")]
    DuplicateTask(String),

    #[error("Invalid parameters for task {task_id}: {}", .errors.join("; "))]
    InvalidParameters { task_id: String, errors: Vec<String> },

    #[error("Task {task_id} already has a live schedule for agent {agent_id}")]
    DuplicateLiveSchedule { agent_id: String, task_id: String },

    #[error("Task instance {instance_id} not found for agent {agent_id}")]
    UnknownInstance { agent_id: String, instance_id: Uuid },

    #[error("Task instance {instance_id} cannot be cancelled while {status}")]
    NotCancellable { instance_id: Uuid, status: QueueStatus },

    #[error("Precondition failed for task {task_id}: {message}")]
    PreconditionFailed { task_id: String, message: String },

    #[error("Postcondition failed for task {task_id}: {message}")]
    PostconditionFailed { task_id: String, message: String },

    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentStateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
