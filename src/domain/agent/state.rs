use super::value_objects::{AgentStatus, TaskStatus};
use crate::domain::event::StateMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Outcome reported back to whoever handed the agent a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A unit of work handed to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub id: Uuid,
    /// Task type, resolved to a capability through the capability table
    #[serde(rename = "type")]
    pub task_type: String,
    pub parameters: Map<String, Value>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            parameters,
        }
    }
}

/// Agent-side record of the task it is holding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    pub parameters: Map<String, Value>,
    pub status: TaskStatus,
    pub progress: u8,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskExecution {
    pub fn start(request: TaskRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: request.id,
            task_type: request.task_type,
            parameters: request.parameters,
            status: TaskStatus::Running,
            progress: 0,
            result: None,
            error: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Marks the task completed with the capability's result
    pub fn complete(mut self, result: TaskResult, now: DateTime<Utc>) -> Self {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.completed_at = Some(now);
        self.updated_at = now;
        self
    }

    /// Marks the task failed with the error that stopped it
    pub fn fail(mut self, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// What to do with `current_task` on a transition
#[derive(Debug, Clone)]
pub enum CurrentTask {
    Keep,
    Set(TaskExecution),
    Clear,
}

/// Runtime state held by an agent
///
/// The in-memory value is a cache of the latest projection: every change goes
/// through [`AgentState::transitioned`] and is appended to the event log before
/// the cache is replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub id: String,
    pub status: AgentStatus,
    pub current_task: Option<TaskExecution>,
    /// Capability ids this agent may use
    pub tools: Vec<String>,
    pub metadata: AgentMetadata,
}

impl AgentState {
    pub fn new(id: impl Into<String>, tools: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: AgentStatus::Idle,
            current_task: None,
            tools,
            metadata: AgentMetadata {
                created_at: now,
                updated_at: now,
                last_active_at: None,
            },
        }
    }

    /// Returns the state after moving to `status`
    ///
    /// Does not check the transition table; callers decide legality first.
    pub fn transitioned(&self, status: AgentStatus, task: CurrentTask, now: DateTime<Utc>) -> Self {
        let current_task = match task {
            CurrentTask::Keep => self.current_task.clone(),
            CurrentTask::Set(task) => Some(task),
            CurrentTask::Clear => None,
        };

        Self {
            id: self.id.clone(),
            status,
            current_task,
            tools: self.tools.clone(),
            metadata: AgentMetadata {
                created_at: self.metadata.created_at,
                updated_at: now,
                last_active_at: Some(now),
            },
        }
    }

    /// The fields a `StateUpdated` event records for this state
    pub fn state_delta(&self) -> StateMap {
        let mut delta = StateMap::new();
        delta.insert("status".to_string(), Value::String(self.status.to_string()));
        delta.insert(
            "currentTask".to_string(),
            serde_json::to_value(&self.current_task).unwrap_or(Value::Null),
        );
        delta.insert(
            "updatedAt".to_string(),
            Value::String(self.metadata.updated_at.to_rfc3339()),
        );
        if let Some(last_active) = self.metadata.last_active_at {
            delta.insert(
                "lastActiveAt".to_string(),
                Value::String(last_active.to_rfc3339()),
            );
        }
        delta
    }
}
