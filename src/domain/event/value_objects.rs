use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of facts the event log accepts
///
/// Serialized in `SCREAMING_SNAKE_CASE`, which is also the form stored in the
/// `event_type` column of the Postgres adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// An agent was registered with the runtime
    AgentRegistered,
    /// An agent was started by its driver
    AgentStarted,
    /// An agent was stopped by its driver
    AgentStopped,
    /// The agent state machine moved (requires a state delta)
    StateUpdated,
    /// A capability was invoked
    ToolAccessed,
    /// An agent asked for human assistance
    AssistanceRequested,
    /// A task definition entered the registry
    TaskRegistered,
    /// A task instance was queued for an agent
    TaskScheduled,
    /// A task instance finished successfully
    TaskCompleted,
    /// A task instance attempt failed
    TaskFailed,
    /// A task instance was cancelled before running
    TaskCancelled,
    /// An error surfaced while an agent was working
    ErrorOccurred,
}

impl EventType {
    pub const ALL: [EventType; 12] = [
        EventType::AgentRegistered,
        EventType::AgentStarted,
        EventType::AgentStopped,
        EventType::StateUpdated,
        EventType::ToolAccessed,
        EventType::AssistanceRequested,
        EventType::TaskRegistered,
        EventType::TaskScheduled,
        EventType::TaskCompleted,
        EventType::TaskFailed,
        EventType::TaskCancelled,
        EventType::ErrorOccurred,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentRegistered => "AGENT_REGISTERED",
            EventType::AgentStarted => "AGENT_STARTED",
            EventType::AgentStopped => "AGENT_STOPPED",
            EventType::StateUpdated => "STATE_UPDATED",
            EventType::ToolAccessed => "TOOL_ACCESSED",
            EventType::AssistanceRequested => "ASSISTANCE_REQUESTED",
            EventType::TaskRegistered => "TASK_REGISTERED",
            EventType::TaskScheduled => "TASK_SCHEDULED",
            EventType::TaskCompleted => "TASK_COMPLETED",
            EventType::TaskFailed => "TASK_FAILED",
            EventType::TaskCancelled => "TASK_CANCELLED",
            EventType::ErrorOccurred => "ERROR_OCCURRED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown event type: {}", s))
    }
}
