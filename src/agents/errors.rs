use thiserror::Error;

use crate::domain::agent::AgentStatus;
use crate::event_log::EventLogError;

/// Errors raised by the agent state machine
#[derive(Debug, Error)]
pub enum AgentStateError {
    #[error("Agent {agent_id} is already executing a task")]
    AlreadyExecuting { agent_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },

    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),
}

pub type AgentResult<T> = Result<T, AgentStateError>;

/// Errors from resolving or running a capability
///
/// These never escape `Agent::execute_task`; they come back as a failed
/// `TaskResult`.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("No capability mapped for task type: {0}")]
    Unresolved(String),

    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Capability {0} already registered")]
    AlreadyRegistered(String),

    #[error("Capability {capability_id} is not available to agent {agent_id}")]
    NotPermitted {
        capability_id: String,
        agent_id: String,
    },

    #[error("Capability {0} rejected the parameters")]
    InvalidParameters(String),

    #[error("Capability configuration failed: {0}")]
    Configuration(String),

    #[error("Capability execution failed: {0}")]
    ExecutionFailed(String),
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;
