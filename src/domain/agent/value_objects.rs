use serde::{Deserialize, Serialize};

/// Execution status of an agent
///
/// # Status Transitions
/// ```text
/// Idle -> Executing -> Idle
///            |   \---> Error -> Recovering -> Idle
///            v
///          Paused -> Executing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Ready to accept a task
    Idle,
    /// Running exactly one task
    Executing,
    /// Holding its task; no new task is dispatched
    Paused,
    /// The last task failed; waiting for recovery
    Error,
    /// Recovery in progress
    Recovering,
}

impl AgentStatus {
    /// Checks if a transition from current status to next status is valid
    ///
    /// # Valid Transitions
    /// - Idle -> Executing
    /// - Executing -> Idle
    /// - Executing -> Error
    /// - Executing -> Paused
    /// - Paused -> Executing
    /// - Error -> Recovering
    /// - Recovering -> Idle
    ///
    /// # Example
    /// ```
    /// use agent_ledger::domain::agent::AgentStatus;
    ///
    /// assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Executing));
    /// assert!(!AgentStatus::Error.can_transition_to(AgentStatus::Executing));
    /// ```
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Idle, Executing)
                | (Executing, Idle)
                | (Executing, Error)
                | (Executing, Paused)
                | (Paused, Executing)
                | (Error, Recovering)
                | (Recovering, Idle)
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Executing => write!(f, "executing"),
            AgentStatus::Paused => write!(f, "paused"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Recovering => write!(f, "recovering"),
        }
    }
}

/// Status of the task an agent is holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// How an agent should come back from the `Error` status
///
/// The strategy is handed to the agent's recovery handler; the default handler
/// discards the failed task for every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategy {
    Retry,
    Rollback,
    #[default]
    Skip,
    Manual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transition_idle_to_executing() {
        assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Executing));
    }

    #[test]
    fn valid_transitions_out_of_executing() {
        assert!(AgentStatus::Executing.can_transition_to(AgentStatus::Idle));
        assert!(AgentStatus::Executing.can_transition_to(AgentStatus::Error));
        assert!(AgentStatus::Executing.can_transition_to(AgentStatus::Paused));
    }

    #[test]
    fn valid_transition_paused_to_executing() {
        assert!(AgentStatus::Paused.can_transition_to(AgentStatus::Executing));
    }

    #[test]
    fn valid_recovery_path() {
        assert!(AgentStatus::Error.can_transition_to(AgentStatus::Recovering));
        assert!(AgentStatus::Recovering.can_transition_to(AgentStatus::Idle));
    }

    #[test]
    fn invalid_transition_idle_to_paused() {
        assert!(!AgentStatus::Idle.can_transition_to(AgentStatus::Paused));
    }

    #[test]
    fn invalid_transition_error_to_idle() {
        assert!(!AgentStatus::Error.can_transition_to(AgentStatus::Idle));
    }

    #[test]
    fn invalid_transition_paused_to_idle() {
        assert!(!AgentStatus::Paused.can_transition_to(AgentStatus::Idle));
    }

    #[test]
    fn no_self_transitions() {
        for status in [
            AgentStatus::Idle,
            AgentStatus::Executing,
            AgentStatus::Paused,
            AgentStatus::Error,
            AgentStatus::Recovering,
        ] {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn status_display() {
        assert_eq!(AgentStatus::Idle.to_string(), "idle");
        assert_eq!(AgentStatus::Executing.to_string(), "executing");
        assert_eq!(AgentStatus::Paused.to_string(), "paused");
        assert_eq!(AgentStatus::Error.to_string(), "error");
        assert_eq!(AgentStatus::Recovering.to_string(), "recovering");
    }

    #[test]
    fn finished_task_statuses() {
        assert!(TaskStatus::Completed.is_finished());
        assert!(TaskStatus::Failed.is_finished());
        assert!(!TaskStatus::Running.is_finished());
    }
}
