use async_trait::async_trait;

use crate::domain::agent::{RecoveryStrategy, TaskExecution};

/// What happens to the failed task when an agent recovers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Clear `current_task`
    Discard,
    /// Leave the failed task on the agent for inspection
    Retain,
}

/// Hook run between `recovering` and `idle`
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn recover(
        &self,
        agent_id: &str,
        strategy: RecoveryStrategy,
        failed_task: Option<&TaskExecution>,
    ) -> RecoveryOutcome;
}

/// Baseline recovery: drop the failed task whatever the strategy
///
/// Retrying is the scheduler's job through the task's retry policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardFailedTask;

#[async_trait]
impl RecoveryHandler for DiscardFailedTask {
    async fn recover(
        &self,
        agent_id: &str,
        strategy: RecoveryStrategy,
        failed_task: Option<&TaskExecution>,
    ) -> RecoveryOutcome {
        tracing::info!(
            agent_id = %agent_id,
            strategy = ?strategy,
            task_id = ?failed_task.map(|t| t.id),
            "Discarding failed task during recovery"
        );
        RecoveryOutcome::Discard
    }
}
