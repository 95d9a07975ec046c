use serde::{Deserialize, Serialize};

/// Lifecycle status of a queued task instance
///
/// # Status Transitions
/// ```text
/// Pending -> Executing -> Completed
///    |           \-----> Retrying -> Executing
///    |            \----> Failed
///    \---> Cancelled          (Retrying -> Cancelled as well)
/// ```
///
/// `Scheduled` and `Blocked` are part of the stored vocabulary for external
/// tooling; the scheduler itself keeps waiting instances in `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Scheduled,
    Blocked,
    Executing,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    /// Completed, failed and cancelled instances never run again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }

    /// Checks if a transition from current status to next status is valid
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        use QueueStatus::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Scheduled, Executing)
                | (Retrying, Executing)
                | (Executing, Completed)
                | (Executing, Retrying)
                | (Executing, Failed)
                | (Pending, Cancelled)
                | (Scheduled, Cancelled)
                | (Blocked, Cancelled)
                | (Retrying, Cancelled)
        )
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Scheduled => "scheduled",
            QueueStatus::Blocked => "blocked",
            QueueStatus::Executing => "executing",
            QueueStatus::Retrying => "retrying",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
