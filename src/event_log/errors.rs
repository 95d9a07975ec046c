use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::repositories::StorageError;

/// Errors surfaced by the event log
///
/// Every variant means nothing was committed for the event in question.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Event for agent {agent_id} at {attempted} is older than the last event at {last}")]
    OrderingViolation {
        agent_id: String,
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("STATE_UPDATED event {event_id} has no state delta")]
    MissingStateDelta { event_id: Uuid },

    #[error("Event storage failed: {0}")]
    Storage(#[from] StorageError),
}

pub type EventLogResult<T> = Result<T, EventLogError>;
