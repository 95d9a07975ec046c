use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ops::Bound;
use thiserror::Error;

use crate::domain::event::{AgentEvent, Snapshot, StateMap};
use crate::domain::projection::ProjectionWrite;

/// Failures reported by a storage adapter
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Projection update failed: {0}")]
    Projection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transaction already finished")]
    TransactionClosed,
}

/// Storage contract behind the event log
///
/// Defines the contract for persisting events, projections and snapshots.
/// Implementations should handle database-specific details. Events for one
/// agent are returned ascending by timestamp, ties in insertion order.
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Open a transaction; nothing written through it is visible before commit
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError>;

    /// The newest event recorded for an agent
    async fn last_event(&self, agent_id: &str) -> Result<Option<AgentEvent>, StorageError>;

    /// Events for one agent with timestamps inside the bounds
    async fn find_events(
        &self,
        agent_id: &str,
        lower: Bound<DateTime<Utc>>,
        upper: Bound<DateTime<Utc>>,
    ) -> Result<Vec<AgentEvent>, StorageError>;

    /// A materialized projection document
    async fn find_projection(
        &self,
        collection: &str,
        agent_id: &str,
    ) -> Result<Option<StateMap>, StorageError>;

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// The newest snapshot at or before `at_or_before` (any time when `None`)
    async fn latest_snapshot(
        &self,
        agent_id: &str,
        at_or_before: Option<DateTime<Utc>>,
    ) -> Result<Option<Snapshot>, StorageError>;
}

/// A unit of work spanning one raw event and its projection updates
#[async_trait]
pub trait StorageTransaction: Send {
    async fn insert_event(&mut self, event: &AgentEvent) -> Result<(), StorageError>;

    async fn apply_projection(&mut self, write: &ProjectionWrite) -> Result<(), StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
