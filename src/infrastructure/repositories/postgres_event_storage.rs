use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::ops::Bound;
use uuid::Uuid;

use crate::domain::event::{AgentEvent, EventMetadata, EventType, Snapshot, StateMap};
use crate::domain::projection::{apply_updates, ProjectionWrite};
use crate::domain::repositories::{EventStorage, StorageError, StorageTransaction};

/// PostgreSQL implementation of EventStorage
///
/// Events live in `agent_events` (a `BIGSERIAL` column keeps insertion order for
/// equal timestamps), projection documents in `projections` as `jsonb`, and
/// snapshots in `agent_snapshots`.
pub struct PostgresEventStorage {
    pool: PgPool,
}

impl PostgresEventStorage {
    /// Creates a new PostgresEventStorage
    ///
    /// # Arguments
    /// * `pool` - SQLx connection pool for PostgreSQL
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to run migrations: {}", e)))
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    agent_id: String,
    event_type: String,
    data: Value,
    correlation_id: Uuid,
    causation_id: Option<Uuid>,
    occurred_at: DateTime<Utc>,
    schema_version: String,
    environment: String,
    state_delta: Option<Value>,
    context_ref: Option<String>,
}

impl EventRow {
    fn into_event(self) -> Result<AgentEvent, StorageError> {
        let event_type: EventType = self.event_type.parse().map_err(StorageError::Backend)?;
        let state_delta = match self.state_delta {
            Some(Value::Object(map)) => Some(map),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(StorageError::Backend(format!(
                    "Event {} has a non-object state delta: {}",
                    self.id, other
                )))
            }
        };

        Ok(AgentEvent {
            id: self.id,
            agent_id: self.agent_id,
            event_type,
            data: self.data,
            metadata: EventMetadata {
                correlation_id: self.correlation_id,
                causation_id: self.causation_id,
                timestamp: self.occurred_at,
                schema_version: self.schema_version,
                environment: self.environment,
            },
            state_delta,
            context_ref: self.context_ref,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    agent_id: String,
    taken_at: DateTime<Utc>,
    state: Value,
    last_event_id: Option<Uuid>,
    last_event_at: Option<DateTime<Utc>>,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Snapshot {
        Snapshot {
            agent_id: self.agent_id,
            timestamp: self.taken_at,
            state: into_document(self.state),
            last_event_id: self.last_event_id,
            last_event_at: self.last_event_at,
        }
    }
}

fn into_document(value: Value) -> StateMap {
    match value {
        Value::Object(map) => map,
        _ => StateMap::new(),
    }
}

/// Splits a bound into (value, inclusive) for the nullable SQL parameters
fn split_bound(bound: Bound<DateTime<Utc>>) -> (Option<DateTime<Utc>>, bool) {
    match bound {
        Bound::Included(ts) => (Some(ts), true),
        Bound::Excluded(ts) => (Some(ts), false),
        Bound::Unbounded => (None, false),
    }
}

const EVENT_COLUMNS: &str = r#"
    id, agent_id, event_type, data, correlation_id, causation_id,
    occurred_at, schema_version, environment, state_delta, context_ref
"#;

#[async_trait]
impl EventStorage for PostgresEventStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn last_event(&self, agent_id: &str) -> Result<Option<AgentEvent>, StorageError> {
        let sql = format!(
            "SELECT {} FROM agent_events WHERE agent_id = $1 ORDER BY occurred_at DESC, seq DESC LIMIT 1",
            EVENT_COLUMNS
        );
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to find last event: {}", e)))?;

        row.map(EventRow::into_event).transpose()
    }

    async fn find_events(
        &self,
        agent_id: &str,
        lower: Bound<DateTime<Utc>>,
        upper: Bound<DateTime<Utc>>,
    ) -> Result<Vec<AgentEvent>, StorageError> {
        let (lower_ts, lower_inclusive) = split_bound(lower);
        let (upper_ts, upper_inclusive) = split_bound(upper);
        let sql = format!(
            r#"
            SELECT {}
            FROM agent_events
            WHERE agent_id = $1
              AND ($2::timestamptz IS NULL OR occurred_at > $2 OR ($3 AND occurred_at = $2))
              AND ($4::timestamptz IS NULL OR occurred_at < $4 OR ($5 AND occurred_at = $4))
            ORDER BY occurred_at ASC, seq ASC
            "#,
            EVENT_COLUMNS
        );

        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(agent_id)
            .bind(lower_ts)
            .bind(lower_inclusive)
            .bind(upper_ts)
            .bind(upper_inclusive)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to find events: {}", e)))?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    async fn find_projection(
        &self,
        collection: &str,
        agent_id: &str,
    ) -> Result<Option<StateMap>, StorageError> {
        let document: Option<Value> = sqlx::query_scalar(
            "SELECT document FROM projections WHERE collection = $1 AND agent_id = $2",
        )
        .bind(collection)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to find projection: {}", e)))?;

        Ok(document.map(into_document))
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO agent_snapshots (agent_id, taken_at, state, last_event_id, last_event_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&snapshot.agent_id)
        .bind(snapshot.timestamp)
        .bind(Value::Object(snapshot.state.clone()))
        .bind(snapshot.last_event_id)
        .bind(snapshot.last_event_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to save snapshot: {}", e)))?;

        Ok(())
    }

    async fn latest_snapshot(
        &self,
        agent_id: &str,
        at_or_before: Option<DateTime<Utc>>,
    ) -> Result<Option<Snapshot>, StorageError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT agent_id, taken_at, state, last_event_id, last_event_at
            FROM agent_snapshots
            WHERE agent_id = $1
              AND ($2::timestamptz IS NULL OR taken_at <= $2)
            ORDER BY taken_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(agent_id)
        .bind(at_or_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to find snapshot: {}", e)))?;

        Ok(row.map(SnapshotRow::into_snapshot))
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StorageTransaction for PostgresTransaction {
    async fn insert_event(&mut self, event: &AgentEvent) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO agent_events (
                id, agent_id, event_type, data, correlation_id, causation_id,
                occurred_at, schema_version, environment, state_delta, context_ref
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(&event.agent_id)
        .bind(event.event_type.as_str())
        .bind(&event.data)
        .bind(event.metadata.correlation_id)
        .bind(event.metadata.causation_id)
        .bind(event.metadata.timestamp)
        .bind(&event.metadata.schema_version)
        .bind(&event.metadata.environment)
        .bind(event.state_delta.clone().map(Value::Object))
        .bind(&event.context_ref)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to insert event: {}", e)))?;

        Ok(())
    }

    async fn apply_projection(&mut self, write: &ProjectionWrite) -> Result<(), StorageError> {
        // Row lock keeps the read-modify-write inside this transaction
        let current: Option<Value> = sqlx::query_scalar(
            r#"
            SELECT document FROM projections
            WHERE collection = $1 AND agent_id = $2
            FOR UPDATE
            "#,
        )
        .bind(&write.collection)
        .bind(&write.agent_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to read projection: {}", e)))?;

        let mut document = current.map(into_document).unwrap_or_default();
        apply_updates(&mut document, &write.updates).map_err(StorageError::Projection)?;

        sqlx::query(
            r#"
            INSERT INTO projections (collection, agent_id, document, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (collection, agent_id) DO UPDATE SET
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&write.collection)
        .bind(&write.agent_id)
        .bind(Value::Object(document))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to write projection: {}", e)))?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to commit: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to roll back: {}", e)))
    }
}
