use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::errors::{EventLogError, EventLogResult};
use super::projections;
use crate::clock::Clock;
use crate::domain::event::{fold_deltas, AgentEvent, EventDraft, Snapshot, StateMap};
use crate::domain::repositories::{EventStorage, StorageError};

/// Values stamped onto every emitted event
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    pub environment: String,
    pub schema_version: String,
    /// Cap on every projection history list
    pub history_limit: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            schema_version: "1.0.0".to_string(),
            history_limit: 100,
        }
    }
}

/// Append-only, per-agent ordered event store with synchronous projections
///
/// Appends for one agent are serialized by a per-agent async lock so the
/// ordering check and the write happen as one step. Appends for different
/// agents proceed independently.
pub struct EventLog {
    storage: Arc<dyn EventStorage>,
    clock: Arc<dyn Clock>,
    config: EventLogConfig,
    agent_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EventLog {
    pub fn new(storage: Arc<dyn EventStorage>, clock: Arc<dyn Clock>, config: EventLogConfig) -> Self {
        Self {
            storage,
            clock,
            config,
            agent_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EventLogConfig {
        &self.config
    }

    fn agent_lock(&self, agent_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.agent_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Appends a caller-built event
    ///
    /// # Arguments
    /// * `event` - Fully stamped event; its timestamp must not precede the
    ///   agent's last event
    ///
    /// # Returns
    /// Ok once the event and its projection updates are committed together
    pub async fn append(&self, event: &AgentEvent) -> EventLogResult<()> {
        let lock = self.agent_lock(&event.agent_id);
        let _guard = lock.lock().await;

        let last = self.last_timestamp(&event.agent_id).await?;
        self.write(event, last).await
    }

    /// Stamps and appends a draft
    ///
    /// The timestamp is `max(clock.now(), last timestamp)` for the agent, so
    /// emitted events never trip the ordering check.
    pub async fn emit(&self, draft: EventDraft) -> EventLogResult<AgentEvent> {
        let lock = self.agent_lock(&draft.agent_id);
        let _guard = lock.lock().await;

        let last = self.last_timestamp(&draft.agent_id).await?;
        let now = self.clock.now();
        let timestamp = last.map_or(now, |last| last.max(now));
        let event = draft.into_event(timestamp, &self.config.schema_version, &self.config.environment);

        self.write(&event, last).await?;
        Ok(event)
    }

    async fn last_timestamp(&self, agent_id: &str) -> EventLogResult<Option<DateTime<Utc>>> {
        let last = self.storage.last_event(agent_id).await?;
        Ok(last.map(|e| e.timestamp()))
    }

    async fn write(&self, event: &AgentEvent, last: Option<DateTime<Utc>>) -> EventLogResult<()> {
        if let Some(last) = last {
            if event.timestamp() < last {
                tracing::warn!(
                    agent_id = %event.agent_id,
                    event_type = %event.event_type,
                    "Rejected out-of-order event"
                );
                return Err(EventLogError::OrderingViolation {
                    agent_id: event.agent_id.clone(),
                    last,
                    attempted: event.timestamp(),
                });
            }
        }

        let writes = projections::project(event, self.config.history_limit)?;

        let mut tx = self.storage.begin().await?;
        let staged: Result<(), StorageError> = async {
            tx.insert_event(event).await?;
            for write in &writes {
                tx.apply_projection(write).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = staged {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(
                    agent_id = %event.agent_id,
                    error = %rollback_err,
                    "Failed to roll back event append"
                );
            }
            tracing::error!(
                agent_id = %event.agent_id,
                event_type = %event.event_type,
                error = %e,
                "Event append failed"
            );
            return Err(e.into());
        }

        tx.commit().await?;

        tracing::debug!(
            agent_id = %event.agent_id,
            event_type = %event.event_type,
            event_id = %event.id,
            "Event appended"
        );
        Ok(())
    }

    /// Events for one agent in `(after, before]`, ascending
    pub async fn get_events(
        &self,
        agent_id: &str,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> EventLogResult<Vec<AgentEvent>> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let upper = before.map_or(Bound::Unbounded, Bound::Included);
        Ok(self.storage.find_events(agent_id, lower, upper).await?)
    }

    /// Folds the agent's state deltas up to `target` (all events when `None`)
    ///
    /// Starts from the newest snapshot at or before `target` when one exists;
    /// the result is the same either way.
    pub async fn reconstruct_state(
        &self,
        agent_id: &str,
        target: Option<DateTime<Utc>>,
    ) -> EventLogResult<StateMap> {
        let (state, _) = self.replay(agent_id, target).await?;
        Ok(state)
    }

    /// Returns the folded state and the position of the newest folded event
    async fn replay(
        &self,
        agent_id: &str,
        target: Option<DateTime<Utc>>,
    ) -> EventLogResult<(StateMap, Option<(Uuid, DateTime<Utc>)>)> {
        let snapshot = self.storage.latest_snapshot(agent_id, target).await?;
        let upper = target.map_or(Bound::Unbounded, Bound::Included);

        let (base, position) = match snapshot {
            Some(snapshot) => {
                let position = snapshot.last_event_id.zip(snapshot.last_event_at);
                (snapshot.state, position)
            }
            None => (StateMap::new(), None),
        };

        // Resume right after the snapshot's last event; ties share its timestamp
        let lower = position.map_or(Bound::Unbounded, |(_, at)| Bound::Included(at));
        let events = self.storage.find_events(agent_id, lower, upper).await?;
        let pending = match position {
            Some((last_id, _)) => match events.iter().position(|e| e.id == last_id) {
                Some(index) => &events[index + 1..],
                None => &events[..],
            },
            None => &events[..],
        };

        let newest = pending
            .last()
            .map(|e| (e.id, e.timestamp()))
            .or(position);
        Ok((fold_deltas(base, pending), newest))
    }

    /// Captures the agent's current state and persists it as a snapshot
    pub async fn create_snapshot(&self, agent_id: &str) -> EventLogResult<Snapshot> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let (state, newest) = self.replay(agent_id, None).await?;
        let now = self.clock.now();
        let timestamp = newest.map_or(now, |(_, at)| at.max(now));

        let snapshot = Snapshot {
            agent_id: agent_id.to_string(),
            timestamp,
            state,
            last_event_id: newest.map(|(id, _)| id),
            last_event_at: newest.map(|(_, at)| at),
        };
        self.storage.save_snapshot(&snapshot).await?;

        tracing::info!(agent_id = %agent_id, timestamp = %timestamp, "Snapshot created");
        Ok(snapshot)
    }

    /// A materialized projection document, if the agent has one
    pub async fn projection(&self, collection: &str, agent_id: &str) -> EventLogResult<Option<StateMap>> {
        Ok(self.storage.find_projection(collection, agent_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::event::EventType;
    use crate::domain::projection::{AGENT_STATES, TASK_HISTORY};
    use crate::infrastructure::repositories::InMemoryEventStorage;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (EventLog, Arc<ManualClock>, InMemoryEventStorage) {
        let storage = InMemoryEventStorage::new();
        let clock = Arc::new(ManualClock::new(start()));
        let log = EventLog::new(Arc::new(storage.clone()), clock.clone(), EventLogConfig::default());
        (log, clock, storage)
    }

    fn delta(status: &str) -> StateMap {
        let mut delta = StateMap::new();
        delta.insert("status".to_string(), json!(status));
        delta
    }

    fn stamped(agent_id: &str, at: DateTime<Utc>) -> AgentEvent {
        EventDraft::new(agent_id, EventType::TaskScheduled).into_event(at, "1.0.0", "test")
    }

    #[tokio::test]
    async fn append_rejects_decreasing_timestamp() {
        let (log, _, storage) = setup();
        log.append(&stamped("agent-1", start())).await.unwrap();

        let result = log.append(&stamped("agent-1", start() - Duration::seconds(1))).await;

        assert!(matches!(result, Err(EventLogError::OrderingViolation { .. })));
        assert_eq!(storage.event_count(), 1);
        let history = log.projection(TASK_HISTORY, "agent-1").await.unwrap().unwrap();
        assert_eq!(history["scheduled"], 1);
    }

    #[tokio::test]
    async fn ordering_is_per_agent() {
        let (log, _, _) = setup();
        log.append(&stamped("agent-1", start())).await.unwrap();

        let result = log.append(&stamped("agent-2", start() - Duration::hours(1))).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn emit_never_goes_backwards() {
        let (log, clock, _) = setup();
        let first = log.emit(EventDraft::new("agent-1", EventType::AgentStarted)).await.unwrap();
        clock.set(start() - Duration::minutes(5));

        let second = log.emit(EventDraft::new("agent-1", EventType::AgentStopped)).await.unwrap();

        assert_eq!(second.timestamp(), first.timestamp());
        assert_eq!(second.metadata.schema_version, "1.0.0");
    }

    #[tokio::test]
    async fn missing_delta_appends_nothing() {
        let (log, _, storage) = setup();

        let result = log.emit(EventDraft::new("agent-1", EventType::StateUpdated)).await;

        assert!(matches!(result, Err(EventLogError::MissingStateDelta { .. })));
        assert_eq!(storage.event_count(), 0);
    }

    #[tokio::test]
    async fn get_events_uses_half_open_window() {
        let (log, clock, _) = setup();
        let mut stamps = Vec::new();
        for _ in 0..3 {
            let e = log.emit(EventDraft::new("agent-1", EventType::AgentStarted)).await.unwrap();
            stamps.push(e.timestamp());
            clock.advance(Duration::seconds(10));
        }

        let window = log.get_events("agent-1", Some(stamps[0]), Some(stamps[2])).await.unwrap();

        let got: Vec<_> = window.iter().map(|e| e.timestamp()).collect();
        assert_eq!(got, vec![stamps[1], stamps[2]]);
    }

    #[tokio::test]
    async fn snapshot_does_not_change_reconstruction() {
        let (log, clock, _) = setup();
        for status in ["executing", "idle", "executing"] {
            log.emit(EventDraft::new("agent-1", EventType::StateUpdated).state_delta(delta(status)))
                .await
                .unwrap();
        }
        let before = log.reconstruct_state("agent-1", None).await.unwrap();

        let snapshot = log.create_snapshot("agent-1").await.unwrap();
        log.emit(EventDraft::new("agent-1", EventType::StateUpdated).state_delta(delta("idle")))
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));

        assert_eq!(snapshot.state, before);
        let after = log.reconstruct_state("agent-1", None).await.unwrap();
        assert_eq!(after["status"], "idle");
        let at_snapshot = log
            .reconstruct_state("agent-1", Some(snapshot.timestamp))
            .await
            .unwrap();
        assert_eq!(at_snapshot["status"], "idle");
    }

    #[tokio::test]
    async fn reconstruct_before_snapshot_ignores_it() {
        let (log, clock, _) = setup();
        let first = log
            .emit(EventDraft::new("agent-1", EventType::StateUpdated).state_delta(delta("executing")))
            .await
            .unwrap();
        clock.advance(Duration::seconds(5));
        log.emit(EventDraft::new("agent-1", EventType::StateUpdated).state_delta(delta("idle")))
            .await
            .unwrap();
        log.create_snapshot("agent-1").await.unwrap();

        let state = log.reconstruct_state("agent-1", Some(first.timestamp())).await.unwrap();

        assert_eq!(state["status"], "executing");
    }

    #[tokio::test]
    async fn state_updates_materialize_agent_states() {
        let (log, _, _) = setup();
        log.emit(EventDraft::new("agent-1", EventType::StateUpdated).state_delta(delta("executing")))
            .await
            .unwrap();

        let doc = log.projection(AGENT_STATES, "agent-1").await.unwrap().unwrap();

        assert_eq!(doc["status"], "executing");
        assert_eq!(doc["stateHistory"].as_array().unwrap().len(), 1);
    }
}
