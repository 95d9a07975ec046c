use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::domain::event::{AgentEvent, Snapshot, StateMap};
use crate::domain::projection::{apply_updates, ProjectionWrite};
use crate::domain::repositories::{EventStorage, StorageError, StorageTransaction};

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<String, Vec<AgentEvent>>,
    event_ids: HashSet<Uuid>,
    projections: HashMap<(String, String), StateMap>,
    snapshots: HashMap<String, Vec<Snapshot>>,
}

/// Thread-safe, HashMap-backed event storage
///
/// Transactions stage their writes and apply them under a single write lock on
/// commit, so readers never observe an event without its projection updates.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStorage {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables
            .read()
            .map_err(|_| StorageError::Backend("in-memory storage lock poisoned".to_string()))
    }

    /// Total number of events across all agents
    pub fn event_count(&self) -> usize {
        self.read()
            .map(|t| t.events.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

fn write(tables: &RwLock<Tables>) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> {
    tables
        .write()
        .map_err(|_| StorageError::Backend("in-memory storage lock poisoned".to_string()))
}

fn in_bounds(ts: DateTime<Utc>, lower: &Bound<DateTime<Utc>>, upper: &Bound<DateTime<Utc>>) -> bool {
    let above = match lower {
        Bound::Included(l) => ts >= *l,
        Bound::Excluded(l) => ts > *l,
        Bound::Unbounded => true,
    };
    let below = match upper {
        Bound::Included(u) => ts <= *u,
        Bound::Excluded(u) => ts < *u,
        Bound::Unbounded => true,
    };
    above && below
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError> {
        Ok(Box::new(InMemoryTransaction {
            tables: Arc::clone(&self.tables),
            events: Vec::new(),
            writes: Vec::new(),
        }))
    }

    async fn last_event(&self, agent_id: &str) -> Result<Option<AgentEvent>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .events
            .get(agent_id)
            .and_then(|events| events.iter().max_by_key(|e| e.timestamp()))
            .cloned())
    }

    async fn find_events(
        &self,
        agent_id: &str,
        lower: Bound<DateTime<Utc>>,
        upper: Bound<DateTime<Utc>>,
    ) -> Result<Vec<AgentEvent>, StorageError> {
        let tables = self.read()?;
        let mut events: Vec<AgentEvent> = tables
            .events
            .get(agent_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| in_bounds(e.timestamp(), &lower, &upper))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // stable: ties keep insertion order
        events.sort_by_key(|e| e.timestamp());
        Ok(events)
    }

    async fn find_projection(
        &self,
        collection: &str,
        agent_id: &str,
    ) -> Result<Option<StateMap>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .projections
            .get(&(collection.to_string(), agent_id.to_string()))
            .cloned())
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let mut tables = write(&self.tables)?;
        tables
            .snapshots
            .entry(snapshot.agent_id.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        agent_id: &str,
        at_or_before: Option<DateTime<Utc>>,
    ) -> Result<Option<Snapshot>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .snapshots
            .get(agent_id)
            .and_then(|snapshots| {
                snapshots
                    .iter()
                    .filter(|s| at_or_before.map_or(true, |t| s.timestamp <= t))
                    .max_by_key(|s| s.timestamp)
            })
            .cloned())
    }
}

struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    events: Vec<AgentEvent>,
    writes: Vec<ProjectionWrite>,
}

#[async_trait]
impl StorageTransaction for InMemoryTransaction {
    async fn insert_event(&mut self, event: &AgentEvent) -> Result<(), StorageError> {
        self.events.push(event.clone());
        Ok(())
    }

    async fn apply_projection(&mut self, write: &ProjectionWrite) -> Result<(), StorageError> {
        self.writes.push(write.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let InMemoryTransaction {
            tables: shared,
            events,
            writes,
        } = *self;
        let mut tables = write(&shared)?;

        let mut seen = HashSet::new();
        for event in &events {
            if tables.event_ids.contains(&event.id) || !seen.insert(event.id) {
                return Err(StorageError::Backend(format!(
                    "Duplicate event id: {}",
                    event.id
                )));
            }
        }

        // Apply projection writes to copies first; nothing is stored on failure
        let mut staged: HashMap<(String, String), StateMap> = HashMap::new();
        for write in &writes {
            let key = (write.collection.clone(), write.agent_id.clone());
            let mut document = match staged.remove(&key) {
                Some(doc) => doc,
                None => tables.projections.get(&key).cloned().unwrap_or_default(),
            };
            apply_updates(&mut document, &write.updates).map_err(StorageError::Projection)?;
            staged.insert(key, document);
        }

        for event in events {
            tables.event_ids.insert(event.id);
            tables
                .events
                .entry(event.agent_id.clone())
                .or_default()
                .push(event);
        }
        tables.projections.extend(staged);

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}
