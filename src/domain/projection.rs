//! Read-model update language shared by every storage adapter
//!
//! Projection documents are JSON objects keyed by `(collection, agent_id)`.
//! Updates address fields by dotted path (`byTool.mailer`) and mirror the
//! `$set` / `$inc` / `$push` operators of document stores.

use crate::domain::event::StateMap;
use serde_json::{Map, Value};

pub const AGENT_STATES: &str = "agent_states";
pub const TOOL_USAGE: &str = "tool_usage";
pub const ASSISTANCE_REQUESTS: &str = "assistance_requests";
pub const TASK_HISTORY: &str = "task_history";
pub const ERROR_LOGS: &str = "error_logs";

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionUpdate {
    /// Overwrite top-level fields
    Set(StateMap),
    /// Add to a numeric field, treating a missing field as zero
    Increment { path: String, by: i64 },
    /// Append to a list field, keeping only the newest `cap` entries
    Push { path: String, value: Value, cap: usize },
}

/// All updates one event makes to one projection document
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionWrite {
    pub collection: String,
    pub agent_id: String,
    pub updates: Vec<ProjectionUpdate>,
}

impl ProjectionWrite {
    pub fn new(collection: &str, agent_id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            agent_id: agent_id.to_string(),
            updates: Vec::new(),
        }
    }

    pub fn set(mut self, fields: StateMap) -> Self {
        self.updates.push(ProjectionUpdate::Set(fields));
        self
    }

    pub fn increment(mut self, path: impl Into<String>, by: i64) -> Self {
        self.updates.push(ProjectionUpdate::Increment {
            path: path.into(),
            by,
        });
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: Value, cap: usize) -> Self {
        self.updates.push(ProjectionUpdate::Push {
            path: path.into(),
            value,
            cap,
        });
        self
    }
}

/// Applies `updates` to `document` in order
///
/// On error the document may be partially modified; callers apply to a copy
/// and discard it on failure.
pub fn apply_updates(document: &mut StateMap, updates: &[ProjectionUpdate]) -> Result<(), String> {
    for update in updates {
        match update {
            ProjectionUpdate::Set(fields) => {
                for (key, value) in fields {
                    document.insert(key.clone(), value.clone());
                }
            }
            ProjectionUpdate::Increment { path, by } => {
                let slot = field_mut(document, path)?;
                let current = match slot {
                    Value::Null => 0,
                    Value::Number(n) => n
                        .as_i64()
                        .ok_or_else(|| format!("{} is not an integer", path))?,
                    _ => return Err(format!("Cannot increment non-numeric field {}", path)),
                };
                *slot = Value::from(current + by);
            }
            ProjectionUpdate::Push { path, value, cap } => {
                let slot = field_mut(document, path)?;
                if slot.is_null() {
                    *slot = Value::Array(Vec::new());
                }
                let list = slot
                    .as_array_mut()
                    .ok_or_else(|| format!("Cannot push to non-list field {}", path))?;
                list.push(value.clone());
                if list.len() > *cap {
                    let excess = list.len() - cap;
                    list.drain(..excess);
                }
            }
        }
    }
    Ok(())
}

/// Walks a dotted path, creating intermediate objects; missing leaves are `Null`
fn field_mut<'a>(document: &'a mut Map<String, Value>, path: &str) -> Result<&'a mut Value, String> {
    let mut segments = path.split('.');
    let first = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "Empty field path".to_string())?;
    let mut slot = document.entry(first.to_string()).or_insert(Value::Null);

    for segment in segments {
        if slot.is_null() {
            *slot = Value::Object(Map::new());
        }
        let object = slot
            .as_object_mut()
            .ok_or_else(|| format!("{} crosses a non-object field", path))?;
        slot = object.entry(segment.to_string()).or_insert(Value::Null);
    }

    Ok(slot)
}
