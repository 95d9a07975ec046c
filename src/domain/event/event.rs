use super::value_objects::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Flat key/value state carried by `state_delta`s, snapshots and projections
pub type StateMap = Map<String, Value>;

/// Agent identity used for registry-wide events (task definitions)
pub const SYSTEM_AGENT_ID: &str = "system";

/// Envelope metadata attached to every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Groups every event produced by one logical operation
    pub correlation_id: Uuid,
    /// The event that directly caused this one, if any
    pub causation_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub schema_version: String,
    pub environment: String,
}

/// Immutable fact appended to an agent's history
///
/// # Invariants
/// - For a fixed `agent_id`, timestamps never decrease in log order
/// - `StateUpdated` events always carry a non-empty `state_delta`
///
/// # Example
/// ```
/// use agent_ledger::domain::event::{AgentEvent, EventMetadata, EventType};
/// use chrono::Utc;
/// use uuid::Uuid;
///
/// let event = AgentEvent {
///     id: Uuid::new_v4(),
///     agent_id: "agent-1".to_string(),
///     event_type: EventType::AgentStarted,
///     data: serde_json::json!({}),
///     metadata: EventMetadata {
///         correlation_id: Uuid::new_v4(),
///         causation_id: None,
///         timestamp: Utc::now(),
///         schema_version: "1.0.0".to_string(),
///         environment: "test".to_string(),
///     },
///     state_delta: None,
///     context_ref: None,
/// };
///
/// assert_eq!(event.agent_id, "agent-1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub id: Uuid,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Value,
    pub metadata: EventMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_delta: Option<StateMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_ref: Option<String>,
}

impl AgentEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp
    }

    /// True when the event carries a delta with at least one field
    pub fn has_state_delta(&self) -> bool {
        self.state_delta.as_ref().is_some_and(|d| !d.is_empty())
    }
}

/// An event that has not been stamped yet
///
/// The event log fills in id, timestamp, schema version and environment when the
/// draft is emitted.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub agent_id: String,
    pub event_type: EventType,
    pub data: Value,
    pub state_delta: Option<StateMap>,
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub context_ref: Option<String>,
}

impl EventDraft {
    pub fn new(agent_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            agent_id: agent_id.into(),
            event_type,
            data: Value::Object(Map::new()),
            state_delta: None,
            correlation_id: None,
            causation_id: None,
            context_ref: None,
        }
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn state_delta(mut self, delta: StateMap) -> Self {
        self.state_delta = Some(delta);
        self
    }

    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn causation_id(mut self, id: Uuid) -> Self {
        self.causation_id = Some(id);
        self
    }

    pub fn context_ref(mut self, reference: impl Into<String>) -> Self {
        self.context_ref = Some(reference.into());
        self
    }

    /// Stamps the draft into an immutable event
    pub fn into_event(
        self,
        timestamp: DateTime<Utc>,
        schema_version: &str,
        environment: &str,
    ) -> AgentEvent {
        AgentEvent {
            id: Uuid::new_v4(),
            agent_id: self.agent_id,
            event_type: self.event_type,
            data: self.data,
            metadata: EventMetadata {
                correlation_id: self.correlation_id.unwrap_or_else(Uuid::new_v4),
                causation_id: self.causation_id,
                timestamp,
                schema_version: schema_version.to_string(),
                environment: environment.to_string(),
            },
            state_delta: self.state_delta,
            context_ref: self.context_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn draft_keeps_supplied_correlation() {
        let correlation = Uuid::new_v4();
        let event = EventDraft::new("agent-1", EventType::TaskCompleted)
            .data(json!({"taskId": "t1"}))
            .correlation_id(correlation)
            .into_event(Utc::now(), "1.0.0", "test");

        assert_eq!(event.metadata.correlation_id, correlation);
        assert_eq!(event.metadata.environment, "test");
        assert_eq!(event.data["taskId"], "t1");
    }

    #[test]
    fn empty_delta_does_not_count() {
        let event = EventDraft::new("agent-1", EventType::StateUpdated)
            .state_delta(StateMap::new())
            .into_event(Utc::now(), "1.0.0", "test");

        assert!(!event.has_state_delta());
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let mut delta = StateMap::new();
        delta.insert("status".to_string(), json!("idle"));
        let event = EventDraft::new("agent-1", EventType::StateUpdated)
            .state_delta(delta)
            .into_event(Utc::now(), "1.0.0", "test");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "STATE_UPDATED");
        assert_eq!(value["agentId"], "agent-1");
        assert_eq!(value["stateDelta"]["status"], "idle");
        assert!(value["metadata"]["correlationId"].is_string());
        assert!(value.get("contextRef").is_none());
    }
}
