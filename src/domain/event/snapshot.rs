use super::event::{AgentEvent, StateMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cached fold of an agent's state deltas up to `timestamp`
///
/// Snapshots only bound replay cost. `last_event_id`/`last_event_at` locate the
/// newest event already folded in; replay resumes right after it, so events
/// sharing its timestamp are neither skipped nor applied twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub state: StateMap,
    pub last_event_id: Option<Uuid>,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Shallow-merges every event delta onto `state`, in the order given
///
/// Events without a delta are skipped; later keys overwrite earlier ones.
pub fn fold_deltas<'a>(mut state: StateMap, events: impl IntoIterator<Item = &'a AgentEvent>) -> StateMap {
    for event in events {
        if let Some(delta) = &event.state_delta {
            for (key, value) in delta {
                state.insert(key.clone(), value.clone());
            }
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{EventDraft, EventType};
    use serde_json::json;

    fn delta_event(pairs: &[(&str, serde_json::Value)]) -> AgentEvent {
        let mut delta = StateMap::new();
        for (k, v) in pairs {
            delta.insert(k.to_string(), v.clone());
        }
        EventDraft::new("agent-1", EventType::StateUpdated)
            .state_delta(delta)
            .into_event(Utc::now(), "1.0.0", "test")
    }

    #[test]
    fn later_deltas_overwrite_earlier_keys() {
        let events = vec![
            delta_event(&[("status", json!("executing")), ("progress", json!(0))]),
            delta_event(&[("status", json!("idle"))]),
        ];

        let state = fold_deltas(StateMap::new(), &events);

        assert_eq!(state["status"], "idle");
        assert_eq!(state["progress"], 0);
    }

    #[test]
    fn events_without_delta_are_skipped() {
        let plain = EventDraft::new("agent-1", EventType::AgentStarted)
            .into_event(Utc::now(), "1.0.0", "test");
        let mut base = StateMap::new();
        base.insert("status".to_string(), json!("idle"));

        let state = fold_deltas(base.clone(), [&plain]);

        assert_eq!(state, base);
    }
}
