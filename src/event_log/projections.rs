//! Read-model handlers, one per event type
//!
//! Handlers are pure: they turn an event into the projection writes the storage
//! adapter applies inside the append transaction.

use serde_json::{json, Value};

use super::errors::{EventLogError, EventLogResult};
use crate::domain::event::{AgentEvent, EventType, StateMap};
use crate::domain::projection::{
    ProjectionWrite, AGENT_STATES, ASSISTANCE_REQUESTS, ERROR_LOGS, TASK_HISTORY, TOOL_USAGE,
};

/// Projection writes produced by `event`
///
/// # Arguments
/// * `event` - The event being appended
/// * `history_limit` - Cap applied to every history list
///
/// # Returns
/// The writes to apply, or `MissingStateDelta` for a `STATE_UPDATED` event
/// without a delta
pub fn project(event: &AgentEvent, history_limit: usize) -> EventLogResult<Vec<ProjectionWrite>> {
    let agent_id = event.agent_id.as_str();
    let at = Value::String(event.timestamp().to_rfc3339());

    let writes = match event.event_type {
        EventType::AgentRegistered => {
            let mut fields = status_fields("registered", "registeredAt", at);
            fields.insert(
                "tools".to_string(),
                event.data.get("tools").cloned().unwrap_or_else(|| json!([])),
            );
            vec![ProjectionWrite::new(AGENT_STATES, agent_id).set(fields)]
        }
        EventType::AgentStarted => vec![ProjectionWrite::new(AGENT_STATES, agent_id)
            .set(status_fields("running", "startedAt", at))],
        EventType::AgentStopped => vec![ProjectionWrite::new(AGENT_STATES, agent_id)
            .set(status_fields("stopped", "stoppedAt", at))],
        EventType::StateUpdated => {
            let delta = match &event.state_delta {
                Some(delta) if !delta.is_empty() => delta.clone(),
                _ => return Err(EventLogError::MissingStateDelta { event_id: event.id }),
            };
            let entry = json!({
                "eventId": event.id,
                "timestamp": at,
                "delta": Value::Object(delta.clone()),
            });
            vec![ProjectionWrite::new(AGENT_STATES, agent_id)
                .set(delta)
                .push("stateHistory", entry, history_limit)]
        }
        EventType::ToolAccessed => {
            let tool = event
                .data
                .get("toolId")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            vec![ProjectionWrite::new(TOOL_USAGE, agent_id)
                .increment("total", 1)
                .increment(format!("byTool.{}", path_segment(tool)), 1)
                .push("history", history_entry(event), history_limit)]
        }
        EventType::AssistanceRequested => vec![ProjectionWrite::new(ASSISTANCE_REQUESTS, agent_id)
            .increment("count", 1)
            .push("requests", history_entry(event), history_limit)],
        EventType::TaskScheduled => {
            vec![ProjectionWrite::new(TASK_HISTORY, agent_id).increment("scheduled", 1)]
        }
        EventType::TaskCompleted => vec![ProjectionWrite::new(TASK_HISTORY, agent_id)
            .increment("completed", 1)
            .push("completedTasks", history_entry(event), history_limit)],
        EventType::TaskFailed => vec![ProjectionWrite::new(TASK_HISTORY, agent_id)
            .increment("failed", 1)
            .push("failedTasks", history_entry(event), history_limit)],
        EventType::TaskCancelled => {
            vec![ProjectionWrite::new(TASK_HISTORY, agent_id).increment("cancelled", 1)]
        }
        EventType::ErrorOccurred => vec![ProjectionWrite::new(ERROR_LOGS, agent_id)
            .increment("count", 1)
            .push("errors", history_entry(event), history_limit)],
        EventType::TaskRegistered => Vec::new(),
    };

    Ok(writes)
}

fn status_fields(status: &str, stamp_field: &str, at: Value) -> StateMap {
    let mut fields = StateMap::new();
    fields.insert("status".to_string(), Value::String(status.to_string()));
    fields.insert(stamp_field.to_string(), at);
    fields
}

fn history_entry(event: &AgentEvent) -> Value {
    json!({
        "eventId": event.id,
        "timestamp": event.timestamp().to_rfc3339(),
        "data": event.data,
    })
}

/// Dots would split the path; tool ids keep their other characters
fn path_segment(id: &str) -> String {
    id.replace('.', "_")
}
