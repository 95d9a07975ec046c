// Event domain module
// Contains the immutable event envelope, event types and snapshots

#![allow(clippy::module_inception)]

pub mod event;
pub mod snapshot;
pub mod value_objects;

// Re-export main types for convenience
pub use event::{AgentEvent, EventDraft, EventMetadata, StateMap, SYSTEM_AGENT_ID};
pub use snapshot::{fold_deltas, Snapshot};
pub use value_objects::EventType;
