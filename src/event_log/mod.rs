// Event log service
//
// Append-only per-agent history, projection handlers and snapshot replay
// on top of an EventStorage adapter.

pub mod errors;
pub mod log;
pub mod projections;

// Re-export main types for convenience
pub use errors::{EventLogError, EventLogResult};
pub use log::{EventLog, EventLogConfig};
pub use projections::project;
