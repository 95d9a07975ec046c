// Task registry and scheduler
//
// Registers immutable task definitions, queues instances per agent and
// dispatches the next ready instance with retry and backoff.

pub mod errors;
pub mod scheduler;

// Re-export main types for convenience
pub use errors::{SchedulerError, SchedulerResult};
pub use scheduler::{ProcessOutcome, SchedulerConfig, TaskScheduler};
