// Task domain module
// Contains task definitions, schedules and the per-agent queue

pub mod definition;
pub mod schedule;
pub mod value_objects;

// Re-export main types for convenience
pub use definition::{
    Condition, ParameterDefinition, ParameterType, ParameterValidation, Postcondition,
    Precondition, RetryPolicy, TaskDefinition, TaskValidation,
};
pub use schedule::{QueueMetadata, QueuedTask, ScheduleMetadata, TaskQueue, TaskSchedule};
pub use value_objects::QueueStatus;
