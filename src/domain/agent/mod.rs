// Agent domain module
// Contains the agent state aggregate and its status value objects

pub mod state;
pub mod value_objects;

// Re-export main types for convenience
pub use state::{AgentMetadata, AgentState, CurrentTask, TaskExecution, TaskRequest, TaskResult};
pub use value_objects::{AgentStatus, RecoveryStrategy, TaskStatus};
