// Agent execution module
//
// The agent state machine, the capability contract and registry, and the
// recovery hook run when an agent leaves its error state.

pub mod agent;
pub mod capability;
pub mod errors;
pub mod recovery;

// Re-export main types
pub use agent::{Agent, AgentConfig};
pub use capability::{Capability, CapabilityConfig, CapabilityParams, CapabilityRegistry};
pub use errors::{AgentResult, AgentStateError, CapabilityError, CapabilityResult};
pub use recovery::{DiscardFailedTask, RecoveryHandler, RecoveryOutcome};
