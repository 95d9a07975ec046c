//! Agent Ledger Library
//!
//! Durable event log, task scheduler and agent state machine for autonomous
//! agents. Every state change is recorded as an immutable event so an agent's
//! history and state can be replayed at any point in time.

pub mod agents;
pub mod clock;
pub mod config;
pub mod domain;
pub mod event_log;
pub mod infrastructure;
pub mod runtime;
pub mod tasks;
