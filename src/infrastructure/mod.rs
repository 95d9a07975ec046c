// Infrastructure layer module
// Contains storage adapters for the event log
// Follows Hexagonal Architecture

pub mod repositories;
