// Repository implementations (data access layer)
// Adapters that implement domain repository interfaces

pub mod in_memory_event_storage;
pub mod postgres_event_storage;

pub use in_memory_event_storage::InMemoryEventStorage;
pub use postgres_event_storage::PostgresEventStorage;
