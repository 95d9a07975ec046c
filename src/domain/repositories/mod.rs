// Repository contracts (ports)
// Adapters in the infrastructure layer implement these traits

pub mod event_storage;

pub use event_storage::{EventStorage, StorageError, StorageTransaction};
