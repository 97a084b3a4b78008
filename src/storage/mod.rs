//! Storage backends for audit results
//!
//! Records are persisted through the `RecordStore` trait. `SqliteStore` is
//! the durable implementation; `MemoryStore` backs tests and throwaway audits.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{OpenStore, RecordFilter, RecordStore, StorageError, StorageResult};
