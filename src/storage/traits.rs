//! Storage trait definitions

use crate::graph::{Identity, RecordKind, RecordSnapshot};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter criteria for listing and counting records
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Filter by record kind
    pub kind: Option<RecordKind>,
    /// Filter by subtype within the kind
    pub subtype: Option<String>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Subtypes only mean something within a kind
    pub fn validate(&self) -> StorageResult<()> {
        match (&self.kind, &self.subtype) {
            (None, Some(subtype)) => Err(StorageError::InvalidFilter(format!(
                "subtype {:?} given without a kind",
                subtype
            ))),
            _ => Ok(()),
        }
    }

    pub fn matches(&self, snapshot: &RecordSnapshot) -> bool {
        self.kind.map_or(true, |kind| snapshot.kind == kind)
            && self
                .subtype
                .as_deref()
                .map_or(true, |subtype| snapshot.subtype == subtype)
    }
}

/// Trait for persistent record stores
///
/// Implementations must be thread-safe (Send + Sync); the plugin runner
/// commits from a blocking worker thread.
pub trait RecordStore: Send + Sync {
    /// Load one record by identity
    fn get(&self, identity: &Identity) -> StorageResult<Option<RecordSnapshot>>;

    /// Load every record that exists among `identities`. Missing ones are skipped.
    fn get_many(&self, identities: &[Identity]) -> StorageResult<Vec<RecordSnapshot>>;

    /// Insert or replace records
    fn add_many(&self, records: &[RecordSnapshot]) -> StorageResult<()>;

    fn has(&self, identity: &Identity) -> StorageResult<bool>;

    /// Delete a record, returning whether it existed
    fn remove(&self, identity: &Identity) -> StorageResult<bool>;

    /// Identities matching a filter, in identity order
    fn keys(&self, filter: &RecordFilter) -> StorageResult<Vec<Identity>>;

    fn count(&self, filter: &RecordFilter) -> StorageResult<usize>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: RecordStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
