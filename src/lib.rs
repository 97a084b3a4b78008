//! Auditgraph: result graph for vulnerability-scanning audits
//!
//! Plugins discover facts about a target and contribute them as records.
//! Records describing the same real-world entity collapse into one, links
//! between records stay symmetric, and only data reachable from the audit
//! scope is committed.
//!
//! # Core Concepts
//!
//! - **Records**: resources, information and vulnerabilities, identified by
//!   a hash of their identity attributes
//! - **Links**: symmetric associations, bounded per kind by the entity schema
//! - **Local cache**: per-invocation staging area reconciled before commit
//!
//! # Example
//!
//! ```
//! use auditgraph::{builtin_registry, AuditContext, LocalCache, PluginOutput};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(builtin_registry().unwrap());
//! let mut cache = LocalCache::new(AuditContext::default(), Arc::clone(&registry), true);
//! let domain = cache
//!     .create(registry.build("Domain").unwrap().identity("hostname", "example.com"))
//!     .unwrap();
//! let result = cache.reconcile(PluginOutput::Nothing, domain).unwrap();
//! assert_eq!(result.records.len(), 1);
//! ```

pub mod config;
mod graph;
pub mod kinds;
pub mod plugin;
pub mod scope;
pub mod storage;

pub use config::{AuditConfig, ConfigError};
pub use graph::{
    AttrValue, Attributes, CacheState, DepthRule, Diagnostic, EntitySchema, GraphError, GraphResult,
    Identity, LinkBounds, LinkIndex, LinkTarget, LocalCache, MergeFn, MergeNote, MergeStrategy,
    Reconciliation, Record, RecordBuilder, RecordId, RecordKind, RecordSnapshot, SchemaBuilder,
    SchemaError, SchemaRegistry, Shortfall, IDENTITY_HEX_LEN,
};
pub use kinds::builtin_registry;
pub use plugin::{Plugin, PluginError, PluginOutput, PluginRunner, RunError, RunReport};
pub use scope::{AuditContext, AuditScope};
pub use storage::{
    MemoryStore, OpenStore, RecordFilter, RecordStore, SqliteStore, StorageError, StorageResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
