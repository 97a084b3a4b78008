//! Core result-graph data structures

mod cache;
mod diagnostics;
mod error;
mod identity;
mod links;
mod merge;
mod record;
mod schema;
mod value;

#[cfg(test)]
mod tests;

pub use cache::{CacheState, LocalCache, Reconciliation, RecordId};
pub use diagnostics::Diagnostic;
pub use error::{GraphError, GraphResult};
pub use identity::{Identity, IDENTITY_HEX_LEN};
pub use links::{LinkBounds, LinkIndex, LinkTarget, Shortfall};
pub use merge::{MergeFn, MergeNote, MergeStrategy};
pub use record::{Record, RecordBuilder, RecordSnapshot};
pub use schema::{DepthRule, EntitySchema, SchemaBuilder, SchemaError, SchemaRegistry, RecordKind};
pub use value::{AttrValue, Attributes};
