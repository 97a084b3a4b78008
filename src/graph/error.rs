//! Fatal errors raised by the record graph

use super::cache::RecordId;
use super::identity::Identity;
use super::schema::RecordKind;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that abort an operation on the record graph
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("plugin returned {0}, which was not created in this invocation")]
    MalformedResult(RecordId),

    #[error("cannot merge {left} with {right}: {reason}")]
    TypeConflict {
        left: String,
        right: String,
        reason: &'static str,
    },

    #[error("{type_name} {identity}: not enough linked {}: {required} required but {found} found", describe_kind(.kind))]
    LinkCardinality {
        identity: Identity,
        type_name: String,
        kind: Option<RecordKind>,
        required: usize,
        found: usize,
    },

    #[error("{type_name}.{field} is an identity attribute and cannot change")]
    ImmutableAttribute { type_name: String, field: String },

    #[error("{type_name}.{field} is read-only")]
    ReadOnlyAttribute { type_name: String, field: String },

    #[error("{type_name} has no identity attribute named {field}")]
    UnknownIdentityField { type_name: String, field: String },

    #[error("no schema registered for type {0}")]
    UnknownType(String),

    #[error("record {0} is not resident in this invocation")]
    NotResident(RecordId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

fn describe_kind(kind: &Option<RecordKind>) -> String {
    match kind {
        Some(kind) => format!("{} records", kind),
        None => "records".to_string(),
    }
}

/// Result type for record graph operations
pub type GraphResult<T> = Result<T, GraphError>;
