//! Non-fatal conditions reported alongside reconciliation results

use super::identity::Identity;

/// A recoverable condition noticed while reconciling a plugin's output.
///
/// Diagnostics never change what is committed beyond what the algorithm
/// already decided; they exist so the operator can spot sloppy plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A discarded record was explicitly returned; the discard was lifted
    DiscardedReturned { identity: Identity },
    /// The same identity was returned more than once and merged
    DuplicateResult { identity: Identity, type_name: String },
    /// Created and referenced, but not returned; included anyway
    Unreturned { identity: Identity, type_name: String },
    /// Referenced from the result set while marked discarded; left out
    DiscardedReferenced { identity: Identity },
    /// Created but neither returned nor referenced; dropped
    Orphaned { identity: Identity, type_name: String },
    /// Out of scope but reachable from in-scope data; kept
    OutOfScope { identity: Identity, type_name: String },
    /// A truth-preferring merge could not evaluate a value as boolean
    UncoercibleBoolean { type_name: String, field: String },
    /// An ordering merge compared non-numeric values and kept the newer one
    NonNumeric { type_name: String, field: String },
}

impl Diagnostic {
    /// Identity the diagnostic refers to, when there is one
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::DiscardedReturned { identity }
            | Self::DuplicateResult { identity, .. }
            | Self::Unreturned { identity, .. }
            | Self::DiscardedReferenced { identity }
            | Self::Orphaned { identity, .. }
            | Self::OutOfScope { identity, .. } => Some(identity),
            Self::UncoercibleBoolean { .. } | Self::NonNumeric { .. } => None,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DiscardedReturned { identity } => {
                write!(f, "plugin returned discarded data: {}", identity)
            }
            Self::DuplicateResult { identity, type_name } => write!(
                f,
                "plugin returned duplicated results: <{} identity={}>",
                type_name, identity
            ),
            Self::Unreturned { identity, type_name } => write!(
                f,
                "data created and referenced by plugin, but not returned: <{} identity={}>",
                type_name, identity
            ),
            Self::DiscardedReferenced { identity } => write!(
                f,
                "data created and referenced by plugin, but marked as discarded: {}",
                identity
            ),
            Self::Orphaned { identity, type_name } => write!(
                f,
                "data created by plugin, but not referenced nor returned: <{} identity={}>",
                type_name, identity
            ),
            Self::OutOfScope { identity, type_name } => {
                write!(f, "data out of scope: <{} identity={}>", type_name, identity)
            }
            Self::UncoercibleBoolean { type_name, field } => {
                write!(f, "failed to evaluate {}.{} as boolean", type_name, field)
            }
            Self::NonNumeric { type_name, field } => {
                write!(f, "non-numeric values compared in {}.{}", type_name, field)
            }
        }
    }
}
