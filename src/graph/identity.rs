//! Content-addressed record identity

use super::value::{AttrValue, Attributes};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Width of an identity hash in hex characters (128-bit digest).
pub const IDENTITY_HEX_LEN: usize = 32;

/// Identity hash of a record
///
/// Two records describe the same entity iff their identities are equal.
/// Serializes as a plain lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap an existing hash (e.g. read back from storage)
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash the identity attributes of a concrete entity type.
    ///
    /// Attributes are encoded in name order together with the type name under
    /// the empty key, so equal values on different types never collide. With
    /// no identity attributes a random token is hashed instead and the result
    /// is unique to this call.
    pub fn compute(type_name: &str, attributes: &Attributes) -> Self {
        let payload = if attributes.is_empty() {
            Uuid::new_v4().to_string().into_bytes()
        } else {
            let mut canonical: BTreeMap<&str, &AttrValue> =
                attributes.iter().map(|(k, v)| (k.as_str(), v)).collect();
            let class_name = AttrValue::String(simple_type_name(type_name).to_string());
            canonical.insert("", &class_name);
            serde_json::to_vec(&canonical)
                .unwrap_or_else(|_| format!("{:?}", canonical).into_bytes())
        };

        let mut hasher = Sha256::new();
        hasher.update(&payload);
        Self(hex::encode(hasher.finalize())[..IDENTITY_HEX_LEN].to_string())
    }
}

/// Strip any module path from a type name.
fn simple_type_name(type_name: &str) -> &str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
