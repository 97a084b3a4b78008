//! Built-in entity types
//!
//! Anchors of an audit (domains, IP addresses, URLs) plus plain text and a
//! generic vulnerability. Plugins register their own types next to these.

use crate::graph::{DepthRule, EntitySchema, MergeStrategy, RecordKind, SchemaError, SchemaRegistry};
use std::sync::Arc;

pub const DOMAIN: &str = "Domain";
pub const IP_ADDRESS: &str = "IpAddress";
pub const URL: &str = "Url";
pub const TEXT: &str = "Text";
pub const VULNERABILITY: &str = "Vulnerability";

/// A domain name. Resets discovery depth.
pub fn domain() -> Result<Arc<EntitySchema>, SchemaError> {
    EntitySchema::builder(DOMAIN, RecordKind::Resource, "domain")
        .identity("hostname")
        .mergeable("aliases", MergeStrategy::Default)
        .depth_rule(DepthRule::Reset)
        .scope_attribute("hostname")
        .build()
}

/// An IPv4 or IPv6 address. Resets discovery depth.
pub fn ip_address() -> Result<Arc<EntitySchema>, SchemaError> {
    EntitySchema::builder(IP_ADDRESS, RecordKind::Resource, "ip")
        .identity("address")
        .read_only("version")
        .depth_rule(DepthRule::Reset)
        .scope_attribute("address")
        .build()
}

/// A URL reached with a given method. Each hop is one level deeper.
pub fn url() -> Result<Arc<EntitySchema>, SchemaError> {
    EntitySchema::builder(URL, RecordKind::Resource, "url")
        .identity("url")
        .identity("method")
        .mergeable("referer", MergeStrategy::KeepOlder)
        .depth_rule(DepthRule::Increment)
        .scope_attribute("url")
        .build()
}

pub fn text() -> Result<Arc<EntitySchema>, SchemaError> {
    EntitySchema::builder(TEXT, RecordKind::Information, "text")
        .identity("raw_data")
        .build()
}

/// A finding. Must be attached to at least one resource.
pub fn vulnerability() -> Result<Arc<EntitySchema>, SchemaError> {
    EntitySchema::builder(VULNERABILITY, RecordKind::Vulnerability, "generic")
        .identity("title")
        .mergeable("level", MergeStrategy::KeepGreater)
        .mergeable("references", MergeStrategy::Default)
        .mergeable("false_positive", MergeStrategy::KeepFalse)
        .min_of_kind(RecordKind::Resource, 1)
        .build()
}

/// Registry holding every built-in type
pub fn builtin_registry() -> Result<SchemaRegistry, SchemaError> {
    Ok(SchemaRegistry::new()
        .with(domain()?)
        .with(ip_address()?)
        .with(url()?)
        .with(text()?)
        .with(vulnerability()?))
}
