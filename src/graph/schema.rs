//! Declared schema of an entity type
//!
//! Each concrete entity type states up front which attributes make up its
//! identity, which can be merged (and how), which are read-only, and how many
//! neighbors it may link to. Records carry a shared reference to their
//! schema, so identity and merge behavior never depend on runtime
//! inspection of the values.

use super::links::LinkBounds;
use super::merge::MergeStrategy;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level category of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Information,
    Resource,
    Vulnerability,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Information => "information",
            Self::Resource => "resource",
            Self::Vulnerability => "vulnerability",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "information" => Ok(Self::Information),
            "resource" => Ok(Self::Resource),
            "vulnerability" => Ok(Self::Vulnerability),
            other => Err(format!("unknown record kind: {}", other)),
        }
    }
}

/// How a freshly created record derives its discovery depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthRule {
    /// Take the depth of the current audit step
    #[default]
    Inherit,
    /// Anchor types (domains, addresses) restart at zero
    Reset,
    /// One step further than the current audit step
    Increment,
}

impl DepthRule {
    pub fn apply(&self, current: u32) -> u32 {
        match self {
            Self::Inherit => current,
            Self::Reset => 0,
            Self::Increment => current.saturating_add(1),
        }
    }
}

/// Errors in an entity type declaration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{type_name}.{field}: read-only attributes cannot carry a merge strategy")]
    ReadOnlyMergeable { type_name: String, field: String },

    #[error("{type_name}.{field}: identity attributes are immutable and cannot be merged")]
    IdentityMergeable { type_name: String, field: String },

    #[error("{type_name}.{field}: attribute declared twice")]
    Duplicate { type_name: String, field: String },

    #[error("{type_name}: subtype must not be empty")]
    MissingSubtype { type_name: String },

    #[error("{type_name}: scope attribute '{field}' is not declared")]
    UnknownScopeAttribute { type_name: String, field: String },
}

/// Schema of one concrete entity type
#[derive(Debug)]
pub struct EntitySchema {
    type_name: String,
    kind: RecordKind,
    subtype: String,
    identity_fields: BTreeSet<String>,
    mergeable: BTreeMap<String, MergeStrategy>,
    read_only: BTreeSet<String>,
    bounds: LinkBounds,
    depth_rule: DepthRule,
    scope_attribute: Option<String>,
}

impl EntitySchema {
    /// Start declaring an entity type
    pub fn builder(
        type_name: impl Into<String>,
        kind: RecordKind,
        subtype: impl Into<String>,
    ) -> SchemaBuilder {
        SchemaBuilder {
            type_name: type_name.into(),
            kind,
            subtype: subtype.into(),
            identity_fields: Vec::new(),
            mergeable: Vec::new(),
            read_only: Vec::new(),
            bounds: LinkBounds::default(),
            depth_rule: DepthRule::default(),
            scope_attribute: None,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn identity_fields(&self) -> impl Iterator<Item = &str> {
        self.identity_fields.iter().map(String::as_str)
    }

    pub fn is_identity_field(&self, name: &str) -> bool {
        self.identity_fields.contains(name)
    }

    pub fn is_read_only(&self, name: &str) -> bool {
        self.read_only.contains(name)
    }

    pub fn mergeable_fields(&self) -> impl Iterator<Item = (&str, &MergeStrategy)> {
        self.mergeable.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Strategy used for `field` during a merge.
    ///
    /// Returns `None` for identity and read-only attributes, which are never
    /// merged. Undeclared attributes fall back to the default strategy.
    pub fn strategy_for(&self, field: &str) -> Option<&MergeStrategy> {
        static DEFAULT: MergeStrategy = MergeStrategy::Default;
        if self.is_identity_field(field) || self.is_read_only(field) {
            return None;
        }
        Some(self.mergeable.get(field).unwrap_or(&DEFAULT))
    }

    pub fn bounds(&self) -> &LinkBounds {
        &self.bounds
    }

    pub fn depth_rule(&self) -> DepthRule {
        self.depth_rule
    }

    pub fn scope_attribute(&self) -> Option<&str> {
        self.scope_attribute.as_deref()
    }
}

/// Builder for [`EntitySchema`]; validation happens in [`SchemaBuilder::build`].
#[derive(Debug)]
pub struct SchemaBuilder {
    type_name: String,
    kind: RecordKind,
    subtype: String,
    identity_fields: Vec<String>,
    mergeable: Vec<(String, MergeStrategy)>,
    read_only: Vec<String>,
    bounds: LinkBounds,
    depth_rule: DepthRule,
    scope_attribute: Option<String>,
}

impl SchemaBuilder {
    /// Declare an identity attribute
    pub fn identity(mut self, name: impl Into<String>) -> Self {
        self.identity_fields.push(name.into());
        self
    }

    /// Declare a mergeable attribute with its strategy
    pub fn mergeable(mut self, name: impl Into<String>, strategy: MergeStrategy) -> Self {
        self.mergeable.push((name.into(), strategy));
        self
    }

    /// Declare an attribute that can be set at construction only
    pub fn read_only(mut self, name: impl Into<String>) -> Self {
        self.read_only.push(name.into());
        self
    }

    pub fn min_data(mut self, min: usize) -> Self {
        self.bounds.min_data = Some(min);
        self
    }

    pub fn max_data(mut self, max: usize) -> Self {
        self.bounds.max_data = Some(max);
        self
    }

    pub fn min_of_kind(mut self, kind: RecordKind, min: usize) -> Self {
        self.bounds.min_of_kind.insert(kind, min);
        self
    }

    pub fn max_of_kind(mut self, kind: RecordKind, max: usize) -> Self {
        self.bounds.max_of_kind.insert(kind, max);
        self
    }

    pub fn depth_rule(mut self, rule: DepthRule) -> Self {
        self.depth_rule = rule;
        self
    }

    /// Attribute whose value is tested against the audit scope
    pub fn scope_attribute(mut self, name: impl Into<String>) -> Self {
        self.scope_attribute = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Arc<EntitySchema>, SchemaError> {
        let type_name = self.type_name;
        if self.subtype.is_empty() {
            return Err(SchemaError::MissingSubtype { type_name });
        }

        let mut seen: BTreeSet<String> = BTreeSet::new();
        for field in self.identity_fields.iter().chain(self.read_only.iter()) {
            claim(&mut seen, &type_name, field)?;
        }

        let identity_fields: BTreeSet<String> = self.identity_fields.into_iter().collect();
        let read_only: BTreeSet<String> = self.read_only.into_iter().collect();

        let mut mergeable = BTreeMap::new();
        for (field, strategy) in self.mergeable {
            if identity_fields.contains(&field) {
                return Err(SchemaError::IdentityMergeable { type_name, field });
            }
            if read_only.contains(&field) {
                return Err(SchemaError::ReadOnlyMergeable { type_name, field });
            }
            claim(&mut seen, &type_name, &field)?;
            mergeable.insert(field, strategy);
        }

        if let Some(field) = &self.scope_attribute {
            if !seen.contains(field) {
                return Err(SchemaError::UnknownScopeAttribute {
                    type_name,
                    field: field.clone(),
                });
            }
        }

        Ok(Arc::new(EntitySchema {
            type_name,
            kind: self.kind,
            subtype: self.subtype,
            identity_fields,
            mergeable,
            read_only,
            bounds: self.bounds,
            depth_rule: self.depth_rule,
            scope_attribute: self.scope_attribute,
        }))
    }
}

fn claim(seen: &mut BTreeSet<String>, type_name: &str, field: &str) -> Result<(), SchemaError> {
    if seen.insert(field.to_string()) {
        Ok(())
    } else {
        Err(SchemaError::Duplicate {
            type_name: type_name.to_string(),
            field: field.to_string(),
        })
    }
}

/// Lookup of schemas by type name, used to rehydrate stored records
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, replacing any previous one with the same type name
    pub fn register(&mut self, schema: Arc<EntitySchema>) {
        self.schemas.insert(schema.type_name().to_string(), schema);
    }

    pub fn with(mut self, schema: Arc<EntitySchema>) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<EntitySchema>> {
        self.schemas.get(type_name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
