//! Records: the nodes of the audit result graph

use super::diagnostics::Diagnostic;
use super::error::{GraphError, GraphResult};
use super::identity::Identity;
use super::links::{LinkIndex, LinkTarget};
use super::merge::MergeNote;
use super::schema::{EntitySchema, RecordKind, SchemaRegistry};
use super::value::{AttrValue, Attributes};
use crate::scope::AuditScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// A discovered fact: a resource, a piece of information or a vulnerability.
///
/// Identity attributes are fixed at construction. The identity hash is
/// computed on first use and memoized.
#[derive(Debug)]
pub struct Record {
    schema: Arc<EntitySchema>,
    identity_attributes: Attributes,
    attributes: Attributes,
    links: LinkIndex,
    depth: u32,
    discovered_at: DateTime<Utc>,
    identity: OnceLock<Identity>,
}

impl Clone for Record {
    fn clone(&self) -> Self {
        // Records without identity attributes hash a random token; pin it
        // before cloning so both copies agree.
        let identity = self.identity().clone();
        Self {
            schema: Arc::clone(&self.schema),
            identity_attributes: self.identity_attributes.clone(),
            attributes: self.attributes.clone(),
            links: self.links.clone(),
            depth: self.depth,
            discovered_at: self.discovered_at,
            identity: OnceLock::from(identity),
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Record {}

/// Builder returned by [`Record::build`]
#[derive(Debug)]
pub struct RecordBuilder {
    schema: Arc<EntitySchema>,
    identity_attributes: Attributes,
    attributes: Attributes,
}

impl RecordBuilder {
    /// Set an identity attribute
    pub fn identity(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.identity_attributes.insert(name.into(), value.into());
        self
    }

    /// Set a mergeable or read-only attribute
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Finish the record at the given audit depth (adjusted by the schema's depth rule)
    pub fn finish(self, current_depth: u32) -> GraphResult<Record> {
        let schema = self.schema;
        if let Some(field) = self
            .identity_attributes
            .keys()
            .find(|k| !schema.is_identity_field(k))
        {
            return Err(GraphError::UnknownIdentityField {
                type_name: schema.type_name().to_string(),
                field: field.clone(),
            });
        }
        if let Some(field) = self.attributes.keys().find(|k| schema.is_identity_field(k)) {
            return Err(GraphError::ImmutableAttribute {
                type_name: schema.type_name().to_string(),
                field: field.clone(),
            });
        }

        let depth = schema.depth_rule().apply(current_depth);
        Ok(Record {
            schema,
            identity_attributes: self.identity_attributes,
            attributes: self.attributes,
            links: LinkIndex::new(),
            depth,
            discovered_at: Utc::now(),
            identity: OnceLock::new(),
        })
    }
}

impl Record {
    /// Start building a record of the given type
    pub fn build(schema: &Arc<EntitySchema>) -> RecordBuilder {
        RecordBuilder {
            schema: Arc::clone(schema),
            identity_attributes: Attributes::new(),
            attributes: Attributes::new(),
        }
    }

    /// Identity hash, computed once
    pub fn identity(&self) -> &Identity {
        self.identity.get_or_init(|| {
            Identity::compute(self.schema.type_name(), &self.identity_attributes)
        })
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn kind(&self) -> RecordKind {
        self.schema.kind()
    }

    pub fn subtype(&self) -> &str {
        self.schema.subtype()
    }

    /// User-friendly name of the record type ("IpAddress" becomes "Ip Address")
    pub fn display_name(&self) -> String {
        let mut out = String::new();
        for (i, c) in self.type_name().chars().enumerate() {
            if i > 0 && c.is_uppercase() {
                out.push(' ');
            }
            out.push(c);
        }
        out
    }

    pub fn identity_attributes(&self) -> &Attributes {
        &self.identity_attributes
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Look up an attribute, identity attributes first
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.identity_attributes
            .get(name)
            .or_else(|| self.attributes.get(name))
    }

    /// Set a non-identity attribute.
    ///
    /// Identity attributes never change, and read-only attributes can only be
    /// given at construction.
    pub fn set_attr(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttrValue>,
    ) -> GraphResult<()> {
        let name = name.into();
        self.check_writable(&name)?;
        self.attributes.insert(name, value.into());
        Ok(())
    }

    /// Unset a non-identity attribute, returning the previous value
    pub fn clear_attr(&mut self, name: &str) -> GraphResult<Option<AttrValue>> {
        self.check_writable(name)?;
        Ok(self.attributes.remove(name))
    }

    fn check_writable(&self, name: &str) -> GraphResult<()> {
        if self.schema.is_identity_field(name) {
            return Err(GraphError::ImmutableAttribute {
                type_name: self.type_name().to_string(),
                field: name.to_string(),
            });
        }
        if self.schema.is_read_only(name) {
            return Err(GraphError::ReadOnlyAttribute {
                type_name: self.type_name().to_string(),
                field: name.to_string(),
            });
        }
        Ok(())
    }

    /// Shortest discovery distance from an audit root
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    pub fn links(&self) -> &LinkIndex {
        &self.links
    }

    /// Identities of neighbors of one kind, optionally narrowed to a subtype
    pub fn neighbors_of(&self, kind: RecordKind, subtype: Option<&str>) -> Vec<&Identity> {
        self.links.of_kind(kind, subtype)
    }

    /// How this record appears in a neighbor's adjacency
    pub fn as_link_target(&self) -> LinkTarget {
        LinkTarget {
            identity: self.identity().clone(),
            kind: self.kind(),
            subtype: self.subtype().to_string(),
        }
    }

    /// Whether this record may take one more neighbor of `kind`.
    ///
    /// Re-linking an existing neighbor is always allowed; it adds nothing.
    pub fn can_link(&self, target: &LinkTarget) -> bool {
        self.links.contains(&target.identity)
            || self.schema.bounds().admits(&self.links, target.kind)
    }

    /// Add one side of an edge. Callers are responsible for the other side.
    pub(crate) fn insert_link(&mut self, target: LinkTarget) -> bool {
        self.links.insert(target)
    }

    /// Check the declared link minimums against the current neighbors
    pub fn validate_link_minimums(&self) -> GraphResult<()> {
        match self.schema.bounds().shortfall(&self.links) {
            None => Ok(()),
            Some(shortfall) => Err(GraphError::LinkCardinality {
                identity: self.identity().clone(),
                type_name: self.type_name().to_string(),
                kind: shortfall.kind,
                required: shortfall.required,
                found: shortfall.found,
            }),
        }
    }

    /// Whether this record belongs to the audit.
    ///
    /// Types without a scope attribute are always in scope.
    pub fn is_in_scope(&self, scope: &AuditScope) -> bool {
        let Some(field) = self.schema.scope_attribute() else {
            return true;
        };
        match self.attr(field) {
            Some(AttrValue::String(target)) => scope.contains(target),
            Some(other) => scope.contains(&other.to_string()),
            None => true,
        }
    }

    /// Merge a newer record of the same entity into this one
    pub fn merge(&mut self, newer: &Record) -> GraphResult<Vec<Diagnostic>> {
        let merged = Merged::compute(self, newer)?;
        Ok(merged.apply_to(self))
    }

    /// Merge an older record of the same entity into this one, which is the newer
    pub fn reverse_merge(&mut self, older: &Record) -> GraphResult<Vec<Diagnostic>> {
        let merged = Merged::compute(older, self)?;
        Ok(merged.apply_to(self))
    }

    /// Serializable copy of the record
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            identity: self.identity().clone(),
            type_name: self.type_name().to_string(),
            kind: self.kind(),
            subtype: self.subtype().to_string(),
            identity_attributes: self.identity_attributes.clone(),
            attributes: self.attributes.clone(),
            links: self.links.clone(),
            depth: self.depth,
            discovered_at: self.discovered_at,
        }
    }
}

/// Result of combining two records, computed before either is mutated
struct Merged {
    attributes: Attributes,
    links: LinkIndex,
    depth: u32,
    discovered_at: DateTime<Utc>,
    diagnostics: Vec<Diagnostic>,
}

impl Merged {
    fn compute(old: &Record, new: &Record) -> GraphResult<Self> {
        if old.type_name() != new.type_name() {
            return Err(GraphError::TypeConflict {
                left: old.type_name().to_string(),
                right: new.type_name().to_string(),
                reason: "records are of different types",
            });
        }
        if old.identity() != new.identity() {
            return Err(GraphError::TypeConflict {
                left: old.identity().to_string(),
                right: new.identity().to_string(),
                reason: "records have different identities",
            });
        }

        let schema = new.schema();
        let mut fields: BTreeSet<&str> = new.attributes.keys().map(String::as_str).collect();
        fields.extend(schema.mergeable_fields().map(|(name, _)| name));

        let mut attributes = old.attributes.clone();
        let mut diagnostics = Vec::new();
        for field in fields {
            let Some(strategy) = schema.strategy_for(field) else {
                continue;
            };
            let mut notes = Vec::new();
            let value = strategy.combine(
                field,
                old.attributes.get(field),
                new.attributes.get(field),
                &mut notes,
            );
            match value {
                Some(value) => attributes.insert(field.to_string(), value),
                None => attributes.remove(field),
            };
            diagnostics.extend(notes.into_iter().map(|note| {
                let type_name = schema.type_name().to_string();
                let field = field.to_string();
                match note {
                    MergeNote::UncoercibleBoolean => {
                        Diagnostic::UncoercibleBoolean { type_name, field }
                    }
                    MergeNote::NonNumeric => Diagnostic::NonNumeric { type_name, field },
                }
            }));
        }

        let mut links = old.links.clone();
        links.union(&new.links);

        Ok(Self {
            attributes,
            links,
            depth: old.depth.min(new.depth),
            discovered_at: old.discovered_at.min(new.discovered_at),
            diagnostics,
        })
    }

    fn apply_to(self, target: &mut Record) -> Vec<Diagnostic> {
        // Read-only attributes keep whatever the target was built with.
        let schema = Arc::clone(&target.schema);
        let read_only: Vec<(String, AttrValue)> = target
            .attributes
            .iter()
            .filter(|(k, _)| schema.is_read_only(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        target.attributes = self.attributes;
        target.attributes.retain(|k, _| !schema.is_read_only(k));
        target.attributes.extend(read_only);

        target.links = self.links;
        target.depth = self.depth;
        target.discovered_at = self.discovered_at;
        self.diagnostics
    }
}

/// Serializable, schema-free view of a record as held by the persistent store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub identity: Identity,
    pub type_name: String,
    pub kind: RecordKind,
    pub subtype: String,
    pub identity_attributes: Attributes,
    pub attributes: Attributes,
    pub links: LinkIndex,
    pub depth: u32,
    pub discovered_at: DateTime<Utc>,
}

impl SchemaRegistry {
    /// Start building a record of a registered type
    pub fn build(&self, type_name: &str) -> GraphResult<RecordBuilder> {
        let schema = self
            .get(type_name)
            .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;
        Ok(Record::build(schema))
    }

    /// Turn a stored snapshot back into a live record.
    ///
    /// The stored identity is kept as-is so records without identity
    /// attributes survive the round trip.
    pub fn rehydrate(&self, snapshot: RecordSnapshot) -> GraphResult<Record> {
        let schema = self
            .get(&snapshot.type_name)
            .ok_or_else(|| GraphError::UnknownType(snapshot.type_name.clone()))?;
        Ok(Record {
            schema: Arc::clone(schema),
            identity_attributes: snapshot.identity_attributes,
            attributes: snapshot.attributes,
            links: snapshot.links,
            depth: snapshot.depth,
            discovered_at: snapshot.discovered_at,
            identity: OnceLock::from(snapshot.identity),
        })
    }
}
