//! Per-record adjacency and link cardinality bounds

use super::identity::Identity;
use super::schema::RecordKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One neighbor as seen from a record: who it is and what category it has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub identity: Identity,
    pub kind: RecordKind,
    pub subtype: String,
}

/// Adjacency of a single record.
///
/// `edges` is authoritative. The by-kind and by-subtype buckets are derived
/// from it on insertion and are never written independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<LinkTarget>", into = "Vec<LinkTarget>")]
pub struct LinkIndex {
    edges: BTreeMap<Identity, (RecordKind, String)>,
    by_kind: BTreeMap<RecordKind, BTreeSet<Identity>>,
    by_subtype: BTreeMap<(RecordKind, String), BTreeSet<Identity>>,
}

impl LinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a neighbor. Returns false if it was already present.
    pub fn insert(&mut self, target: LinkTarget) -> bool {
        if self.edges.contains_key(&target.identity) {
            return false;
        }
        self.by_kind
            .entry(target.kind)
            .or_default()
            .insert(target.identity.clone());
        self.by_subtype
            .entry((target.kind, target.subtype.clone()))
            .or_default()
            .insert(target.identity.clone());
        self.edges
            .insert(target.identity, (target.kind, target.subtype));
        true
    }

    /// Add every neighbor of `other` to this index
    pub fn union(&mut self, other: &LinkIndex) {
        for target in other.targets() {
            self.insert(target);
        }
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.edges.contains_key(identity)
    }

    /// All neighbor identities
    pub fn all(&self) -> impl Iterator<Item = &Identity> {
        self.edges.keys()
    }

    /// Neighbors of one kind, optionally narrowed to a subtype
    pub fn of_kind(&self, kind: RecordKind, subtype: Option<&str>) -> Vec<&Identity> {
        let bucket = match subtype {
            Some(sub) => self.by_subtype.get(&(kind, sub.to_string())),
            None => self.by_kind.get(&kind),
        };
        bucket.map(|ids| ids.iter().collect()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn count_of_kind(&self, kind: RecordKind) -> usize {
        self.by_kind.get(&kind).map_or(0, BTreeSet::len)
    }

    /// Neighbors with their categories
    pub fn targets(&self) -> impl Iterator<Item = LinkTarget> + '_ {
        self.edges.iter().map(|(identity, (kind, subtype))| LinkTarget {
            identity: identity.clone(),
            kind: *kind,
            subtype: subtype.clone(),
        })
    }
}

impl From<Vec<LinkTarget>> for LinkIndex {
    fn from(targets: Vec<LinkTarget>) -> Self {
        let mut index = Self::new();
        for target in targets {
            index.insert(target);
        }
        index
    }
}

impl From<LinkIndex> for Vec<LinkTarget> {
    fn from(index: LinkIndex) -> Self {
        index.targets().collect()
    }
}

/// Declared minimum and maximum neighbor counts.
///
/// Maxima are checked when a link is created; minima only when a record is
/// validated during reconciliation. `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkBounds {
    pub min_data: Option<usize>,
    pub max_data: Option<usize>,
    pub min_of_kind: BTreeMap<RecordKind, usize>,
    pub max_of_kind: BTreeMap<RecordKind, usize>,
}

/// A minimum that is not met
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    /// `None` for the overall minimum
    pub kind: Option<RecordKind>,
    pub required: usize,
    pub found: usize,
}

impl LinkBounds {
    /// Whether one more neighbor of `kind` fits within the maxima.
    pub fn admits(&self, links: &LinkIndex, kind: RecordKind) -> bool {
        let total_ok = self.max_data.map_or(true, |max| links.len() < max);
        let kind_ok = self
            .max_of_kind
            .get(&kind)
            .map_or(true, |max| links.count_of_kind(kind) < *max);
        total_ok && kind_ok
    }

    /// First unmet minimum, if any. The overall minimum is checked first.
    pub fn shortfall(&self, links: &LinkIndex) -> Option<Shortfall> {
        if let Some(min) = self.min_data {
            if links.len() < min {
                return Some(Shortfall {
                    kind: None,
                    required: min,
                    found: links.len(),
                });
            }
        }
        self.min_of_kind.iter().find_map(|(kind, min)| {
            let found = links.count_of_kind(*kind);
            (found < *min).then_some(Shortfall {
                kind: Some(*kind),
                required: *min,
                found,
            })
        })
    }
}
