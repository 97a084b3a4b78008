//! Local reconciliation cache
//!
//! One `LocalCache` lives for exactly one plugin invocation. Records created
//! by the plugin are registered into an arena and addressed by [`RecordId`];
//! links between them are stored by identity on each record. When the plugin
//! finishes, [`LocalCache::reconcile`] merges duplicates, closes the result
//! set over the link graph, drops discarded and orphaned data and prunes
//! whatever the audit scope cannot reach.

use super::diagnostics::Diagnostic;
use super::error::{GraphError, GraphResult};
use super::identity::Identity;
use super::record::{Record, RecordBuilder, RecordSnapshot};
use super::schema::{RecordKind, SchemaRegistry};
use crate::plugin::PluginOutput;
use crate::scope::AuditContext;
use crate::storage::RecordStore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

/// Handle to a record held by a [`LocalCache`].
///
/// Handles are only valid for the invocation that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    generation: u32,
    slot: u32,
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record #{}", self.slot)
    }
}

/// Lifecycle of the cache within one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Idle,
    Collecting,
    Reconciling,
}

/// What reconciliation produced: the records to commit and everything
/// worth telling the operator about
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub records: Vec<Record>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Reconciliation {
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.records.iter().map(Record::identity)
    }

    pub fn get(&self, identity: &Identity) -> Option<&Record> {
        self.records.iter().find(|r| r.identity() == identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.get(identity).is_some()
    }
}

/// Per-invocation staging area for plugin output
pub struct LocalCache {
    enabled: bool,
    state: CacheState,
    generation: u32,
    context: AuditContext,
    registry: Arc<SchemaRegistry>,
    store: Option<Arc<dyn RecordStore>>,
    records: Vec<Record>,
    by_identity: HashMap<Identity, Vec<usize>>,
    discarded: HashSet<Identity>,
    autogenerated: HashSet<Identity>,
    adopted: HashSet<usize>,
}

impl LocalCache {
    /// Create a cache for one invocation.
    ///
    /// With `enabled` false (plugins running out of process) nothing is
    /// reconciled locally and every lookup goes to the store.
    pub fn new(context: AuditContext, registry: Arc<SchemaRegistry>, enabled: bool) -> Self {
        Self {
            enabled,
            state: CacheState::Idle,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            context,
            registry,
            store: None,
            records: Vec::new(),
            by_identity: HashMap::new(),
            discarded: HashSet::new(),
            autogenerated: HashSet::new(),
            adopted: HashSet::new(),
        }
    }

    /// Enabled or disabled according to the context's local flag
    pub fn for_context(context: AuditContext, registry: Arc<SchemaRegistry>) -> Self {
        let enabled = !context.is_local();
        Self::new(context, registry, enabled)
    }

    /// Attach the persistent store used for non-resident lookups
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn context(&self) -> &AuditContext {
        &self.context
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Number of records held, twins included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn handle(&self, slot: usize) -> RecordId {
        RecordId {
            generation: self.generation,
            slot: slot as u32,
        }
    }

    fn slot(&self, id: RecordId) -> Option<usize> {
        let slot = id.slot as usize;
        (id.generation == self.generation && slot < self.records.len()).then_some(slot)
    }

    fn push(&mut self, record: Record) -> usize {
        let slot = self.records.len();
        self.by_identity
            .entry(record.identity().clone())
            .or_default()
            .push(slot);
        self.records.push(record);
        if self.state == CacheState::Idle {
            self.state = CacheState::Collecting;
        }
        slot
    }

    /// Take ownership of a freshly created record.
    ///
    /// Creating data with the identity of something discarded earlier in
    /// the invocation lifts the discard.
    pub fn register(&mut self, record: Record) -> RecordId {
        if self.discarded.remove(record.identity()) {
            debug!(identity = %record.identity(), "discarded identity created again");
        }
        let slot = self.push(record);
        self.handle(slot)
    }

    /// Finish a builder at the current audit depth and register the result
    pub fn create(&mut self, builder: RecordBuilder) -> GraphResult<RecordId> {
        let record = builder.finish(self.context.depth())?;
        Ok(self.register(record))
    }

    /// Bring a stored record into this invocation.
    ///
    /// Adopted records can be linked like created ones but are not reported
    /// as unreturned or orphaned. Adopting an identity that is already
    /// resident returns the resident handle.
    pub fn adopt(&mut self, snapshot: RecordSnapshot) -> GraphResult<RecordId> {
        if self.enabled {
            if let Some(slot) = self.primary_slot(&snapshot.identity) {
                return Ok(self.handle(slot));
            }
        }
        let record = self.registry.rehydrate(snapshot)?;
        let slot = self.push(record);
        self.adopted.insert(slot);
        Ok(self.handle(slot))
    }

    pub fn get(&self, id: RecordId) -> GraphResult<&Record> {
        let slot = self.slot(id).ok_or(GraphError::NotResident(id))?;
        Ok(&self.records[slot])
    }

    pub fn get_mut(&mut self, id: RecordId) -> GraphResult<&mut Record> {
        let slot = self.slot(id).ok_or(GraphError::NotResident(id))?;
        Ok(&mut self.records[slot])
    }

    fn primary_slot(&self, identity: &Identity) -> Option<usize> {
        self.by_identity.get(identity).and_then(|slots| slots.first().copied())
    }

    /// Find a record by identity, locally first and then in the store.
    ///
    /// Records fetched from the store are adopted into the cache.
    pub fn resolve(&mut self, identity: &Identity) -> GraphResult<Option<RecordId>> {
        if self.enabled {
            if let Some(slot) = self.primary_slot(identity) {
                return Ok(Some(self.handle(slot)));
            }
        }
        let Some(store) = self.store.clone() else {
            return Ok(None);
        };
        match store.get(identity)? {
            Some(snapshot) => self.adopt(snapshot).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve several identities at once. Unknown identities are skipped.
    pub fn resolve_links(&mut self, identities: &[Identity]) -> GraphResult<Vec<RecordId>> {
        let mut found = Vec::with_capacity(identities.len());
        let mut missing = Vec::new();
        for identity in identities {
            match self.primary_slot(identity).filter(|_| self.enabled) {
                Some(slot) => found.push(self.handle(slot)),
                None => missing.push(identity.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(found);
        }
        if let Some(store) = self.store.clone() {
            for snapshot in store.get_many(&missing)? {
                found.push(self.adopt(snapshot)?);
            }
        }
        Ok(found)
    }

    /// Neighbors of a record in one category, wherever they live
    pub fn neighbors_of(
        &mut self,
        id: RecordId,
        kind: RecordKind,
        subtype: Option<&str>,
    ) -> GraphResult<Vec<RecordId>> {
        let identities: Vec<Identity> = self
            .get(id)?
            .neighbors_of(kind, subtype)
            .into_iter()
            .cloned()
            .collect();
        self.resolve_links(&identities)
    }

    /// Link two records in both directions.
    ///
    /// Returns `Ok(false)` without touching either record when the link would
    /// overflow a maximum on either side.
    pub fn add_link(&mut self, a: RecordId, b: RecordId) -> GraphResult<bool> {
        let slot_a = self.slot(a).ok_or(GraphError::NotResident(a))?;
        let slot_b = self.slot(b).ok_or(GraphError::NotResident(b))?;
        let target_a = self.records[slot_a].as_link_target();
        let target_b = self.records[slot_b].as_link_target();
        if target_a.identity == target_b.identity {
            return Ok(false);
        }
        if !self.records[slot_a].can_link(&target_b) || !self.records[slot_b].can_link(&target_a) {
            debug!(
                from = %target_a.identity,
                to = %target_b.identity,
                "link refused by cardinality bounds"
            );
            return Ok(false);
        }
        self.records[slot_a].insert_link(target_b);
        self.records[slot_b].insert_link(target_a);
        Ok(true)
    }

    /// Mark a record as unwanted. It is dropped at reconciliation unless it is
    /// returned explicitly or created again.
    pub fn discard(&mut self, id: RecordId) -> GraphResult<()> {
        let identity = self.get(id)?.identity().clone();
        self.discarded.insert(identity);
        Ok(())
    }

    pub fn is_discarded(&self, id: RecordId) -> GraphResult<bool> {
        Ok(self.discarded.contains(self.get(id)?.identity()))
    }

    /// Mark a record as bookkeeping data, exempt from unreturned and scope warnings
    pub fn autogenerate(&mut self, id: RecordId) -> GraphResult<()> {
        let identity = self.get(id)?.identity().clone();
        self.autogenerated.insert(identity);
        Ok(())
    }

    /// Forget everything collected so far, without producing results
    pub fn abandon(&mut self) {
        if !self.records.is_empty() {
            debug!(records = self.records.len(), "abandoning local cache");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.records.clear();
        self.by_identity.clear();
        self.discarded.clear();
        self.autogenerated.clear();
        self.adopted.clear();
        self.generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        self.state = CacheState::Idle;
    }

    /// Turn a plugin's output into the final set of records to commit.
    ///
    /// `input` is the record the plugin was run on. The cache is reset
    /// afterwards whether or not reconciliation succeeds, and every handle
    /// it issued becomes invalid.
    pub fn reconcile(
        &mut self,
        output: PluginOutput,
        input: RecordId,
    ) -> GraphResult<Reconciliation> {
        self.state = CacheState::Reconciling;
        let outcome = if self.enabled {
            self.run_reconciliation(output, input)
        } else {
            self.passthrough(output, input)
        };
        if let Ok(reconciliation) = &outcome {
            for diagnostic in &reconciliation.diagnostics {
                warn!("{}", diagnostic);
            }
        }
        self.reset();
        outcome
    }

    fn returned_slots(
        &self,
        output: PluginOutput,
        input: RecordId,
    ) -> GraphResult<(Vec<usize>, usize)> {
        let input = self.slot(input).ok_or(GraphError::NotResident(input))?;
        let returned = output
            .into_ids()
            .into_iter()
            .map(|id| self.slot(id).ok_or(GraphError::MalformedResult(id)))
            .collect::<GraphResult<Vec<_>>>()?;
        Ok((returned, input))
    }

    /// Local mode: no closure, no merging, no pruning
    fn passthrough(
        &mut self,
        output: PluginOutput,
        input: RecordId,
    ) -> GraphResult<Reconciliation> {
        let (mut returned, input) = self.returned_slots(output, input)?;
        let input_identity = self.records[input].identity();
        let input_returned = returned
            .iter()
            .any(|&slot| self.records[slot].identity() == input_identity);
        if !input_returned && !self.discarded.contains(input_identity) {
            returned.insert(0, input);
        }

        let mut records = self.take_records();
        let records = returned
            .into_iter()
            .filter_map(|slot| records[slot].take())
            .collect();
        Ok(Reconciliation {
            records,
            diagnostics: Vec::new(),
        })
    }

    fn run_reconciliation(
        &mut self,
        output: PluginOutput,
        input: RecordId,
    ) -> GraphResult<Reconciliation> {
        let (returned, input) = self.returned_slots(output, input)?;
        let mut diagnostics = Vec::new();

        // The input goes first unless it was returned or deliberately discarded.
        let mut candidates = Vec::with_capacity(returned.len() + 1);
        let input_identity = self.records[input].identity().clone();
        let input_returned = returned
            .iter()
            .any(|&slot| self.records[slot].identity() == &input_identity);
        if !input_returned && !self.discarded.contains(&input_identity) {
            candidates.push(input);
        }
        candidates.extend(returned.iter().copied());

        // An explicit return beats an earlier discard.
        for &slot in &returned {
            let identity = self.records[slot].identity();
            if self.discarded.remove(identity) {
                diagnostics.push(Diagnostic::DiscardedReturned {
                    identity: identity.clone(),
                });
            }
        }

        // Collapse duplicates into their first occurrence.
        let mut order: Vec<Identity> = Vec::new();
        let mut primary: HashMap<Identity, usize> = HashMap::new();
        let mut folded: HashSet<usize> = HashSet::new();
        for slot in candidates {
            let identity = self.records[slot].identity().clone();
            match primary.get(&identity).copied() {
                None => {
                    primary.insert(identity.clone(), slot);
                    order.push(identity);
                }
                Some(first) => {
                    // The same handle returned twice is not a duplicate.
                    if first == slot || !folded.insert(slot) {
                        continue;
                    }
                    diagnostics.push(Diagnostic::DuplicateResult {
                        identity,
                        type_name: self.records[slot].type_name().to_string(),
                    });
                    diagnostics.extend(self.fold(first, slot)?);
                }
            }
        }

        for identity in &order {
            self.records[primary[identity]].validate_link_minimums()?;
        }

        // Pull in every resident neighbor reachable from the result set.
        let mut queue: VecDeque<Identity> = order.iter().cloned().collect();
        let mut referenced_discards: Vec<Identity> = Vec::new();
        while let Some(identity) = queue.pop_front() {
            let head = primary[&identity];
            diagnostics.extend(self.collapse_twins(head, &mut folded)?);

            let neighbors: Vec<Identity> = self.records[head].links().all().cloned().collect();
            for neighbor in neighbors {
                if primary.contains_key(&neighbor) {
                    continue;
                }
                if self.discarded.contains(&neighbor) {
                    if !referenced_discards.contains(&neighbor) {
                        referenced_discards.push(neighbor);
                    }
                    continue;
                }
                let Some(slot) = self.primary_slot(&neighbor) else {
                    continue;
                };
                if !self.autogenerated.contains(&neighbor) && !self.adopted.contains(&slot) {
                    diagnostics.push(Diagnostic::Unreturned {
                        identity: neighbor.clone(),
                        type_name: self.records[slot].type_name().to_string(),
                    });
                }
                primary.insert(neighbor.clone(), slot);
                order.push(neighbor.clone());
                queue.push_back(neighbor);
            }
        }
        diagnostics.extend(
            referenced_discards
                .into_iter()
                .map(|identity| Diagnostic::DiscardedReferenced { identity }),
        );

        // Created data that nobody returned or referenced.
        let mut orphans: HashSet<&Identity> = HashSet::new();
        for (slot, record) in self.records.iter().enumerate() {
            let identity = record.identity();
            if primary.contains_key(identity)
                || self.discarded.contains(identity)
                || self.autogenerated.contains(identity)
                || self.adopted.contains(&slot)
                || !orphans.insert(identity)
            {
                continue;
            }
            diagnostics.push(Diagnostic::Orphaned {
                identity: identity.clone(),
                type_name: record.type_name().to_string(),
            });
        }

        order.retain(|identity| !self.discarded.contains(identity));

        let kept = self.prune_scope(&order, &primary);
        for identity in &order {
            let record = &self.records[primary[identity]];
            if kept.contains(identity)
                && !record.is_in_scope(self.context.scope())
                && !self.autogenerated.contains(identity)
            {
                diagnostics.push(Diagnostic::OutOfScope {
                    identity: identity.clone(),
                    type_name: record.type_name().to_string(),
                });
            }
        }
        order.retain(|identity| kept.contains(identity));

        let mut records = self.take_records();
        let records = order
            .iter()
            .filter_map(|identity| records[primary[identity]].take())
            .collect();
        Ok(Reconciliation { records, diagnostics })
    }

    fn take_records(&mut self) -> Vec<Option<Record>> {
        std::mem::take(&mut self.records).into_iter().map(Some).collect()
    }

    /// Merge the record in `newer` into the one in `older`
    fn fold(&mut self, older: usize, newer: usize) -> GraphResult<Vec<Diagnostic>> {
        let newer = self.records[newer].clone();
        self.records[older].merge(&newer)
    }

    /// Merge every other resident copy of the record at `head` into it
    fn collapse_twins(
        &mut self,
        head: usize,
        folded: &mut HashSet<usize>,
    ) -> GraphResult<Vec<Diagnostic>> {
        let identity = self.records[head].identity();
        let twins: Vec<usize> = self
            .by_identity
            .get(identity)
            .map(|slots| {
                slots
                    .iter()
                    .copied()
                    .filter(|&slot| slot != head && !folded.contains(&slot))
                    .collect()
            })
            .unwrap_or_default();

        let mut diagnostics = Vec::new();
        for twin in twins {
            folded.insert(twin);
            let notes = if twin < head {
                let older = self.records[twin].clone();
                self.records[head].reverse_merge(&older)?
            } else {
                self.fold(head, twin)?
            };
            diagnostics.extend(notes);
        }
        Ok(diagnostics)
    }

    /// Identities that survive scope pruning.
    ///
    /// In-scope records and their neighbors are kept; an out-of-scope record
    /// is kept once something kept points at it, and then keeps its own
    /// neighbors. Repeats until nothing changes.
    fn prune_scope(
        &self,
        order: &[Identity],
        primary: &HashMap<Identity, usize>,
    ) -> HashSet<Identity> {
        let scope = self.context.scope();
        let mut keep: HashSet<Identity> = HashSet::new();
        let mut outside: Vec<&Identity> = Vec::new();
        for identity in order {
            let record = &self.records[primary[identity]];
            if record.is_in_scope(scope) {
                keep.insert(identity.clone());
                keep.extend(record.links().all().cloned());
            } else {
                outside.push(identity);
            }
        }

        loop {
            let (absorbed, rest): (Vec<&Identity>, Vec<&Identity>) =
                outside.into_iter().partition(|identity| keep.contains(*identity));
            outside = rest;
            if absorbed.is_empty() {
                break;
            }
            for identity in absorbed {
                keep.extend(self.records[primary[identity]].links().all().cloned());
            }
        }

        for identity in outside {
            debug!(identity = %identity, "dropping unreachable out-of-scope data");
        }
        keep
    }
}
