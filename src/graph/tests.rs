//! End-to-end scenarios for identity, merging, linking and reconciliation

use super::*;
use crate::plugin::PluginOutput;
use crate::scope::{AuditContext, AuditScope};
use std::collections::BTreeSet;
use std::sync::Arc;

fn schemas() -> Arc<SchemaRegistry> {
    let host = EntitySchema::builder("Host", RecordKind::Resource, "host")
        .identity("name")
        .mergeable("ports", MergeStrategy::Default)
        .mergeable("history", MergeStrategy::Default)
        .mergeable("banner", MergeStrategy::Default)
        .scope_attribute("name")
        .build()
        .unwrap();
    let service = EntitySchema::builder("Service", RecordKind::Resource, "host")
        .identity("name")
        .build()
        .unwrap();
    let note = EntitySchema::builder("Note", RecordKind::Information, "note")
        .identity("text")
        .build()
        .unwrap();
    let finding = EntitySchema::builder("Finding", RecordKind::Vulnerability, "weak-cipher")
        .identity("title")
        .max_of_kind(RecordKind::Resource, 1)
        .build()
        .unwrap();
    Arc::new(
        SchemaRegistry::new()
            .with(host)
            .with(service)
            .with(note)
            .with(finding),
    )
}

fn cache(registry: &Arc<SchemaRegistry>) -> LocalCache {
    let context = AuditContext::new(AuditScope::new(["example.com"], true), 0, false);
    LocalCache::new(context, Arc::clone(registry), true)
}

fn host(cache: &mut LocalCache, name: &str) -> RecordId {
    let builder = cache.registry().build("Host").unwrap().identity("name", name);
    cache.create(builder).unwrap()
}

fn note(cache: &mut LocalCache, text: &str) -> RecordId {
    let builder = cache.registry().build("Note").unwrap().identity("text", text);
    cache.create(builder).unwrap()
}

fn identity_of(cache: &LocalCache, id: RecordId) -> Identity {
    cache.get(id).unwrap().identity().clone()
}

fn identities(result: &Reconciliation) -> BTreeSet<Identity> {
    result.identities().cloned().collect()
}

// ============================================================================
// Identity
// ============================================================================

#[test]
fn identity_ignores_attribute_order() {
    let schema = EntitySchema::builder("Pair", RecordKind::Information, "pair")
        .identity("a")
        .identity("b")
        .build()
        .unwrap();
    let first = Record::build(&schema).identity("a", "1").identity("b", "2").finish(0).unwrap();
    let second = Record::build(&schema).identity("b", "2").identity("a", "1").finish(0).unwrap();
    assert_eq!(first.identity(), second.identity());
    assert_eq!(first.identity().as_str().len(), IDENTITY_HEX_LEN);
}

#[test]
fn identity_differs_across_types() {
    let registry = schemas();
    let a = registry.build("Host").unwrap().identity("name", "x").finish(0).unwrap();
    let b = registry.build("Service").unwrap().identity("name", "x").finish(0).unwrap();
    assert_ne!(a.identity(), b.identity());
}

#[test]
fn records_without_identity_never_collide() {
    let schema = EntitySchema::builder("Event", RecordKind::Information, "event")
        .build()
        .unwrap();
    let a = Record::build(&schema).finish(0).unwrap();
    let b = Record::build(&schema).finish(0).unwrap();
    assert_ne!(a, b);
}

// ============================================================================
// Links
// ============================================================================

#[test]
fn link_lands_in_all_three_indices_on_both_sides() {
    let registry = schemas();
    let mut cache = cache(&registry);
    let h = host(&mut cache, "example.com");
    let n = note(&mut cache, "hello");
    assert!(cache.add_link(h, n).unwrap());

    let (hid, nid) = (identity_of(&cache, h), identity_of(&cache, n));
    let h_rec = cache.get(h).unwrap();
    let n_rec = cache.get(n).unwrap();
    assert!(h_rec.links().all().any(|i| i == &nid));
    assert_eq!(h_rec.neighbors_of(RecordKind::Information, None), vec![&nid]);
    assert_eq!(h_rec.neighbors_of(RecordKind::Information, Some("note")), vec![&nid]);
    assert!(n_rec.links().all().any(|i| i == &hid));
    assert_eq!(n_rec.neighbors_of(RecordKind::Resource, None), vec![&hid]);
    assert_eq!(n_rec.neighbors_of(RecordKind::Resource, Some("host")), vec![&hid]);
}

#[test]
fn second_link_past_kind_maximum_is_silently_refused() {
    let registry = schemas();
    let mut cache = cache(&registry);
    let builder = registry.build("Finding").unwrap().identity("title", "RC4");
    let finding = cache.create(builder).unwrap();
    let a = host(&mut cache, "a.example.com");
    let b = host(&mut cache, "b.example.com");

    assert!(cache.add_link(finding, a).unwrap());
    assert!(!cache.add_link(finding, b).unwrap());
    assert_eq!(
        cache.get(finding).unwrap().links().count_of_kind(RecordKind::Resource),
        1
    );
}

#[test]
fn minimum_check_is_strict() {
    let schema = EntitySchema::builder("Report", RecordKind::Information, "report")
        .identity("id")
        .min_data(1)
        .build()
        .unwrap();
    let registry = Arc::new(SchemaRegistry::new().with(Arc::clone(&schema)));
    let mut cache = LocalCache::new(AuditContext::default(), Arc::clone(&registry), true);
    let report = cache.create(Record::build(&schema).identity("id", "r1")).unwrap();
    assert!(matches!(
        cache.get(report).unwrap().validate_link_minimums(),
        Err(GraphError::LinkCardinality { kind: None, required: 1, found: 0, .. })
    ));

    let other = cache.create(Record::build(&schema).identity("id", "r2")).unwrap();
    cache.add_link(report, other).unwrap();
    assert!(cache.get(report).unwrap().validate_link_minimums().is_ok());
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn scenario_a_default_merge() {
    let registry = schemas();
    let build = || registry.build("Host").unwrap().identity("name", "example.com");

    let mut old = build()
        .attr("ports", AttrValue::Set(["22".to_string()].into()))
        .attr("history", AttrValue::List(vec!["dns".into()]))
        .attr("banner", "nginx/1.18")
        .finish(0)
        .unwrap();
    let new = build()
        .attr("ports", AttrValue::Set(["443".to_string()].into()))
        .attr("history", AttrValue::List(vec!["http".into()]))
        .attr("banner", "nginx/1.25")
        .finish(0)
        .unwrap();

    old.merge(&new).unwrap();
    assert_eq!(
        old.attr("ports"),
        Some(&AttrValue::Set(["22".to_string(), "443".to_string()].into()))
    );
    assert_eq!(
        old.attr("history"),
        Some(&AttrValue::List(vec!["dns".into(), "http".into()]))
    );
    assert_eq!(old.attr("banner"), Some(&AttrValue::from("nginx/1.25")));
}

#[test]
fn scenario_b_input_is_included() {
    let registry = schemas();
    let mut cache = cache(&registry);
    let r = host(&mut cache, "example.com");
    let n = note(&mut cache, "found");
    cache.add_link(n, r).unwrap();
    let (rid, nid) = (identity_of(&cache, r), identity_of(&cache, n));

    let result = cache.reconcile(PluginOutput::One(n), r).unwrap();
    assert_eq!(identities(&result), BTreeSet::from([rid.clone(), nid]));
    assert_eq!(result.identities().next(), Some(&rid));
    assert!(result.diagnostics.is_empty());
}

#[test]
fn scenario_c_unreturned_but_linked() {
    let registry = schemas();
    let mut cache = cache(&registry);
    let r = host(&mut cache, "example.com");
    let returned = note(&mut cache, "returned");
    let c = note(&mut cache, "forgotten");
    cache.add_link(returned, c).unwrap();
    let cid = identity_of(&cache, c);

    let result = cache.reconcile(PluginOutput::One(returned), r).unwrap();
    assert!(result.contains(&cid));
    assert_eq!(
        result.diagnostics,
        vec![Diagnostic::Unreturned {
            identity: cid,
            type_name: "Note".to_string(),
        }]
    );
}

#[test]
fn scenario_c_autogenerated_is_silent() {
    let registry = schemas();
    let mut cache = cache(&registry);
    let r = host(&mut cache, "example.com");
    let returned = note(&mut cache, "returned");
    let c = note(&mut cache, "bookkeeping");
    cache.add_link(returned, c).unwrap();
    cache.autogenerate(c).unwrap();
    let cid = identity_of(&cache, c);

    let result = cache.reconcile(PluginOutput::One(returned), r).unwrap();
    assert!(result.contains(&cid));
    assert!(result.diagnostics.is_empty());
}

#[test]
fn scenario_d_discarded_then_returned() {
    let registry = schemas();
    let mut cache = cache(&registry);
    let r = host(&mut cache, "example.com");
    let d = note(&mut cache, "changed my mind");
    cache.discard(d).unwrap();
    let did = identity_of(&cache, d);

    let result = cache.reconcile(PluginOutput::One(d), r).unwrap();
    assert!(result.contains(&did));
    assert_eq!(
        result.diagnostics,
        vec![Diagnostic::DiscardedReturned { identity: did }]
    );
}

#[test]
fn scenario_e_scope_pruning() {
    let registry = schemas();
    let mut cache = cache(&registry);
    let a = host(&mut cache, "www.example.com");
    let r = host(&mut cache, "cdn.example.net");
    let q = host(&mut cache, "unrelated.example.org");
    cache.add_link(a, r).unwrap();
    let (aid, rid, qid) = (identity_of(&cache, a), identity_of(&cache, r), identity_of(&cache, q));

    let result = cache.reconcile(PluginOutput::Many(vec![r, q]), a).unwrap();
    assert!(result.contains(&aid));
    assert!(result.contains(&rid));
    assert!(!result.contains(&qid));
    assert!(result.diagnostics.contains(&Diagnostic::OutOfScope {
        identity: rid,
        type_name: "Host".to_string(),
    }));
    assert!(!result.diagnostics.iter().any(|d| d.identity() == Some(&qid)));
}

#[test]
fn scenario_f_reconciliation_is_idempotent() {
    let registry = schemas();
    let mut cache = cache(&registry);
    let r = host(&mut cache, "example.com");
    let n = note(&mut cache, "a");
    let m = note(&mut cache, "b");
    cache.add_link(r, n).unwrap();
    cache.add_link(r, m).unwrap();
    let first = cache.reconcile(PluginOutput::Many(vec![n, m]), r).unwrap();

    let snapshots: Vec<RecordSnapshot> = first.records.iter().map(Record::snapshot).collect();
    let mut again = cache;
    let ids: Vec<RecordId> = snapshots
        .iter()
        .map(|s| again.adopt(s.clone()).unwrap())
        .collect();
    let second = again
        .reconcile(PluginOutput::Many(ids[1..].to_vec()), ids[0])
        .unwrap();

    let resnap: Vec<RecordSnapshot> = second.records.iter().map(Record::snapshot).collect();
    assert_eq!(resnap, snapshots);
    assert!(second.diagnostics.is_empty());
}

#[test]
fn duplicates_are_merged_and_reported() {
    let registry = schemas();
    let mut cache = cache(&registry);
    let r = host(&mut cache, "example.com");
    let first = cache
        .create(
            registry
                .build("Host")
                .unwrap()
                .identity("name", "api.example.com")
                .attr("ports", AttrValue::Set(["80".to_string()].into())),
        )
        .unwrap();
    let second = cache
        .create(
            registry
                .build("Host")
                .unwrap()
                .identity("name", "api.example.com")
                .attr("ports", AttrValue::Set(["443".to_string()].into())),
        )
        .unwrap();
    let dup = identity_of(&cache, first);

    let result = cache.reconcile(PluginOutput::Many(vec![first, second]), r).unwrap();
    assert_eq!(result.records.len(), 2);
    assert_eq!(
        result.get(&dup).unwrap().attr("ports"),
        Some(&AttrValue::Set(["443".to_string(), "80".to_string()].into()))
    );
    assert_eq!(
        result.diagnostics,
        vec![Diagnostic::DuplicateResult {
            identity: dup,
            type_name: "Host".to_string(),
        }]
    );
}

#[test]
fn cardinality_failure_still_resets_cache() {
    let registry = schemas();
    let schema = EntitySchema::builder("Needy", RecordKind::Information, "needy")
        .identity("id")
        .min_of_kind(RecordKind::Vulnerability, 1)
        .build()
        .unwrap();
    let mut cache = cache(&registry);
    let r = host(&mut cache, "example.com");
    let needy = cache.create(Record::build(&schema).identity("id", "1")).unwrap();

    assert!(cache.reconcile(PluginOutput::One(needy), r).is_err());
    assert_eq!(cache.state(), CacheState::Idle);
    assert!(cache.is_empty());
}
