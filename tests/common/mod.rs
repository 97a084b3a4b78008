//! Common test utilities for audit pipeline tests
//!
//! Provides a runner over a fresh store, seeded with a root domain, and a
//! handful of plugins that exercise the reconciliation rules.

#![allow(dead_code)]

use async_trait::async_trait;
use auditgraph::kinds::{DOMAIN, IP_ADDRESS, TEXT, URL, VULNERABILITY};
use auditgraph::{
    builtin_registry, AttrValue, AuditContext, AuditScope, Identity, LocalCache, MemoryStore,
    Plugin, PluginError, PluginOutput, PluginRunner, RecordFilter, RecordId, RecordSnapshot,
    RecordStore, SchemaRegistry, StorageResult,
};
use std::sync::Arc;
use std::time::Duration;

pub fn registry() -> Arc<SchemaRegistry> {
    Arc::new(builtin_registry().expect("built-in schemas are valid"))
}

/// Store a root domain record and return its snapshot
pub fn seed_domain(
    store: &dyn RecordStore,
    registry: &SchemaRegistry,
    hostname: &str,
) -> RecordSnapshot {
    let snapshot = registry
        .build(DOMAIN)
        .unwrap()
        .identity("hostname", hostname)
        .finish(0)
        .unwrap()
        .snapshot();
    store.add_many(&[snapshot.clone()]).unwrap();
    snapshot
}

/// Runner over `store` scoped to `targets`
pub fn runner(store: Arc<dyn RecordStore>, targets: &[&str], local: bool) -> PluginRunner {
    let context = AuditContext::new(AuditScope::new(targets, true), 0, local);
    PluginRunner::new(store, registry(), context)
}

/// Resolves a domain to a fixed address and crawls one page.
///
/// Returns only the address; the page is linked but not returned, and a
/// stray text record is created and left unreferenced.
pub struct Resolver {
    pub address: &'static str,
}

#[async_trait]
impl Plugin for Resolver {
    fn id(&self) -> &str {
        "resolver"
    }

    async fn process(
        &self,
        input: RecordId,
        cache: &mut LocalCache,
    ) -> Result<PluginOutput, PluginError> {
        let registry = Arc::clone(cache.registry());
        let hostname = cache
            .get(input)?
            .attr("hostname")
            .and_then(AttrValue::as_str)
            .ok_or_else(|| PluginError::InvalidInput("expected a domain".into()))?
            .to_string();

        let ip = cache.create(
            registry
                .build(IP_ADDRESS)?
                .identity("address", self.address)
                .attr("version", AttrValue::Int(4)),
        )?;
        cache.add_link(input, ip)?;

        let page = cache.create(
            registry
                .build(URL)?
                .identity("url", format!("http://{}/", hostname))
                .identity("method", "GET"),
        )?;
        cache.add_link(input, page)?;

        cache.create(registry.build(TEXT)?.identity("raw_data", "debug output"))?;
        Ok(PluginOutput::One(ip))
    }
}

/// Reports a vulnerability on its input, optionally without linking it
pub struct Finder {
    pub title: &'static str,
    pub level: i64,
    pub link: bool,
}

#[async_trait]
impl Plugin for Finder {
    fn id(&self) -> &str {
        "finder"
    }

    async fn process(
        &self,
        input: RecordId,
        cache: &mut LocalCache,
    ) -> Result<PluginOutput, PluginError> {
        let builder = cache
            .registry()
            .build(VULNERABILITY)?
            .identity("title", self.title)
            .attr("level", AttrValue::Int(self.level));
        let vuln = cache.create(builder)?;
        if self.link {
            cache.add_link(input, vuln)?;
        }
        Ok(vec![vuln].into())
    }
}

/// Follows a redirect off-scope and back
pub struct Redirects;

#[async_trait]
impl Plugin for Redirects {
    fn id(&self) -> &str {
        "redirects"
    }

    async fn process(
        &self,
        input: RecordId,
        cache: &mut LocalCache,
    ) -> Result<PluginOutput, PluginError> {
        let registry = Arc::clone(cache.registry());
        let outside =
            cache.create(registry.build(DOMAIN)?.identity("hostname", "sso.partner.net"))?;
        let unrelated =
            cache.create(registry.build(DOMAIN)?.identity("hostname", "ads.tracker.org"))?;
        cache.add_link(input, outside)?;
        Ok(PluginOutput::Many(vec![outside, unrelated]))
    }
}

/// Links a text note to its input
pub struct Annotate {
    pub text: &'static str,
}

#[async_trait]
impl Plugin for Annotate {
    fn id(&self) -> &str {
        "annotate"
    }

    async fn process(
        &self,
        input: RecordId,
        cache: &mut LocalCache,
    ) -> Result<PluginOutput, PluginError> {
        let builder = cache.registry().build(TEXT)?.identity("raw_data", self.text);
        let note = cache.create(builder)?;
        cache.add_link(input, note)?;
        Ok(note.into())
    }
}

/// Memory store whose reads stall, widening the gap between read and write
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

impl RecordStore for SlowStore {
    fn get(&self, identity: &Identity) -> StorageResult<Option<RecordSnapshot>> {
        self.inner.get(identity)
    }

    fn get_many(&self, identities: &[Identity]) -> StorageResult<Vec<RecordSnapshot>> {
        let found = self.inner.get_many(identities);
        std::thread::sleep(self.delay);
        found
    }

    fn add_many(&self, records: &[RecordSnapshot]) -> StorageResult<()> {
        self.inner.add_many(records)
    }

    fn has(&self, identity: &Identity) -> StorageResult<bool> {
        self.inner.has(identity)
    }

    fn remove(&self, identity: &Identity) -> StorageResult<bool> {
        self.inner.remove(identity)
    }

    fn keys(&self, filter: &RecordFilter) -> StorageResult<Vec<Identity>> {
        self.inner.keys(filter)
    }

    fn count(&self, filter: &RecordFilter) -> StorageResult<usize> {
        self.inner.count(filter)
    }
}
