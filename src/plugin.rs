//! Plugin contract and the per-invocation runner
//!
//! A plugin receives one input record inside a fresh [`LocalCache`], creates
//! and links records through the cache and returns some of them. The runner
//! always reconciles that output before committing it to the store.

use crate::graph::{
    Diagnostic, GraphError, Identity, LocalCache, Record, RecordId, RecordSnapshot, SchemaRegistry,
};
use crate::scope::AuditContext;
use crate::storage::{RecordStore, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a plugin hands back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PluginOutput {
    #[default]
    Nothing,
    One(RecordId),
    Many(Vec<RecordId>),
}

impl PluginOutput {
    /// Normalize to a list
    pub fn into_ids(self) -> Vec<RecordId> {
        match self {
            Self::Nothing => Vec::new(),
            Self::One(id) => vec![id],
            Self::Many(ids) => ids,
        }
    }
}

impl From<RecordId> for PluginOutput {
    fn from(id: RecordId) -> Self {
        Self::One(id)
    }
}

impl From<Vec<RecordId>> for PluginOutput {
    fn from(ids: Vec<RecordId>) -> Self {
        Self::Many(ids)
    }
}

impl From<Option<RecordId>> for PluginOutput {
    fn from(id: Option<RecordId>) -> Self {
        id.map_or(Self::Nothing, Self::One)
    }
}

/// Errors a plugin can report
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("plugin error: {0}")]
    Internal(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// The contract plugins implement
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique identifier for this plugin
    fn id(&self) -> &str;

    /// Process one input record.
    ///
    /// `input` is already resident in `cache`. Records created through the
    /// cache and linked to returned data are kept even if not returned.
    async fn process(
        &self,
        input: RecordId,
        cache: &mut LocalCache,
    ) -> Result<PluginOutput, PluginError>;
}

/// Errors from a full plugin run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("plugin {plugin} failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PluginError,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("commit task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of one plugin run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub plugin_id: String,
    /// Identities written to the store, in result order
    pub committed: Vec<Identity>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs plugins against the audit store, one invocation at a time per call.
///
/// Plugins may run concurrently on clones of one runner; their commits are
/// serialized so no stored merge is lost. Concurrent runs over one store
/// must share a runner (or clones of it).
#[derive(Clone)]
pub struct PluginRunner {
    store: Arc<dyn RecordStore>,
    registry: Arc<SchemaRegistry>,
    context: AuditContext,
    commit_lock: Arc<Mutex<()>>,
}

impl PluginRunner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<SchemaRegistry>,
        context: AuditContext,
    ) -> Self {
        Self {
            store,
            registry,
            context,
            commit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn context(&self) -> &AuditContext {
        &self.context
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Run one plugin on one stored record and commit what it produced
    pub async fn run(
        &self,
        plugin: &dyn Plugin,
        input: RecordSnapshot,
    ) -> Result<RunReport, RunError> {
        let mut cache = LocalCache::for_context(self.context.clone(), Arc::clone(&self.registry))
            .with_store(Arc::clone(&self.store));
        debug!(
            plugin = plugin.id(),
            input = %input.identity,
            local = self.context.is_local(),
            "running plugin"
        );

        let input = cache.adopt(input)?;
        let output = match plugin.process(input, &mut cache).await {
            Ok(output) => output,
            Err(source) => {
                cache.abandon();
                warn!(plugin = plugin.id(), error = %source, "plugin failed, nothing committed");
                return Err(RunError::Plugin {
                    plugin: plugin.id().to_string(),
                    source,
                });
            }
        };

        let reconciliation = cache.reconcile(output, input)?;
        let mut diagnostics = reconciliation.diagnostics;
        let (committed, merge_notes) = self.commit(reconciliation.records).await?;
        for note in &merge_notes {
            warn!("{}", note);
        }
        diagnostics.extend(merge_notes);

        info!(
            plugin = plugin.id(),
            committed = committed.len(),
            diagnostics = diagnostics.len(),
            "plugin finished"
        );
        Ok(RunReport {
            plugin_id: plugin.id().to_string(),
            committed,
            diagnostics,
        })
    }

    /// Merge fresh records over their stored versions and write them back.
    ///
    /// Runs on the blocking pool since the store may do disk I/O. The read,
    /// merge and write happen under the commit lock.
    async fn commit(
        &self,
        records: Vec<Record>,
    ) -> Result<(Vec<Identity>, Vec<Diagnostic>), RunError> {
        let guard = Arc::clone(&self.commit_lock).lock_owned().await;
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            commit_blocking(store.as_ref(), &registry, records)
        })
        .await?
    }
}

fn commit_blocking(
    store: &dyn RecordStore,
    registry: &SchemaRegistry,
    records: Vec<Record>,
) -> Result<(Vec<Identity>, Vec<Diagnostic>), RunError> {
    let identities: Vec<Identity> = records.iter().map(|r| r.identity().clone()).collect();
    let mut stored: HashMap<Identity, RecordSnapshot> = store
        .get_many(&identities)?
        .into_iter()
        .map(|snapshot| (snapshot.identity.clone(), snapshot))
        .collect();

    let mut diagnostics = Vec::new();
    let mut snapshots = Vec::with_capacity(records.len());
    for mut record in records {
        if let Some(previous) = stored.remove(record.identity()) {
            let previous = registry.rehydrate(previous)?;
            diagnostics.extend(record.reverse_merge(&previous)?);
        }
        snapshots.push(record.snapshot());
    }

    store.add_many(&snapshots)?;
    Ok((identities, diagnostics))
}
