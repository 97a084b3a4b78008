//! In-memory record store

use super::traits::{RecordFilter, RecordStore, StorageResult};
use crate::graph::{Identity, RecordSnapshot};
use dashmap::DashMap;

/// Concurrent in-memory store, used in tests and for throwaway audits
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<Identity, RecordSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, identity: &Identity) -> StorageResult<Option<RecordSnapshot>> {
        Ok(self.records.get(identity).map(|entry| entry.value().clone()))
    }

    fn get_many(&self, identities: &[Identity]) -> StorageResult<Vec<RecordSnapshot>> {
        Ok(identities
            .iter()
            .filter_map(|identity| self.records.get(identity).map(|entry| entry.value().clone()))
            .collect())
    }

    fn add_many(&self, records: &[RecordSnapshot]) -> StorageResult<()> {
        for record in records {
            self.records.insert(record.identity.clone(), record.clone());
        }
        Ok(())
    }

    fn has(&self, identity: &Identity) -> StorageResult<bool> {
        Ok(self.records.contains_key(identity))
    }

    fn remove(&self, identity: &Identity) -> StorageResult<bool> {
        Ok(self.records.remove(identity).is_some())
    }

    fn keys(&self, filter: &RecordFilter) -> StorageResult<Vec<Identity>> {
        filter.validate()?;
        let mut keys: Vec<Identity> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        if let Some(limit) = filter.limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    fn count(&self, filter: &RecordFilter) -> StorageResult<usize> {
        filter.validate()?;
        Ok(self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count())
    }
}
