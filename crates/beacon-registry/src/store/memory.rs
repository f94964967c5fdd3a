//! In-process store

use super::{KeyValue, KvStore};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Store backed by an ordered in-memory map.
///
/// Leases never expire; an entry lives until it is removed or the store is
/// dropped. Prefix reads return entries in key order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a key, as if its lease had expired
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Write a key without a lease, as a third-party writer would
    pub fn put(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn keep(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
            .collect())
    }
}
