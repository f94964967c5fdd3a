//! Key-value store seam
//!
//! The registry needs two primitives from its store: a lease-backed write
//! that the store removes once the owner stops refreshing it, and a prefix
//! read. `EtcdStore` provides them on etcd; `MemoryStore` keeps everything in
//! process for local runs and tests.

mod etcd;
mod memory;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;

/// A key/value pair returned by a prefix read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Store primitives used by the registry.
///
/// Implementations must be safe to share between concurrent registration
/// tasks and discovery reads.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Establish a lease-backed key. Renewal after a successful call is the
    /// store's responsibility.
    async fn keep(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// All current entries whose key starts with `prefix`, empty when none match
    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;
}
