//! Service Registry
//!
//! Write path: `register_service_node` validates its input, then hands the
//! node to a background liveness task that retries forever until the store
//! accepts the key once. The caller never sees store failures on this path.
//!
//! Read path: `get_service_nodes` issues a single prefix read. Store failures
//! are returned to the caller as-is, without retry.

mod registration;

pub use registration::{RegistrationHandle, RegistrationState};

use crate::codec::{path, value};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::node::Node;
use crate::observability::{events, metrics};
use crate::store::{EtcdStore, KvStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Behaviour switches for a [`ServiceRegistry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Fixed delay between failed `keep` attempts
    pub retry_interval: Duration,
    /// Reject service and node names containing `/` instead of collapsing them to `-`
    pub strict_names: bool,
    /// Return the bare node name from discovery instead of the full store key
    pub bare_node_names: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            strict_names: false,
            bare_node_names: false,
        }
    }
}

/// Registers service nodes under a scheme and discovers them again.
///
/// All registration state lives in the store. The registry only keeps the
/// handles of the liveness tasks it started, keyed by node key.
pub struct ServiceRegistry {
    scheme: String,
    store: Arc<dyn KvStore>,
    options: RegistryOptions,
    registrations: Mutex<HashMap<String, RegistrationHandle>>,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn KvStore>, scheme: impl Into<String>) -> Self {
        Self::with_options(store, scheme, RegistryOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn KvStore>,
        scheme: impl Into<String>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            store,
            options,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to the configured etcd endpoints and build a registry on top
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        let store = EtcdStore::connect(config).await?;
        Ok(Self::with_options(
            Arc::new(store),
            config.scheme.clone(),
            config.options(),
        ))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Shared store handle, for building further registries on the same connection
    pub fn store(&self) -> Arc<dyn KvStore> {
        self.store.clone()
    }

    /// Register `node` under `service_name`.
    ///
    /// Returns as soon as the input is validated; the store write happens in a
    /// background task that retries until it succeeds. Must be called within
    /// a Tokio runtime.
    pub fn register_service_node(&self, service_name: &str, node: Node) -> Result<()> {
        if service_name.is_empty() {
            return Err(RegistryError::EmptyServiceName);
        }
        if node.name.is_empty() {
            return Err(RegistryError::EmptyNodeName);
        }
        if self.options.strict_names {
            for name in [service_name, node.name.as_str()] {
                if name.contains(path::SEPARATOR) {
                    return Err(RegistryError::InvalidName(name.to_string()));
                }
            }
        }

        let key = path::node_path(&self.scheme, service_name, &node.name);
        let payload = value::encode(node.metadata.as_ref());
        debug!(
            target: "beacon::registry",
            service = %service_name,
            key = %key,
            payload_len = payload.len(),
            "Starting registration"
        );

        let handle = RegistrationHandle::spawn(
            self.store.clone(),
            service_name.to_string(),
            key.clone(),
            payload,
            self.options.retry_interval,
        );
        let previous = self.registrations.lock().insert(key, handle);
        // Only the newest payload may reach the store
        if let Some(previous) = previous {
            previous.cancel();
        }

        Ok(())
    }

    /// Handle of the most recent registration of a node
    pub fn registration(&self, service_name: &str, node_name: &str) -> Option<RegistrationHandle> {
        let key = path::node_path(&self.scheme, service_name, node_name);
        self.registrations.lock().get(&key).cloned()
    }

    /// Handles of every registration started by this registry
    pub fn registrations(&self) -> Vec<RegistrationHandle> {
        self.registrations.lock().values().cloned().collect()
    }

    /// Drop the handles of registrations that are no longer pending.
    ///
    /// The table otherwise keeps one entry per distinct key for the life of
    /// the registry. Returns the number of handles removed.
    pub fn prune_finished(&self) -> usize {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|_, handle| !handle.state().is_terminal());
        before - registrations.len()
    }

    /// Cancel a pending registration. Returns `false` if there is none or it already finished.
    pub fn cancel_registration(&self, service_name: &str, node_name: &str) -> bool {
        self.registration(service_name, node_name)
            .map(|handle| handle.cancel())
            .unwrap_or(false)
    }

    /// List the live nodes of `service_name`.
    ///
    /// Each node's name is the full store key unless `bare_node_names` is set.
    /// Metadata that cannot be decoded is returned as `None`.
    pub async fn get_service_nodes(&self, service_name: &str) -> Result<Vec<Node>> {
        let prefix = format!(
            "{}{}",
            path::service_path(&self.scheme, service_name),
            path::SEPARATOR
        );

        let kvs = match self.store.get_by_prefix(&prefix).await {
            Ok(kvs) => {
                metrics::record_discovery(service_name, true);
                kvs
            }
            Err(e) => {
                metrics::record_discovery(service_name, false);
                warn!(
                    target: "beacon::discovery",
                    prefix = %prefix,
                    error = %e,
                    "Discovery read failed"
                );
                return Err(e.into());
            }
        };
        events::nodes_discovered(&prefix, kvs.len());

        Ok(kvs
            .into_iter()
            .map(|kv| {
                let metadata = value::decode(&kv.value);
                let bare = self
                    .options
                    .bare_node_names
                    .then(|| path::node_name_from_key(&self.scheme, service_name, &kv.key))
                    .flatten()
                    .map(str::to_string);
                Node {
                    name: bare.unwrap_or(kv.key),
                    metadata,
                }
            })
            .collect())
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("scheme", &self.scheme)
            .field("options", &self.options)
            .field("registrations", &self.registrations.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::node::Metadata;
    use crate::store::{KeyValue, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Store that fails the first `keep_failures` keeps and records every call
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        keep_failures: AtomicUsize,
        fail_reads: AtomicBool,
        keeps: Mutex<Vec<(String, Vec<u8>, Instant)>>,
        reads: AtomicUsize,
    }

    impl FlakyStore {
        fn failing(keep_failures: usize) -> Arc<Self> {
            let store = Self::default();
            store.keep_failures.store(keep_failures, Ordering::SeqCst);
            Arc::new(store)
        }

        fn keep_calls(&self) -> usize {
            self.keeps.lock().len()
        }

        fn keep_times(&self) -> Vec<Instant> {
            self.keeps.lock().iter().map(|(_, _, at)| *at).collect()
        }
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        async fn keep(&self, key: &str, value: &[u8]) -> std::result::Result<(), StoreError> {
            self.keeps
                .lock()
                .push((key.to_string(), value.to_vec(), Instant::now()));

            let remaining = self.keep_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.keep_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.keep(key, value).await
        }

        async fn get_by_prefix(&self, prefix: &str) -> std::result::Result<Vec<KeyValue>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.get_by_prefix(prefix).await
        }
    }

    fn addr_metadata(addr: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("addr".to_string(), addr.to_string());
        metadata
    }

    #[tokio::test]
    async fn test_empty_service_name_fails_before_store() {
        let store = FlakyStore::failing(0);
        let registry = ServiceRegistry::new(store.clone(), "ion");

        let err = registry
            .register_service_node("", Node::new("n1"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::EmptyServiceName));

        tokio::task::yield_now().await;
        assert_eq!(store.keep_calls(), 0);
        assert!(registry.registrations().is_empty());
    }

    #[tokio::test]
    async fn test_empty_node_name_fails_before_store() {
        let store = FlakyStore::failing(0);
        let registry = ServiceRegistry::new(store.clone(), "ion");

        let err = registry
            .register_service_node("sfu", Node::new(""))
            .unwrap_err();
        assert!(matches!(err, RegistryError::EmptyNodeName));

        tokio::task::yield_now().await;
        assert_eq!(store.keep_calls(), 0);
        assert!(registry.registrations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_at_fixed_interval_until_first_success() {
        let store = FlakyStore::failing(2);
        let registry = ServiceRegistry::new(store.clone(), "ion");

        registry
            .register_service_node("sfu", Node::new("n1"))
            .unwrap();

        let handle = registry.registration("sfu", "n1").unwrap();
        assert_eq!(handle.wait().await, RegistrationState::Done);
        assert_eq!(handle.attempts(), 3);

        let times = store.keep_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(5));
        assert_eq!(times[2] - times[1], Duration::from_secs(5));

        // Done is final: no further attempts
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.keep_calls(), 3);
        assert_eq!(handle.state(), RegistrationState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retry_interval() {
        let store = FlakyStore::failing(1);
        let options = RegistryOptions {
            retry_interval: Duration::from_millis(250),
            ..Default::default()
        };
        let registry = ServiceRegistry::with_options(store.clone(), "ion", options);

        registry
            .register_service_node("sfu", Node::new("n1"))
            .unwrap();
        let handle = registry.registration("sfu", "n1").unwrap();
        assert_eq!(handle.wait().await, RegistrationState::Done);

        let times = store.keep_times();
        assert_eq!(times[1] - times[0], Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_register_then_discover() {
        let store = FlakyStore::failing(0);
        let registry = ServiceRegistry::new(store.clone(), "ion");

        let node = Node::new("n1").with_metadata(addr_metadata("10.0.0.1:9000"));
        registry.register_service_node("sfu", node).unwrap();
        registry.registration("sfu", "n1").unwrap().wait().await;

        {
            let keeps = store.keeps.lock();
            assert_eq!(keeps.len(), 1);
            assert_eq!(keeps[0].0, "ion/sfu/n1");
            assert!(!keeps[0].1.is_empty());
        }

        let nodes = registry.get_service_nodes("sfu").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "ion/sfu/n1");
        assert_eq!(nodes[0].metadata, Some(addr_metadata("10.0.0.1:9000")));
    }

    #[tokio::test]
    async fn test_discovery_of_unknown_service_is_empty() {
        let store = FlakyStore::failing(0);
        let registry = ServiceRegistry::new(store, "ion");

        assert!(registry.get_service_nodes("sfu").await.unwrap().is_empty());
        assert!(registry.get_service_nodes("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_failure_is_returned_without_retry() {
        let store = FlakyStore::failing(0);
        store.fail_reads.store(true, Ordering::SeqCst);
        let registry = ServiceRegistry::new(store.clone(), "ion");

        let err = registry.get_service_nodes("sfu").await.unwrap_err();
        assert!(matches!(err, RegistryError::Store(StoreError::Unavailable(_))));
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_discovery_returns_raw_keys_and_lenient_metadata() {
        let store = Arc::new(MemoryStore::new());
        store.put("ion/sfu/n1", value::encode(Some(&addr_metadata("10.0.0.1:9000"))));
        store.put("ion/sfu/n2", "garbage");
        store.put("ion/sfu/n3", Vec::<u8>::new());
        store.put("ion/sfu2/n1", value::encode(Some(&addr_metadata("10.0.0.9:9000"))));
        let registry = ServiceRegistry::new(store, "ion");

        let nodes = registry.get_service_nodes("sfu").await.unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["ion/sfu/n1", "ion/sfu/n2", "ion/sfu/n3"]);
        assert_eq!(nodes[0].attr("addr"), Some("10.0.0.1:9000"));
        assert_eq!(nodes[1].metadata, None);
        assert_eq!(nodes[2].metadata, None);
    }

    #[tokio::test]
    async fn test_bare_node_names() {
        let store = Arc::new(MemoryStore::new());
        let options = RegistryOptions {
            bare_node_names: true,
            ..Default::default()
        };
        let registry = ServiceRegistry::with_options(store, "ion", options);

        registry
            .register_service_node("a/b", Node::new("n1"))
            .unwrap();
        registry.registration("a/b", "n1").unwrap().wait().await;

        let nodes = registry.get_service_nodes("a/b").await.unwrap();
        assert_eq!(nodes, vec![Node::new("n1")]);
    }

    #[tokio::test]
    async fn test_slash_names_collapse_by_default() {
        let store = Arc::new(MemoryStore::new());
        let registry = ServiceRegistry::new(store.clone(), "ion");

        registry
            .register_service_node("sfu", Node::new("a/b").with_attr("v", "1"))
            .unwrap();
        registry.registration("sfu", "a/b").unwrap().wait().await;
        registry
            .register_service_node("sfu", Node::new("a-b").with_attr("v", "2"))
            .unwrap();
        registry.registration("sfu", "a-b").unwrap().wait().await;

        let nodes = registry.get_service_nodes("sfu").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "ion/sfu/a-b");
        assert_eq!(nodes[0].attr("v"), Some("2"));
        assert_eq!(registry.registrations().len(), 1);
    }

    #[tokio::test]
    async fn test_strict_names_reject_separator() {
        let store = FlakyStore::failing(0);
        let options = RegistryOptions {
            strict_names: true,
            ..Default::default()
        };
        let registry = ServiceRegistry::with_options(store.clone(), "ion", options);

        let err = registry
            .register_service_node("sfu", Node::new("a/b"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(name) if name == "a/b"));

        let err = registry
            .register_service_node("x/y", Node::new("n1"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(name) if name == "x/y"));

        tokio::task::yield_now().await;
        assert_eq!(store.keep_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_pending_registration() {
        let store = FlakyStore::failing(usize::MAX);
        let registry = ServiceRegistry::new(store.clone(), "ion");

        registry
            .register_service_node("sfu", Node::new("n1"))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let handle = registry.registration("sfu", "n1").unwrap();
        assert_eq!(handle.state(), RegistrationState::Pending);
        assert_eq!(handle.attempts(), 1);

        assert!(registry.cancel_registration("sfu", "n1"));
        assert_eq!(handle.wait().await, RegistrationState::Cancelled);
        assert!(!handle.cancel());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.keep_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregistration_supersedes_pending_task() {
        let store = FlakyStore::failing(usize::MAX);
        let registry = ServiceRegistry::new(store.clone(), "ion");

        registry
            .register_service_node("sfu", Node::new("n1").with_attr("v", "old"))
            .unwrap();
        let old = registry.registration("sfu", "n1").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        registry
            .register_service_node("sfu", Node::new("n1").with_attr("v", "new"))
            .unwrap();
        assert_eq!(old.state(), RegistrationState::Cancelled);
        assert_eq!(registry.registrations().len(), 1);

        // Store comes back
        store.keep_failures.store(0, Ordering::SeqCst);
        let new = registry.registration("sfu", "n1").unwrap();
        assert_eq!(new.wait().await, RegistrationState::Done);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(old.attempts(), 1);
        let stored = store.inner.get("ion/sfu/n1").unwrap();
        assert_eq!(value::decode(&stored).unwrap()["v"], "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_reregistration_stops_every_attempt() {
        let store = FlakyStore::failing(usize::MAX);
        let registry = ServiceRegistry::new(store.clone(), "ion");

        registry
            .register_service_node("sfu", Node::new("n1").with_attr("v", "old"))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        registry
            .register_service_node("sfu", Node::new("n1").with_attr("v", "new"))
            .unwrap();

        assert!(registry.cancel_registration("sfu", "n1"));
        store.keep_failures.store(0, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(store.inner.get("ion/sfu/n1"), None);
        assert!(registry
            .registrations()
            .iter()
            .all(|handle| handle.state() == RegistrationState::Cancelled));
    }

    #[tokio::test]
    async fn test_prune_finished_keeps_pending_handles() {
        let store = FlakyStore::failing(0);
        let registry = ServiceRegistry::new(store.clone(), "ion");

        registry
            .register_service_node("sfu", Node::new("n1"))
            .unwrap();
        registry.registration("sfu", "n1").unwrap().wait().await;

        store.keep_failures.store(usize::MAX, Ordering::SeqCst);
        registry
            .register_service_node("sfu", Node::new("n2"))
            .unwrap();
        tokio::task::yield_now().await;

        assert_eq!(registry.prune_finished(), 1);
        assert!(registry.registration("sfu", "n1").is_none());
        assert_eq!(
            registry.registration("sfu", "n2").unwrap().state(),
            RegistrationState::Pending
        );

        assert!(registry.cancel_registration("sfu", "n2"));
        assert_eq!(registry.prune_finished(), 1);
        assert!(registry.registrations().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_done_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let registry = ServiceRegistry::new(store.clone(), "ion");

        registry
            .register_service_node("sfu", Node::new("n1"))
            .unwrap();
        let handle = registry.registration("sfu", "n1").unwrap();
        assert_eq!(handle.wait().await, RegistrationState::Done);

        assert!(!registry.cancel_registration("sfu", "n1"));
        assert!(!registry.cancel_registration("sfu", "unknown"));
        assert_eq!(handle.state(), RegistrationState::Done);
        assert!(store.get("ion/sfu/n1").is_some());
    }

    #[tokio::test]
    async fn test_registries_share_one_store() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let prod = ServiceRegistry::new(store.clone(), "prod");
        let dev = ServiceRegistry::new(prod.store(), "dev");

        prod.register_service_node("sfu", Node::new("n1")).unwrap();
        prod.registration("sfu", "n1").unwrap().wait().await;
        dev.register_service_node("sfu", Node::new("n2")).unwrap();
        dev.registration("sfu", "n2").unwrap().wait().await;

        let prod_nodes = prod.get_service_nodes("sfu").await.unwrap();
        let dev_nodes = dev.get_service_nodes("sfu").await.unwrap();
        assert_eq!(prod_nodes.len(), 1);
        assert_eq!(prod_nodes[0].name, "prod/sfu/n1");
        assert_eq!(dev_nodes.len(), 1);
        assert_eq!(dev_nodes[0].name, "dev/sfu/n2");
    }
}
