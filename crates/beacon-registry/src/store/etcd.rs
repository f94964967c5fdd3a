//! Etcd Operations
//!
//! Connection with retry, lease-backed writes with a keep-alive task per key,
//! and prefix reads.

use super::{KeyValue, KvStore};
use crate::config::RegistryConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{Client, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Etcd-backed store
pub struct EtcdStore {
    client: Client,
    lease_ttl: i64,
    keepalive_interval: Duration,
    keepalives: KeepAliveTasks,
}

/// Keep-alive task per key; a new `keep` on the same key replaces it
#[derive(Default)]
struct KeepAliveTasks {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl KeepAliveTasks {
    /// Track `handle` for `key`, aborting the task it replaces
    fn replace(&self, key: String, handle: JoinHandle<()>) {
        if let Some(previous) = self.tasks.lock().insert(key, handle) {
            previous.abort();
        }
    }

    fn abort_all(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

/// What a single keep-alive response means for the lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeepAliveOutcome {
    Renewed { ttl: i64 },
    /// etcd answers with a zero TTL once the lease is gone
    Expired,
    StreamClosed,
}

fn keepalive_outcome(response_ttl: Option<i64>) -> KeepAliveOutcome {
    match response_ttl {
        Some(ttl) if ttl > 0 => KeepAliveOutcome::Renewed { ttl },
        Some(_) => KeepAliveOutcome::Expired,
        None => KeepAliveOutcome::StreamClosed,
    }
}

impl EtcdStore {
    /// Connect to etcd with exponential backoff
    pub async fn connect(config: &RegistryConfig) -> Result<Self, StoreError> {
        let backoff = ExponentialBackoff {
            initial_interval: config.etcd_backoff_initial,
            max_interval: config.etcd_backoff_max,
            max_elapsed_time: Some(config.etcd_backoff_max_elapsed),
            multiplier: config.etcd_backoff_multiplier,
            ..Default::default()
        };

        let endpoints = &config.etcd_endpoints;
        let client = retry(backoff, || async move {
            match Client::connect(endpoints, None).await {
                Ok(client) => {
                    debug!(endpoints = ?endpoints, "Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| StoreError::Connect(format!("failed to connect to etcd after retries: {}", e)))?;

        Ok(Self::from_client(client, config))
    }

    /// Wrap an already connected client
    pub fn from_client(client: Client, config: &RegistryConfig) -> Self {
        Self {
            client,
            lease_ttl: config.lease_ttl,
            keepalive_interval: config.keepalive_interval,
            keepalives: KeepAliveTasks::default(),
        }
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn keep(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut client = self.client.clone();

        let lease = client.lease_grant(self.lease_ttl, None).await?;
        let lease_id = lease.id();
        debug!(key = %key, lease_id = lease_id, ttl = self.lease_ttl, "Lease granted");

        let (keeper, stream) = client.lease_keep_alive(lease_id).await?;

        let options = PutOptions::new().with_lease(lease_id);
        client.put(key, value.to_vec(), Some(options)).await?;
        debug!(key = %key, lease_id = lease_id, "Key registered in etcd");

        let handle = spawn_keepalive_task(
            keeper,
            stream,
            key.to_string(),
            lease_id,
            self.keepalive_interval,
        );
        self.keepalives.replace(key.to_string(), handle);

        Ok(())
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        Ok(resp
            .kvs()
            .iter()
            .map(|kv| KeyValue::new(String::from_utf8_lossy(kv.key()), kv.value()))
            .collect())
    }
}

impl Drop for EtcdStore {
    fn drop(&mut self) {
        self.keepalives.abort_all();
    }
}

/// Spawn background task to send periodic keep-alive requests for a lease.
/// The task exits on the first failure and the lease is left to expire.
fn spawn_keepalive_task(
    mut keeper: LeaseKeeper,
    mut keeper_stream: LeaseKeepAliveStream,
    key: String,
    lease_id: i64,
    keepalive_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(keepalive_interval);
        interval.tick().await; // Skip first immediate tick

        loop {
            interval.tick().await;

            if let Err(e) = keeper.keep_alive().await {
                error!(key = %key, lease_id = lease_id, error = %e, "Keep-alive send failed");
                break;
            }

            let response = match keeper_stream.message().await {
                Ok(response) => response,
                Err(e) => {
                    error!(key = %key, lease_id = lease_id, error = %e, "Keep-alive failed");
                    break;
                }
            };

            match keepalive_outcome(response.map(|r| r.ttl())) {
                KeepAliveOutcome::Renewed { ttl } => {
                    trace!(key = %key, lease_id = lease_id, ttl = ttl, "Keep-alive OK");
                }
                KeepAliveOutcome::Expired => {
                    error!(key = %key, lease_id = lease_id, "Lease expired before keep-alive");
                    break;
                }
                KeepAliveOutcome::StreamClosed => {
                    error!(key = %key, lease_id = lease_id, "Keep-alive stream closed");
                    break;
                }
            }
        }
    })
}
