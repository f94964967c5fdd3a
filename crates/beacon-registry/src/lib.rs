//! Beacon Registry Library
//!
//! Service registry on top of etcd. Service instances announce themselves
//! under a named service with a lease-backed key; other processes discover
//! the live instances of a service with a prefix read.

pub mod codec;
pub mod config;
pub mod error;
pub mod node;
pub mod observability;
pub mod registry;
pub mod store;

pub use config::RegistryConfig;
pub use error::{ConfigError, RegistryError, Result, StoreError};
pub use node::{Metadata, Node};
pub use registry::{RegistrationHandle, RegistrationState, RegistryOptions, ServiceRegistry};
pub use store::{EtcdStore, KeyValue, KvStore, MemoryStore};
