//! Registry error types

use thiserror::Error;

/// Errors raised by a [`crate::store::KvStore`] implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("failed to connect to store: {0}")]
    Connect(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by [`crate::registry::ServiceRegistry`]
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service name must be non empty")]
    EmptyServiceName,

    #[error("node name must be non empty")]
    EmptyNodeName,

    #[error("name {0:?} contains a path separator")]
    InvalidName(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
