//! Registry Configuration
//!
//! Settings for the etcd connection, the lease model and the registration
//! retry loop, with environment variable overrides.

use crate::error::ConfigError;
use crate::registry::RegistryOptions;
use std::str::FromStr;
use std::time::Duration;

/// Registry configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Etcd endpoints (env: ETCD_ENDPOINTS, comma-separated)
    pub etcd_endpoints: Vec<String>,

    /// Namespace prefix for every key written by this registry (env: REGISTRY_SCHEME)
    pub scheme: String,

    // Registration settings
    /// Fixed delay between failed keep attempts (env: REGISTRY_RETRY_INTERVAL_SECS)
    pub retry_interval: Duration,

    /// Reject names containing `/` instead of collapsing them (env: REGISTRY_STRICT_NAMES)
    pub strict_names: bool,

    /// Return bare node names from discovery instead of full keys (env: REGISTRY_BARE_NODE_NAMES)
    pub bare_node_names: bool,

    // Etcd lease settings
    /// TTL for etcd leases in seconds (env: ETCD_LEASE_TTL)
    pub lease_ttl: i64,

    /// Interval for lease keep-alive, well under the TTL (env: ETCD_KEEPALIVE_INTERVAL_SECS)
    pub keepalive_interval: Duration,

    // Etcd backoff settings
    /// Initial interval for etcd connection retry
    pub etcd_backoff_initial: Duration,

    /// Maximum interval for etcd connection retry
    pub etcd_backoff_max: Duration,

    /// Maximum elapsed time for etcd connection retries
    pub etcd_backoff_max_elapsed: Duration,

    /// Multiplier for etcd backoff
    pub etcd_backoff_multiplier: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            scheme: "beacon".to_string(),

            retry_interval: Duration::from_secs(5),
            strict_names: false,
            bare_node_names: false,

            lease_ttl: 10,
            keepalive_interval: Duration::from_secs(3),

            etcd_backoff_initial: Duration::from_secs(1),
            etcd_backoff_max: Duration::from_secs(10),
            etcd_backoff_max_elapsed: Duration::from_secs(60),
            etcd_backoff_multiplier: 2.0,
        }
    }
}

impl RegistryConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(endpoints) = lookup("ETCD_ENDPOINTS") {
            config.etcd_endpoints = parse_endpoints(&endpoints);
        }

        if let Some(scheme) = lookup("REGISTRY_SCHEME") {
            config.scheme = scheme;
        }

        if let Some(secs) = lookup("REGISTRY_RETRY_INTERVAL_SECS") {
            config.retry_interval = Duration::from_secs(parse("REGISTRY_RETRY_INTERVAL_SECS", &secs)?);
        }

        if let Some(flag) = lookup("REGISTRY_STRICT_NAMES") {
            config.strict_names = parse_bool("REGISTRY_STRICT_NAMES", &flag)?;
        }

        if let Some(flag) = lookup("REGISTRY_BARE_NODE_NAMES") {
            config.bare_node_names = parse_bool("REGISTRY_BARE_NODE_NAMES", &flag)?;
        }

        if let Some(ttl) = lookup("ETCD_LEASE_TTL") {
            config.lease_ttl = parse("ETCD_LEASE_TTL", &ttl)?;
        }

        if let Some(secs) = lookup("ETCD_KEEPALIVE_INTERVAL_SECS") {
            config.keepalive_interval =
                Duration::from_secs(parse("ETCD_KEEPALIVE_INTERVAL_SECS", &secs)?);
        }

        Ok(config)
    }

    /// Registry behaviour switches derived from this configuration
    pub fn options(&self) -> RegistryOptions {
        RegistryOptions {
            retry_interval: self.retry_interval,
            strict_names: self.strict_names,
            bare_node_names: self.bare_node_names,
        }
    }
}

/// Split a comma-separated endpoint list, dropping blanks
pub fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(String::from)
        .collect()
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}
