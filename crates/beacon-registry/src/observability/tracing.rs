//! Tracing Subscriber Setup
//!
//! Console logging with `RUST_LOG` filtering (default `info`).
//!
//! The log format (`text` or `json`) comes from the caller; `RUST_LOG`
//! holds standard `EnvFilter` directives.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl TracingConfig {
    pub fn new(log_format: impl Into<String>) -> Self {
        Self {
            log_format: log_format.into(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Initialize the global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: TracingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if config.is_json() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .try_init()?;
    }

    tracing::debug!(log_format = %config.log_format, "Tracing initialized");
    Ok(())
}
