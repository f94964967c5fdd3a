//! Observability Module
//!
//! - `metrics`: Prometheus metrics for registrations, discovery and decoding
//! - `events`: Structured event logging with consistent fields
//! - `tracing`: Subscriber setup (text or JSON, `RUST_LOG` filtering)

pub mod events;
pub mod metrics;
pub mod tracing;

pub use self::metrics::serve_metrics;
pub use self::tracing::{init_tracing, TracingConfig};
