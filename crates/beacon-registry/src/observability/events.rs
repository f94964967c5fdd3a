//! Structured Events
//!
//! One function per event type so field names stay consistent across the
//! registry:
//! - `registration_attempt_failed` - a keep call failed, a retry is scheduled
//! - `registration_succeeded` - a node key is established in the store
//! - `registration_cancelled` - a pending registration was cancelled
//! - `nodes_discovered` - a discovery read completed
//! - `metadata_decode_failed` - a stored payload could not be decoded

use std::time::Duration;
use tracing::{debug, info, warn};

/// Emit a failed registration attempt event
pub fn registration_attempt_failed(key: &str, attempt: u64, error: &str, retry_in: Duration) {
    warn!(
        target: "beacon::registry",
        event_type = "registration_attempt_failed",
        key = %key,
        attempt = attempt,
        error = %error,
        retry_in_ms = retry_in.as_millis() as u64,
        "Registration got errors, retrying"
    );
}

/// Emit a registration success event
pub fn registration_succeeded(key: &str, attempts: u64) {
    info!(
        target: "beacon::registry",
        event_type = "registration_succeeded",
        key = %key,
        attempts = attempts,
        "Registration success"
    );
}

/// Emit a registration cancelled event
pub fn registration_cancelled(key: &str, attempts: u64) {
    info!(
        target: "beacon::registry",
        event_type = "registration_cancelled",
        key = %key,
        attempts = attempts,
        "Registration cancelled"
    );
}

/// Emit a discovery result event
pub fn nodes_discovered(prefix: &str, node_count: usize) {
    if node_count == 0 {
        debug!(
            target: "beacon::discovery",
            event_type = "nodes_discovered",
            prefix = %prefix,
            node_count = 0,
            "No service nodes were found"
        );
    } else {
        debug!(
            target: "beacon::discovery",
            event_type = "nodes_discovered",
            prefix = %prefix,
            node_count = node_count,
            "Service nodes discovered"
        );
    }
}

/// Emit a metadata decode failure event
pub fn metadata_decode_failed(payload_len: usize, error: &str) {
    debug!(
        target: "beacon::codec",
        event_type = "metadata_decode_failed",
        payload_len = payload_len,
        error = %error,
        "Discarding undecodable node metadata"
    );
}
