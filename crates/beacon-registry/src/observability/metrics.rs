//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `beacon_registration_attempts_total` - counter of keep attempts by service and result
//! - `beacon_registrations_pending` - gauge of liveness tasks still retrying
//! - `beacon_discovery_requests_total` - counter of discovery reads by service and result
//! - `beacon_metadata_decode_failures_total` - counter of payloads read back as absent

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn serve_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metric_descriptions();
    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(
        "beacon_registration_attempts_total",
        "Total number of keep attempts made by registration tasks"
    );
    describe_gauge!(
        "beacon_registrations_pending",
        "Number of registration tasks that have not yet succeeded"
    );
    describe_counter!(
        "beacon_discovery_requests_total",
        "Total number of discovery reads"
    );
    describe_counter!(
        "beacon_metadata_decode_failures_total",
        "Total number of stored payloads discarded as undecodable"
    );
}

/// Record the outcome of a keep attempt
pub fn record_registration_attempt(service: &str, success: bool) {
    counter!(
        "beacon_registration_attempts_total",
        "service" => service.to_string(),
        "result" => result_label(success)
    )
    .increment(1);
}

/// A liveness task started
pub fn registration_started() {
    gauge!("beacon_registrations_pending").increment(1.0);
}

/// A liveness task left the pending state (done or cancelled)
pub fn registration_finished() {
    gauge!("beacon_registrations_pending").decrement(1.0);
}

/// Record the outcome of a discovery read
pub fn record_discovery(service: &str, success: bool) {
    counter!(
        "beacon_discovery_requests_total",
        "service" => service.to_string(),
        "result" => result_label(success)
    )
    .increment(1);
}

/// Record a payload that could not be decoded
pub fn record_decode_failure() {
    counter!("beacon_metadata_decode_failures_total").increment(1);
}

fn result_label(success: bool) -> &'static str {
    if success {
        "ok"
    } else {
        "error"
    }
}
