//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `tether_registrations_total` - counter of register calls by outcome
//! - `tether_keepalive_acks_total` - counter of keep-alive acknowledgements
//! - `tether_keepalive_exits_total` - counter of keep-alive task exits by reason
//! - `tether_revoke_failures_total` - counter of failed lease revokes
//! - `tether_watch_batches_total` - counter of processed watch batches per target
//! - `tether_resolved_addresses` - gauge of published addresses per target
//! - `tether_publish_failures_total` - counter of rejected publications per target

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder with an HTTP scrape endpoint on `listen`.
pub fn init_metrics(listen: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()?;

    register_metric_descriptions();
    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(
        "tether_registrations_total",
        "Total number of register calls by outcome"
    );
    describe_counter!(
        "tether_keepalive_acks_total",
        "Total number of lease keep-alive acknowledgements"
    );
    describe_counter!(
        "tether_keepalive_exits_total",
        "Total number of keep-alive task exits by reason"
    );
    describe_counter!(
        "tether_revoke_failures_total",
        "Total number of failed lease revokes"
    );
    describe_counter!(
        "tether_watch_batches_total",
        "Total number of watch batches processed"
    );
    describe_gauge!(
        "tether_resolved_addresses",
        "Number of addresses in the last published address list"
    );
    describe_counter!(
        "tether_publish_failures_total",
        "Total number of address lists rejected by the sink"
    );
}

pub fn record_registration(outcome: &'static str) {
    counter!("tether_registrations_total", "outcome" => outcome).increment(1);
}

pub fn record_keepalive_ack() {
    counter!("tether_keepalive_acks_total").increment(1);
}

pub fn record_keepalive_exit(reason: &'static str) {
    counter!("tether_keepalive_exits_total", "reason" => reason).increment(1);
}

pub fn record_revoke_failure() {
    counter!("tether_revoke_failures_total").increment(1);
}

/// Record a processed batch and the size of the list it produced
pub fn record_watch_batch(target: &str, address_count: usize) {
    counter!("tether_watch_batches_total", "target" => target.to_string()).increment(1);
    gauge!("tether_resolved_addresses", "target" => target.to_string()).set(address_count as f64);
}

pub fn record_publish_failure(target: &str) {
    counter!("tether_publish_failures_total", "target" => target.to_string()).increment(1);
}
