//! Structured Events
//!
//! One function per lifecycle event so field names stay consistent between
//! the registry and the resolver:
//! - `instance_registered` - lease granted and key written
//! - `keepalive_stopped` - keep-alive task exited
//! - `lease_revoked` - lease revoked on request
//! - `membership_published` - resolver handed a new address list to its sink
//! - `publish_rejected` - sink refused an address list
//! - `watch_stopped` - resolver processing task exited

use tracing::{info, warn};

/// Emit an instance registered event
pub fn instance_registered(key: &str, lease_id: &str, ttl_secs: u64) {
    info!(
        event_type = "instance_registered",
        key = %key,
        lease_id = %lease_id,
        ttl_secs = ttl_secs,
        "Instance registered"
    );
}

/// Emit a keep-alive stopped event
pub fn keepalive_stopped(key: &str, lease_id: &str, reason: &str, acks: u64) {
    info!(
        event_type = "keepalive_stopped",
        key = %key,
        lease_id = %lease_id,
        reason = %reason,
        acks = acks,
        "Keep-alive stopped"
    );
}

/// Emit a lease revoked event
pub fn lease_revoked(key: &str, lease_id: &str) {
    info!(
        event_type = "lease_revoked",
        key = %key,
        lease_id = %lease_id,
        "Lease revoked"
    );
}

/// Emit a membership published event
pub fn membership_published(target: &str, address_count: usize, batch_size: usize) {
    info!(
        event_type = "membership_published",
        resolver_target = %target,
        address_count = address_count,
        batch_size = batch_size,
        "Membership published"
    );
}

/// Emit a publish rejected event
pub fn publish_rejected(target: &str, error: &str) {
    warn!(
        event_type = "publish_rejected",
        resolver_target = %target,
        error = %error,
        "Address list rejected by sink"
    );
}

/// Emit a watch stopped event
pub fn watch_stopped(target: &str, reason: &str) {
    info!(
        event_type = "watch_stopped",
        resolver_target = %target,
        reason = %reason,
        "Watch stopped"
    );
}
