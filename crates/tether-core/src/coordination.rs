//! Coordination store contract
//!
//! The registry and the resolver only talk to the store through
//! [`CoordinationClient`]. Unary calls are expected to be bounded by the
//! caller; streams end when the store loses the lease / watch or the client
//! drops them.

use crate::error::CoordinationError;
use crate::models::{KeepAliveAck, Lease, LeaseId, WatchBatch};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Stream of keepalive acknowledgements for one lease.
pub type KeepAliveStream = BoxStream<'static, Result<KeepAliveAck, CoordinationError>>;

/// Ordered stream of membership batches for one prefix.
///
/// The first batch carries the current membership as `Add` events.
pub type WatchStream = BoxStream<'static, Result<WatchBatch, CoordinationError>>;

#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Grant a lease with the given TTL. The returned lease carries the TTL
    /// the store actually granted.
    async fn grant(&self, ttl: Duration) -> Result<Lease, CoordinationError>;

    /// Write `key = value` attached to `lease`.
    async fn put(&self, key: &str, value: &str, lease: LeaseId) -> Result<(), CoordinationError>;

    /// Start renewing `lease` often enough for its TTL; renewals stop when
    /// the stream is dropped.
    async fn keep_alive(&self, lease: Lease) -> Result<KeepAliveStream, CoordinationError>;

    /// Revoke `lease`, deleting every key attached to it.
    async fn revoke(&self, lease: LeaseId) -> Result<(), CoordinationError>;

    /// Watch every key under `prefix`.
    async fn watch(&self, prefix: &str) -> Result<WatchStream, CoordinationError>;
}
