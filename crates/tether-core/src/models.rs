//! Data model
//!
//! Types exchanged between the registry, the coordination store and the
//! resolver. Everything here is plain data; ownership rules live with the
//! tasks that hold these values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Opaque lease handle issued by the coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A granted lease and the TTL it was granted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub ttl: Duration,
}

/// Acknowledgement of one keepalive renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveAck {
    pub lease_id: LeaseId,
    /// Remaining TTL reported by the store after renewal
    pub ttl: Duration,
}

/// One running process advertising itself under `base_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub address: String,
    pub metadata: String,
    pub base_path: String,
}

impl ServiceInstance {
    pub fn new(
        base_path: impl Into<String>,
        address: impl Into<String>,
        metadata: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            metadata: metadata.into(),
            base_path: base_path.into(),
        }
    }

    /// Registration key: `{base_path}/{address}`
    pub fn key(&self) -> String {
        instance_key(&self.base_path, &self.address)
    }
}

/// Builds the registration key for an address under a base path.
///
/// A trailing slash on `base_path` is ignored so that `/svc` and `/svc/`
/// produce the same key.
pub fn instance_key(base_path: &str, address: &str) -> String {
    format!("{}/{}", base_path.trim_end_matches('/'), address)
}

/// Prefix watched by a resolver for `base_path`.
///
/// Always ends in `/`, so watching `/svc` never matches `/svc2/..`.
pub fn watch_prefix(base_path: &str) -> String {
    format!("{}/", base_path.trim_end_matches('/'))
}

/// Dialable address plus the opaque metadata registered with it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    #[serde(default)]
    pub metadata: String,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, metadata: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            metadata: metadata.into(),
        }
    }
}

/// Membership operation carried by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOp {
    Add,
    Delete,
}

/// One membership change inside a watch batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEntry {
    pub key: String,
    pub endpoint: Endpoint,
    pub op: EventOp,
}

impl MembershipEntry {
    pub fn add(key: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            key: key.into(),
            endpoint,
            op: EventOp::Add,
        }
    }

    /// Delete events only need the key; the endpoint is carried for logging.
    pub fn delete(key: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            key: key.into(),
            endpoint,
            op: EventOp::Delete,
        }
    }
}

/// Events delivered together by the coordination store, in delivery order.
pub type WatchBatch = Vec<MembershipEntry>;

/// Immutable snapshot of resolved endpoints.
///
/// Cloning is cheap; a new list is built for every publication instead of
/// mutating a shared one. Endpoints are kept sorted so two lists with the
/// same members compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct AddressList {
    endpoints: Arc<[Endpoint]>,
}

impl AddressList {
    pub fn new(mut endpoints: Vec<Endpoint>) -> Self {
        endpoints.sort();
        Self {
            endpoints: endpoints.into(),
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|e| e.address.as_str())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.endpoints.iter().any(|e| e.address == address)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl FromIterator<Endpoint> for AddressList {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
