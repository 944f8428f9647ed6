//! Error taxonomy
//!
//! `CoordinationError` describes failures of the coordination store itself.
//! `DiscoveryError` is what this subsystem reports; [`ErrorKind`] classifies
//! it by how it propagates:
//!
//! - `Setup`: returned synchronously from register / build / dial, never retried
//! - `Stream`: a keepalive or watch stream ended; the owning task exits
//! - `Publish`: the address sink rejected an update; the watcher keeps going
//! - `Revoke`: best-effort lease revoke failed; only logged
//! - `Unavailable`: a dialed connection has nothing usable yet

use crate::models::LeaseId;
use std::time::Duration;

/// Failure reported by a coordination store client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("lease {0} not found or expired")]
    LeaseNotFound(LeaseId),

    #[error("coordination store error: {0}")]
    Backend(String),
}

/// Rejection returned by an address sink from `update_state`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("resolver produced an empty address list")]
    EmptyAddressList,

    #[error("client connection is closed")]
    ConnectionClosed,

    #[error("{0}")]
    Rejected(String),
}

/// Propagation class of a [`DiscoveryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Setup,
    Stream,
    Publish,
    Revoke,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to grant lease: {0}")]
    Grant(#[source] CoordinationError),

    #[error("failed to put {key}: {source}")]
    Put {
        key: String,
        #[source]
        source: CoordinationError,
    },

    #[error("failed to start keepalive for lease {lease_id}: {source}")]
    KeepAlive {
        lease_id: LeaseId,
        #[source]
        source: CoordinationError,
    },

    #[error("failed to watch {prefix}: {source}")]
    Watch {
        prefix: String,
        #[source]
        source: CoordinationError,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: &'static str },

    #[error("no resolver registered for scheme {0:?}")]
    UnknownScheme(String),

    #[error("{stream} stream closed: {reason}")]
    StreamClosed { stream: &'static str, reason: String },

    #[error("address update rejected: {0}")]
    Publish(#[from] PublishError),

    #[error("failed to revoke lease {lease_id}: {source}")]
    Revoke {
        lease_id: LeaseId,
        #[source]
        source: CoordinationError,
    },

    #[error("timed out after {0:?} waiting for the first address list")]
    DialTimeout(Duration),

    #[error("resolver stopped before publishing any addresses")]
    ResolverStopped,

    #[error("no addresses available")]
    NoAddresses,
}

impl DiscoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Grant(_)
            | Self::Put { .. }
            | Self::KeepAlive { .. }
            | Self::Watch { .. }
            | Self::Cancelled
            | Self::InvalidTarget { .. }
            | Self::UnknownScheme(_) => ErrorKind::Setup,
            Self::StreamClosed { .. } => ErrorKind::Stream,
            Self::Publish(_) => ErrorKind::Publish,
            Self::Revoke { .. } => ErrorKind::Revoke,
            Self::DialTimeout(_) | Self::ResolverStopped | Self::NoAddresses => {
                ErrorKind::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::Put {
            key: "/svc/a".to_string(),
            source: CoordinationError::Timeout(Duration::from_secs(5)),
        };
        assert_eq!(err.to_string(), "failed to put /svc/a: request timed out after 5s");

        let err = DiscoveryError::Revoke {
            lease_id: LeaseId(0x2a),
            source: CoordinationError::LeaseNotFound(LeaseId(0x2a)),
        };
        assert_eq!(
            err.to_string(),
            "failed to revoke lease 2a: lease 2a not found or expired"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DiscoveryError::Grant(CoordinationError::Unavailable("down".into())).kind(),
            ErrorKind::Setup
        );
        assert_eq!(
            DiscoveryError::StreamClosed {
                stream: "watch",
                reason: "eof".into()
            }
            .kind(),
            ErrorKind::Stream
        );
        assert_eq!(
            DiscoveryError::from(PublishError::EmptyAddressList).kind(),
            ErrorKind::Publish
        );
        assert_eq!(DiscoveryError::NoAddresses.kind(), ErrorKind::Unavailable);
    }
}
