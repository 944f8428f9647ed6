//! Tether discovery
//!
//! Service registration and resolution over an etcd-backed coordination
//! store:
//! - [`Registry`] publishes an instance under a lease and keeps it alive
//! - [`MembershipWatcher`] follows a base path and publishes address lists
//! - [`Discovery`] dials a target through an injected resolver registry

pub mod config;
pub mod dialer;
pub mod etcd;
pub mod observability;
pub mod registry;
pub mod resolver;
pub mod version;

pub(crate) mod deadline;

#[cfg(test)]
mod testing;

pub use config::DiscoveryConfig;
pub use dialer::{Connection, DialOptions, Discovery, LoadBalancingPolicy};
pub use etcd::EtcdCoordinationClient;
pub use registry::{KeepAliveExit, Registration, Registry};
pub use resolver::{MembershipWatcher, MembershipWatcherBuilder, WatcherState};
