//! Core shared types and traits for tether
//!
//! This crate contains the data model, error taxonomy and collaborator
//! traits shared by the registration and resolution halves of tether
//! service discovery.

pub mod coordination;
pub mod error;
pub mod models;
pub mod resolver;

pub use coordination::{CoordinationClient, KeepAliveStream, WatchStream};
pub use error::{CoordinationError, DiscoveryError, ErrorKind, PublishError};
pub use models::{
    AddressList, Endpoint, EventOp, KeepAliveAck, Lease, LeaseId, MembershipEntry,
    ServiceInstance, WatchBatch,
};
pub use resolver::{ClientConn, Resolver, ResolverBuilder, ResolverRegistry, ResolverState, Target};
