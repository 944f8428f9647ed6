//! Observability Module
//!
//! - `events`: Structured event logging with consistent fields
//! - `metrics`: Prometheus metrics for registrations and resolvers
//! - `tracing`: Subscriber and OpenTelemetry setup for the agent binary

pub mod events;
pub mod metrics;
pub mod tracing;

pub use self::metrics::init_metrics;
pub use self::tracing::{init_tracing, shutdown_tracing, TracingConfig};
