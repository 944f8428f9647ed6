//! Dialer
//!
//! Composes a resolver builder with client settings into a [`Connection`]:
//! looks the target's scheme up in an injected [`ResolverRegistry`], builds
//! the resolver against a sink feeding the picker, and by default blocks
//! until the resolver's first publication. An empty first list still
//! completes the dial; picks fail with `NoAddresses` until members appear.

mod balancer;
mod connection;

pub use balancer::LoadBalancingPolicy;
pub use connection::Connection;

use crate::config::DiscoveryConfig;
use balancer::Picker;
use connection::Wiring;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{DiscoveryError, ResolverBuilder, ResolverRegistry, Target};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Wait for the resolver's first publication before returning
    pub block: bool,
    /// Upper bound on a blocking wait
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub policy: LoadBalancingPolicy,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            block: true,
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            policy: LoadBalancingPolicy::RoundRobin,
        }
    }
}

impl DialOptions {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            timeout: config.dial_timeout,
            connect_timeout: config.connect_timeout,
            ..Self::default()
        }
    }
}

/// Dials one target through a resolver registry
pub struct Discovery {
    registry: Arc<ResolverRegistry>,
    target: String,
    options: DialOptions,
}

impl Discovery {
    pub fn new(registry: Arc<ResolverRegistry>, target: impl Into<String>, options: DialOptions) -> Self {
        Self {
            registry,
            target: target.into(),
            options,
        }
    }

    /// Register `builder` in a fresh registry and dial the configured target.
    pub fn with_builder(builder: Arc<dyn ResolverBuilder>, config: &DiscoveryConfig) -> Self {
        let registry = Arc::new(ResolverRegistry::new());
        registry.register(builder);
        Self::new(registry, config.target().to_string(), DialOptions::from_config(config))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn registry(&self) -> &Arc<ResolverRegistry> {
        &self.registry
    }

    /// Resolve the target and return a connection over it.
    ///
    /// A blocking dial that fails after the resolver was built closes the
    /// resolver before returning.
    pub async fn dial(&self, ctx: &CancellationToken) -> Result<Connection, DiscoveryError> {
        let target = Target::parse(&self.target)?;
        let builder = self
            .registry
            .get(&target.scheme)
            .ok_or_else(|| DiscoveryError::UnknownScheme(target.scheme.clone()))?;

        let wiring = Wiring::new(
            &target,
            Picker::new(self.options.policy, self.options.connect_timeout),
        );
        let resolver = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(DiscoveryError::Cancelled),
            built = builder.build(&target, wiring.sink.clone()) => built?,
        };
        let connection = wiring.connect(target, resolver);
        debug!(resolver_target = %self.target, block = self.options.block, "Resolver built");

        if self.options.block {
            if let Err(e) = connection.wait_ready(ctx, self.options.timeout).await {
                warn!(resolver_target = %self.target, error = %e, "Dial failed");
                connection.close().await;
                return Err(e);
            }
        }

        info!(
            resolver_target = %self.target,
            addresses = connection.addresses().len(),
            "Dialed"
        );
        Ok(connection)
    }
}
