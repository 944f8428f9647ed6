//! Discovery Configuration
//!
//! Centralized settings for registration, resolution and dialing, with
//! environment variable overrides for the values operators usually change.

use std::time::Duration;
use tether_core::Target;

/// Discovery configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Etcd endpoints (env: ETCD_ENDPOINTS, comma-separated)
    pub etcd_endpoints: Vec<String>,

    /// Path under which instances register and resolvers watch (env: TETHER_BASE_PATH)
    pub base_path: String,

    /// Resolver scheme used to build dial targets (env: TETHER_SCHEME)
    pub scheme: String,

    // Lease settings
    /// TTL for registration leases (env: TETHER_LEASE_TTL_SECS)
    pub lease_ttl: Duration,

    /// Upper bound on the interval between keep-alive renewals. Leases are
    /// always renewed at least three times per granted TTL.
    pub keepalive_interval: Duration,

    // Per-call deadlines
    pub grant_timeout: Duration,
    pub put_timeout: Duration,
    /// Deadline for starting the keep-alive stream
    pub keepalive_timeout: Duration,
    pub revoke_timeout: Duration,
    /// Deadline for establishing the watch while building a resolver
    pub watch_timeout: Duration,

    // Dial settings
    /// How long a blocking dial waits for the first address list (env: TETHER_DIAL_TIMEOUT_SECS)
    pub dial_timeout: Duration,

    /// Connect timeout for each per-address channel
    pub connect_timeout: Duration,
}

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15);

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            base_path: "/tether/services".to_string(),
            scheme: "etcd".to_string(),

            lease_ttl: DEFAULT_LEASE_TTL,
            keepalive_interval: Duration::from_secs(5),

            grant_timeout: Duration::from_secs(5),
            put_timeout: Duration::from_secs(5),
            keepalive_timeout: Duration::from_secs(5),
            revoke_timeout: Duration::from_secs(5),
            watch_timeout: Duration::from_secs(5),

            dial_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl DiscoveryConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(endpoints) = lookup("ETCD_ENDPOINTS") {
            config.etcd_endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(base_path) = lookup("TETHER_BASE_PATH") {
            config.base_path = base_path;
        }

        if let Some(scheme) = lookup("TETHER_SCHEME") {
            config.scheme = scheme;
        }

        if let Some(ttl) = lookup("TETHER_LEASE_TTL_SECS").and_then(|v| v.parse::<u64>().ok()) {
            config.lease_ttl = Duration::from_secs(ttl);
        }

        if let Some(timeout) =
            lookup("TETHER_DIAL_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
        {
            config.dial_timeout = Duration::from_secs(timeout);
        }

        config
    }

    /// Lease TTL to request; a zero TTL falls back to the default.
    pub fn effective_lease_ttl(&self) -> Duration {
        if self.lease_ttl.is_zero() {
            DEFAULT_LEASE_TTL
        } else {
            self.lease_ttl
        }
    }

    /// Dial target for this configuration, e.g. `etcd:///tether/services`
    pub fn target(&self) -> Target {
        Target::new(self.scheme.clone(), &self.base_path)
    }
}
