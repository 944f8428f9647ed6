//! Resolver contract between discovery and the RPC client runtime
//!
//! A [`ResolverBuilder`] is registered under a scheme in a
//! [`ResolverRegistry`]. Dialing a target `{scheme}:///{base_path}` looks the
//! builder up and hands it a [`ClientConn`], the sink that receives every
//! address list the resolver publishes.

use crate::error::{DiscoveryError, PublishError};
use crate::models::AddressList;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Parsed resolver target: `{scheme}://{authority}{path}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    /// Base path being resolved, always starting with `/`
    pub path: String,
}

impl Target {
    /// Target for `base_path` under `scheme` with an empty authority.
    pub fn new(scheme: impl Into<String>, base_path: &str) -> Self {
        let path = if base_path.starts_with('/') {
            base_path.to_string()
        } else {
            format!("/{base_path}")
        };
        Self {
            scheme: scheme.into(),
            authority: String::new(),
            path,
        }
    }

    pub fn parse(target: &str) -> Result<Self, DiscoveryError> {
        let invalid = |reason| DiscoveryError::InvalidTarget {
            target: target.to_string(),
            reason,
        };

        let (scheme, rest) = target
            .split_once("://")
            .ok_or_else(|| invalid("missing \"://\" after scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("empty scheme"));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => return Err(invalid("missing base path")),
        };
        if path.trim_end_matches('/').is_empty() {
            return Err(invalid("missing base path"));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)
    }
}

/// State handed to the sink on every publication.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolverState {
    pub addresses: AddressList,
}

/// Address sink owned by the RPC client runtime.
///
/// Both methods are called from the resolver's processing task and must not
/// block it.
pub trait ClientConn: Send + Sync + 'static {
    fn update_state(&self, state: ResolverState) -> Result<(), PublishError>;

    /// Out-of-band error signal; never stops the caller.
    fn report_error(&self, error: DiscoveryError);
}

#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Hint to re-resolve. Push-driven resolvers may ignore it.
    fn resolve_now(&self);

    /// Stop resolving and wait for background work to finish.
    ///
    /// No `update_state` call happens after this returns. Safe to call more
    /// than once.
    async fn close(&self);
}

#[async_trait]
pub trait ResolverBuilder: Send + Sync + 'static {
    fn scheme(&self) -> &str;

    async fn build(
        &self,
        target: &Target,
        conn: Arc<dyn ClientConn>,
    ) -> Result<Box<dyn Resolver>, DiscoveryError>;
}

/// Scheme-indexed set of resolver builders.
///
/// One instance is created by the application and injected into every
/// dialer that needs it.
#[derive(Default)]
pub struct ResolverRegistry {
    builders: RwLock<HashMap<String, Arc<dyn ResolverBuilder>>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` under its scheme, returning the builder it replaced.
    pub fn register(&self, builder: Arc<dyn ResolverBuilder>) -> Option<Arc<dyn ResolverBuilder>> {
        let scheme = builder.scheme().to_string();
        self.builders.write().insert(scheme, builder)
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn ResolverBuilder>> {
        self.builders.read().get(scheme).cloned()
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.builders.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
