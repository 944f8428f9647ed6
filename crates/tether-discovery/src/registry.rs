//! Instance Registry
//!
//! Publishes a service instance under `{base_path}/{address}` attached to a
//! lease, and keeps the lease alive from one background task per
//! registration:
//! 1. Grant: lease with the configured TTL
//! 2. Put: instance key bound to the lease
//! 3. Keep-alive: start renewals, spawn the task consuming acks
//!
//! Each step has its own deadline. A failed step is returned to the caller
//! and nothing is left running; a lease granted before a failed put is left
//! to expire on its own.

use crate::config::DiscoveryConfig;
use crate::deadline::{call_with_deadline, CallError};
use crate::observability::{events, metrics};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    CoordinationClient, DiscoveryError, KeepAliveStream, Lease, LeaseId, ServiceInstance,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument, Span};

/// Why a keep-alive task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveExit {
    /// Revoked, or the registration handle was dropped
    Stopped,
    /// The registration context was cancelled
    Cancelled,
    /// The store ended the ack stream
    StreamClosed,
    /// The ack stream yielded an error
    StreamFailed,
}

impl KeepAliveExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
            Self::StreamClosed => "stream_closed",
            Self::StreamFailed => "stream_failed",
        }
    }
}

/// Registers instances under one base path
pub struct Registry {
    client: Arc<dyn CoordinationClient>,
    base_path: String,
    lease_ttl: Duration,
    grant_timeout: Duration,
    put_timeout: Duration,
    keepalive_timeout: Duration,
    revoke_timeout: Duration,
    span: Span,
}

impl Registry {
    /// `span` is entered by every keep-alive task and revoke this registry starts.
    pub fn new(client: Arc<dyn CoordinationClient>, config: &DiscoveryConfig, span: Span) -> Self {
        Self {
            client,
            base_path: config.base_path.clone(),
            lease_ttl: config.effective_lease_ttl(),
            grant_timeout: config.grant_timeout,
            put_timeout: config.put_timeout,
            keepalive_timeout: config.keepalive_timeout,
            revoke_timeout: config.revoke_timeout,
            span,
        }
    }

    /// Register `address` with `metadata`.
    ///
    /// The returned [`Registration`] owns the lease. Cancelling `ctx` stops
    /// renewals without revoking, so the record lapses after one TTL.
    pub async fn register(
        &self,
        ctx: &CancellationToken,
        address: &str,
        metadata: &str,
    ) -> Result<Registration, DiscoveryError> {
        let instance = ServiceInstance::new(self.base_path.clone(), address, metadata);
        let result = self
            .register_instance(ctx, instance)
            .instrument(self.span.clone())
            .await;

        metrics::record_registration(if result.is_ok() { "ok" } else { "failed" });
        result
    }

    async fn register_instance(
        &self,
        ctx: &CancellationToken,
        instance: ServiceInstance,
    ) -> Result<Registration, DiscoveryError> {
        let key = instance.key();

        let lease = call_with_deadline(ctx, self.grant_timeout, self.client.grant(self.lease_ttl))
            .await
            .map_err(|e| e.into_setup(DiscoveryError::Grant))?;
        let lease_id = lease.id;
        debug!(lease_id = %lease_id, ttl_secs = lease.ttl.as_secs(), "Lease granted");

        call_with_deadline(
            ctx,
            self.put_timeout,
            self.client.put(&key, &instance.metadata, lease_id),
        )
        .await
        .map_err(|e| {
            e.into_setup(|source| DiscoveryError::Put {
                key: key.clone(),
                source,
            })
        })?;
        debug!(key = %key, lease_id = %lease_id, "Instance key written");

        let acks = call_with_deadline(ctx, self.keepalive_timeout, self.client.keep_alive(lease))
            .await
            .map_err(|e| e.into_setup(|source| DiscoveryError::KeepAlive { lease_id, source }))?;

        events::instance_registered(&key, &lease_id.to_string(), lease.ttl.as_secs());

        let done = CancellationToken::new();
        let task = tokio::spawn(
            run_keepalive(key.clone(), lease_id, acks, done.clone(), ctx.clone())
                .instrument(self.span.clone()),
        );

        Ok(Registration {
            instance,
            key,
            lease,
            client: self.client.clone(),
            revoke_timeout: self.revoke_timeout,
            done,
            keepalive: Mutex::new(Some(task)),
            span: self.span.clone(),
        })
    }
}

/// Consume keep-alive acks until revoked, cancelled, or the stream ends.
///
/// Stream loss is not retried: the key disappears once the lease TTL runs out.
async fn run_keepalive(
    key: String,
    lease_id: LeaseId,
    mut acks: KeepAliveStream,
    done: CancellationToken,
    ctx: CancellationToken,
) -> KeepAliveExit {
    let mut ack_count = 0u64;

    let exit = loop {
        tokio::select! {
            biased;
            _ = done.cancelled() => break KeepAliveExit::Stopped,
            _ = ctx.cancelled() => break KeepAliveExit::Cancelled,
            ack = acks.next() => match ack {
                Some(Ok(ack)) => {
                    ack_count += 1;
                    metrics::record_keepalive_ack();
                    trace!(lease_id = %lease_id, ttl_secs = ack.ttl.as_secs(), "Keep-alive acknowledged");
                }
                Some(Err(e)) => {
                    warn!(key = %key, lease_id = %lease_id, error = %e, "Keep-alive failed, lease will lapse");
                    break KeepAliveExit::StreamFailed;
                }
                None => {
                    warn!(key = %key, lease_id = %lease_id, "Keep-alive stream closed, lease will lapse");
                    break KeepAliveExit::StreamClosed;
                }
            }
        }
    };

    // Stop renewals before reporting
    drop(acks);

    events::keepalive_stopped(&key, &lease_id.to_string(), exit.as_str(), ack_count);
    metrics::record_keepalive_exit(exit.as_str());
    exit
}

/// A live registration. Owns the lease and its keep-alive task.
///
/// Dropping it stops renewals without revoking.
pub struct Registration {
    instance: ServiceInstance,
    key: String,
    lease: Lease,
    client: Arc<dyn CoordinationClient>,
    revoke_timeout: Duration,
    done: CancellationToken,
    /// `None` once revoked
    keepalive: Mutex<Option<JoinHandle<KeepAliveExit>>>,
    span: Span,
}

impl Registration {
    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn lease(&self) -> Lease {
        self.lease
    }

    /// Whether the keep-alive task is still renewing the lease.
    pub fn is_alive(&self) -> bool {
        match self.keepalive.try_lock() {
            Ok(task) => task.as_ref().is_some_and(|handle| !handle.is_finished()),
            // A revoke is in progress
            Err(_) => false,
        }
    }

    /// Stop the keep-alive task and revoke the lease.
    ///
    /// Idempotent: the first call stops the task and issues the revoke, later
    /// or concurrent calls wait for that to finish. The revoke call is bounded
    /// by the revoke deadline and abandoned when `ctx` is cancelled; either
    /// way the record expires with its TTL. Failures are logged, never
    /// returned.
    pub async fn revoke(&self, ctx: &CancellationToken) {
        self.revoke_once(ctx).instrument(self.span.clone()).await
    }

    async fn revoke_once(&self, ctx: &CancellationToken) {
        let mut keepalive = self.keepalive.lock().await;
        let Some(task) = keepalive.take() else {
            return;
        };

        self.done.cancel();
        match task.await {
            Ok(exit) => debug!(lease_id = %self.lease.id, reason = exit.as_str(), "Keep-alive task joined"),
            Err(e) => warn!(lease_id = %self.lease.id, error = %e, "Keep-alive task panicked"),
        }

        let lease_id = self.lease.id;
        match call_with_deadline(ctx, self.revoke_timeout, self.client.revoke(lease_id)).await {
            Ok(()) => events::lease_revoked(&self.key, &lease_id.to_string()),
            Err(CallError::Cancelled) => {
                warn!(key = %self.key, lease_id = %lease_id, "Lease revoke abandoned, record will expire with its TTL");
            }
            Err(CallError::Failed(source)) => {
                let err = DiscoveryError::Revoke { lease_id, source };
                warn!(key = %self.key, error = %err, "Lease revoke failed, record will expire with its TTL");
                metrics::record_revoke_failure();
            }
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, within_a_second, FakeCoordinator};
    use tether_core::{CoordinationError, ErrorKind};

    fn registry(fake: &Arc<FakeCoordinator>) -> Registry {
        let config = DiscoveryConfig {
            base_path: "/svc".to_string(),
            ..Default::default()
        };
        Registry::new(fake.clone(), &config, Span::none())
    }

    #[tokio::test]
    async fn test_register_grants_puts_and_keeps_alive() {
        let fake = Arc::new(FakeCoordinator::new());
        let ctx = CancellationToken::new();

        let registration = registry(&fake)
            .register(&ctx, "10.0.0.1:50051", "zone=a")
            .await
            .unwrap();

        assert_eq!(registration.key(), "/svc/10.0.0.1:50051");
        assert_eq!(
            registration.instance(),
            &ServiceInstance::new("/svc", "10.0.0.1:50051", "zone=a")
        );
        assert_eq!(registration.lease().ttl, Duration::from_secs(15));
        assert_eq!(fake.grants(), vec![Duration::from_secs(15)]);
        assert_eq!(
            fake.puts(),
            vec![(
                "/svc/10.0.0.1:50051".to_string(),
                "zone=a".to_string(),
                registration.lease().id
            )]
        );
        assert_eq!(fake.keepalive_count(), 1);
        assert!(registration.is_alive());

        registration.revoke(&CancellationToken::new()).await;
        assert_eq!(fake.revokes(), vec![registration.lease().id]);
    }

    #[tokio::test]
    async fn test_zero_ttl_uses_default() {
        let fake = Arc::new(FakeCoordinator::new());
        let config = DiscoveryConfig {
            lease_ttl: Duration::ZERO,
            ..Default::default()
        };
        let registry = Registry::new(fake.clone(), &config, Span::none());

        let registration = registry
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .unwrap();
        assert_eq!(fake.grants(), vec![crate::config::DEFAULT_LEASE_TTL]);
        registration.revoke(&CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn test_revoke_immediately_after_register() {
        let fake = Arc::new(FakeCoordinator::new());
        let registration = registry(&fake)
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .unwrap();

        // No ack has been delivered yet
        within_a_second(registration.revoke(&CancellationToken::new())).await;

        assert!(!registration.is_alive());
        assert_eq!(fake.revokes().len(), 1);
    }

    #[tokio::test]
    async fn test_keepalive_stream_closing_ends_task_and_revoke_still_works() {
        let fake = Arc::new(FakeCoordinator::new());
        let registration = registry(&fake)
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .unwrap();
        let lease = registration.lease().id;

        for _ in 0..3 {
            fake.ack(lease);
        }
        fake.close_keepalive(lease);

        assert!(eventually(Duration::from_secs(1), || !registration.is_alive()).await);

        within_a_second(registration.revoke(&CancellationToken::new())).await;
        assert_eq!(fake.revokes(), vec![lease]);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let fake = Arc::new(FakeCoordinator::new());
        let registration = registry(&fake)
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .unwrap();

        let (cancel_a, cancel_b) = (CancellationToken::new(), CancellationToken::new());
        tokio::join!(registration.revoke(&cancel_a), registration.revoke(&cancel_b));
        registration.revoke(&CancellationToken::new()).await;

        assert_eq!(fake.revokes().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_failure_is_swallowed() {
        let fake = Arc::new(FakeCoordinator::new());
        fake.fail_revoke(CoordinationError::Unavailable("etcd down".into()));
        let registration = registry(&fake)
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .unwrap();

        within_a_second(registration.revoke(&CancellationToken::new())).await;
        assert!(!registration.is_alive());
    }

    #[tokio::test]
    async fn test_revoke_abandoned_when_context_cancelled() {
        let fake = Arc::new(FakeCoordinator::new());
        fake.stall_revoke();
        let registration = registry(&fake)
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .unwrap();
        let lease = registration.lease().id;

        let ctx = CancellationToken::new();
        let cancel = {
            let ctx = ctx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.cancel();
            }
        };
        // Revoke deadline is 5s; only the cancellation can end this early
        within_a_second(async { tokio::join!(registration.revoke(&ctx), cancel) }).await;

        assert_eq!(fake.revokes(), vec![lease]);
        assert!(!registration.is_alive());

        // Already settled, a second revoke does not call the store again
        registration.revoke(&CancellationToken::new()).await;
        assert_eq!(fake.revokes(), vec![lease]);
    }

    #[tokio::test]
    async fn test_revoke_deadline() {
        let fake = Arc::new(FakeCoordinator::new());
        fake.stall_revoke();
        let config = DiscoveryConfig {
            revoke_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let registration = Registry::new(fake.clone(), &config, Span::none())
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .unwrap();

        within_a_second(registration.revoke(&CancellationToken::new())).await;
        assert_eq!(fake.revokes().len(), 1);
    }

    #[tokio::test]
    async fn test_context_cancellation_stops_keepalive_without_revoke() {
        let fake = Arc::new(FakeCoordinator::new());
        let ctx = CancellationToken::new();
        let registration = registry(&fake)
            .register(&ctx, "10.0.0.1:1", "")
            .await
            .unwrap();

        ctx.cancel();
        assert!(eventually(Duration::from_secs(1), || !registration.is_alive()).await);
        assert!(fake.revokes().is_empty());
    }

    #[tokio::test]
    async fn test_grant_failure_is_setup_error() {
        let fake = Arc::new(FakeCoordinator::new());
        fake.fail_grant(CoordinationError::Unavailable("no leader".into()));

        let err = registry(&fake)
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DiscoveryError::Grant(_)));
        assert_eq!(err.kind(), ErrorKind::Setup);
        assert!(fake.puts().is_empty());
        assert_eq!(fake.keepalive_count(), 0);
    }

    #[tokio::test]
    async fn test_put_failure_leaves_no_task_and_no_revoke() {
        let fake = Arc::new(FakeCoordinator::new());
        fake.fail_put(CoordinationError::Backend("permission denied".into()));

        let err = registry(&fake)
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .err()
            .unwrap();

        match err {
            DiscoveryError::Put { key, .. } => assert_eq!(key, "/svc/10.0.0.1:1"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fake.keepalive_count(), 0);
        assert!(fake.revokes().is_empty());
    }

    #[tokio::test]
    async fn test_keepalive_start_failure_is_setup_error() {
        let fake = Arc::new(FakeCoordinator::new());
        fake.fail_keepalive(CoordinationError::LeaseNotFound(LeaseId(1)));

        let err = registry(&fake)
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DiscoveryError::KeepAlive { .. }));
    }

    #[tokio::test]
    async fn test_grant_deadline() {
        let fake = Arc::new(FakeCoordinator::new());
        fake.stall_grant();
        let config = DiscoveryConfig {
            grant_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let registry = Registry::new(fake.clone(), &config, Span::none());

        let err = within_a_second(registry.register(&CancellationToken::new(), "10.0.0.1:1", ""))
            .await
            .err()
            .unwrap();
        assert_eq!(
            err,
            DiscoveryError::Grant(CoordinationError::Timeout(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn test_keepalive_start_has_its_own_deadline() {
        let fake = Arc::new(FakeCoordinator::new());
        fake.stall_keepalive();
        let config = DiscoveryConfig {
            keepalive_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let registry = Registry::new(fake.clone(), &config, Span::none());

        // Grant deadline is 5s; the keep-alive deadline must fire first
        let err = within_a_second(registry.register(&CancellationToken::new(), "10.0.0.1:1", ""))
            .await
            .err()
            .unwrap();
        assert_eq!(
            err,
            DiscoveryError::KeepAlive {
                lease_id: LeaseId(1),
                source: CoordinationError::Timeout(Duration::from_millis(20)),
            }
        );
        assert_eq!(err.kind(), ErrorKind::Setup);
    }

    #[tokio::test]
    async fn test_cancelled_during_setup() {
        let fake = Arc::new(FakeCoordinator::new());
        fake.stall_grant();
        let ctx = CancellationToken::new();
        let registry = registry(&fake);

        let register = registry.register(&ctx, "10.0.0.1:1", "");
        ctx.cancel();
        let err = within_a_second(register).await.err().unwrap();
        assert_eq!(err, DiscoveryError::Cancelled);
    }

    #[tokio::test]
    async fn test_drop_stops_keepalive() {
        let fake = Arc::new(FakeCoordinator::new());
        let registration = registry(&fake)
            .register(&CancellationToken::new(), "10.0.0.1:1", "")
            .await
            .unwrap();
        let lease = registration.lease().id;
        drop(registration);

        // Once the task is gone nothing holds the ack receiver
        assert!(eventually(Duration::from_secs(1), || fake.keepalive_closed(lease)).await);
        assert!(fake.revokes().is_empty());
    }
}
