//! Membership Watcher
//!
//! Resolver that follows a base path in the coordination store. Building it
//! opens a prefix watch; a single task then folds every batch into the
//! membership set and publishes the full address list to the sink.
//!
//! Lifecycle: Building -> Watching -> Closed. A failed watch leaves nothing
//! running. If the watch stream ends or fails the task exits and the last
//! published list stays in place; there is no re-watch.

use super::membership::MembershipSet;
use crate::config::DiscoveryConfig;
use crate::deadline::call_with_deadline;
use crate::observability::{events, metrics};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tether_core::models::watch_prefix;
use tether_core::{
    ClientConn, CoordinationClient, DiscoveryError, Resolver, ResolverBuilder, ResolverState,
    Target, WatchStream,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Building,
    Watching,
    Closed,
}

/// Builds [`MembershipWatcher`]s for one scheme.
pub struct MembershipWatcherBuilder {
    scheme: String,
    client: Arc<dyn CoordinationClient>,
    watch_timeout: Duration,
    span: Span,
}

impl MembershipWatcherBuilder {
    /// `span` is entered by every processing task started by this builder.
    pub fn new(client: Arc<dyn CoordinationClient>, config: &DiscoveryConfig, span: Span) -> Self {
        Self {
            scheme: config.scheme.clone(),
            client,
            watch_timeout: config.watch_timeout,
            span,
        }
    }
}

#[async_trait]
impl ResolverBuilder for MembershipWatcherBuilder {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn build(
        &self,
        target: &Target,
        conn: Arc<dyn ClientConn>,
    ) -> Result<Box<dyn Resolver>, DiscoveryError> {
        let watcher = MembershipWatcher::start(
            self.client.as_ref(),
            target,
            conn,
            self.watch_timeout,
            self.span.clone(),
        )
        .await?;
        Ok(Box::new(watcher))
    }
}

/// Watch-driven resolver for a single target
pub struct MembershipWatcher {
    target: String,
    state: Arc<SyncMutex<WatcherState>>,
    cancel: CancellationToken,
    /// `None` once closed
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MembershipWatcher {
    /// Open the watch for `target` and start publishing into `conn`.
    pub async fn start(
        client: &dyn CoordinationClient,
        target: &Target,
        conn: Arc<dyn ClientConn>,
        watch_timeout: Duration,
        span: Span,
    ) -> Result<Self, DiscoveryError> {
        let state = Arc::new(SyncMutex::new(WatcherState::Building));
        let cancel = CancellationToken::new();
        let prefix = watch_prefix(&target.path);

        let batches = call_with_deadline(&cancel, watch_timeout, client.watch(&prefix))
            .instrument(span.clone())
            .await
            .map_err(|e| {
                e.into_setup(|source| DiscoveryError::Watch {
                    prefix: prefix.clone(),
                    source,
                })
            })?;
        debug!(parent: &span, resolver_target = %target, prefix = %prefix, "Watch established");

        let task = tokio::spawn(
            process_batches(target.to_string(), batches, conn, cancel.clone()).instrument(span),
        );
        *state.lock() = WatcherState::Watching;

        Ok(Self {
            target: target.to_string(),
            state,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    /// Whether the processing task is still consuming the watch.
    pub fn is_running(&self) -> bool {
        match self.task.try_lock() {
            Ok(task) => task.as_ref().is_some_and(|handle| !handle.is_finished()),
            Err(_) => false,
        }
    }

    pub async fn close(&self) {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            return;
        };

        self.cancel.cancel();
        if let Err(e) = handle.await {
            warn!(resolver_target = %self.target, error = %e, "Resolver task panicked");
        }
        *self.state.lock() = WatcherState::Closed;
        debug!(resolver_target = %self.target, "Resolver closed");
    }
}

#[async_trait]
impl Resolver for MembershipWatcher {
    fn resolve_now(&self) {
        // Updates are pushed by the watch
        trace!(resolver_target = %self.target, "resolve_now ignored");
    }

    async fn close(&self) {
        MembershipWatcher::close(self).await
    }
}

impl Drop for MembershipWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Fold batches into the membership set and publish after each one.
///
/// Runs until cancelled or the watch stream ends. Publish failures are
/// reported to the sink and processing continues.
async fn process_batches(
    target: String,
    mut batches: WatchStream,
    conn: Arc<dyn ClientConn>,
    cancel: CancellationToken,
) {
    let mut members = MembershipSet::new();

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break "closed",
            batch = batches.next() => match batch {
                Some(Ok(batch)) => {
                    let batch_size = batch.len();
                    let changed = members.apply_batch(batch);
                    let addresses = members.address_list();
                    let address_count = addresses.len();
                    trace!(resolver_target = %target, batch_size, changed, members = members.len(), "Watch batch applied");
                    metrics::record_watch_batch(&target, address_count);

                    match conn.update_state(ResolverState { addresses }) {
                        Ok(()) => events::membership_published(&target, address_count, batch_size),
                        Err(e) => {
                            events::publish_rejected(&target, &e.to_string());
                            metrics::record_publish_failure(&target);
                            conn.report_error(DiscoveryError::Publish(e));
                        }
                    }
                }
                Some(Err(e)) => {
                    let err = DiscoveryError::StreamClosed {
                        stream: "watch",
                        reason: e.to_string(),
                    };
                    warn!(resolver_target = %target, error = %err, "Watch failed, resolver stops updating");
                    break "stream_failed";
                }
                None => {
                    warn!(resolver_target = %target, "Watch stream closed, resolver stops updating");
                    break "stream_closed";
                }
            }
        }
    };

    events::watch_stopped(&target, reason);
}
