//! In-memory coordination store for unit tests.
//!
//! Streams are backed by unbounded channels so tests decide exactly when a
//! keep-alive ack or a watch batch is delivered, and when a stream ends.

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tether_core::{
    CoordinationClient, CoordinationError, KeepAliveAck, KeepAliveStream, Lease, LeaseId,
    WatchBatch, WatchStream,
};

type AckSender = UnboundedSender<Result<KeepAliveAck, CoordinationError>>;
type BatchSender = UnboundedSender<Result<WatchBatch, CoordinationError>>;

#[derive(Default)]
struct FakeState {
    next_lease: i64,
    grants: Vec<Duration>,
    puts: Vec<(String, String, LeaseId)>,
    revokes: Vec<LeaseId>,
    watches: Vec<String>,
    keepalives: Vec<(LeaseId, AckSender)>,
    watch_senders: Vec<BatchSender>,
    fail_grant: Option<CoordinationError>,
    fail_put: Option<CoordinationError>,
    fail_keepalive: Option<CoordinationError>,
    fail_revoke: Option<CoordinationError>,
    fail_watch: Option<CoordinationError>,
    stall_grant: bool,
    stall_keepalive: bool,
    stall_revoke: bool,
}

#[derive(Default)]
pub(crate) struct FakeCoordinator {
    state: Mutex<FakeState>,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_grant(&self, err: CoordinationError) {
        self.state.lock().fail_grant = Some(err);
    }

    pub fn fail_put(&self, err: CoordinationError) {
        self.state.lock().fail_put = Some(err);
    }

    pub fn fail_keepalive(&self, err: CoordinationError) {
        self.state.lock().fail_keepalive = Some(err);
    }

    pub fn fail_revoke(&self, err: CoordinationError) {
        self.state.lock().fail_revoke = Some(err);
    }

    pub fn fail_watch(&self, err: CoordinationError) {
        self.state.lock().fail_watch = Some(err);
    }

    /// Make `grant` never answer, to exercise call deadlines
    pub fn stall_grant(&self) {
        self.state.lock().stall_grant = true;
    }

    /// Make `keep_alive` never answer
    pub fn stall_keepalive(&self) {
        self.state.lock().stall_keepalive = true;
    }

    /// Make `revoke` never answer
    pub fn stall_revoke(&self) {
        self.state.lock().stall_revoke = true;
    }

    pub fn grants(&self) -> Vec<Duration> {
        self.state.lock().grants.clone()
    }

    pub fn puts(&self) -> Vec<(String, String, LeaseId)> {
        self.state.lock().puts.clone()
    }

    pub fn revokes(&self) -> Vec<LeaseId> {
        self.state.lock().revokes.clone()
    }

    pub fn watches(&self) -> Vec<String> {
        self.state.lock().watches.clone()
    }

    pub fn keepalive_count(&self) -> usize {
        self.state.lock().keepalives.len()
    }

    /// Deliver one keep-alive ack for `lease`.
    pub fn ack(&self, lease: LeaseId) {
        let state = self.state.lock();
        for (id, tx) in &state.keepalives {
            if *id == lease {
                let _ = tx.unbounded_send(Ok(KeepAliveAck {
                    lease_id: lease,
                    ttl: Duration::from_secs(15),
                }));
            }
        }
    }

    /// Whether every ack stream handed out for `lease` has been dropped.
    pub fn keepalive_closed(&self, lease: LeaseId) -> bool {
        self.state
            .lock()
            .keepalives
            .iter()
            .filter(|(id, _)| *id == lease)
            .all(|(_, tx)| tx.is_closed())
    }

    /// End the keep-alive stream for `lease`.
    pub fn close_keepalive(&self, lease: LeaseId) {
        self.state.lock().keepalives.retain(|(id, _)| *id != lease);
    }

    /// Deliver `batch` on every open watch stream.
    pub fn push_batch(&self, batch: WatchBatch) {
        let state = self.state.lock();
        for tx in &state.watch_senders {
            let _ = tx.unbounded_send(Ok(batch.clone()));
        }
    }

    /// Deliver a stream error on every open watch stream.
    pub fn push_watch_error(&self, err: CoordinationError) {
        let state = self.state.lock();
        for tx in &state.watch_senders {
            let _ = tx.unbounded_send(Err(err.clone()));
        }
    }

    /// End every open watch stream.
    pub fn close_watches(&self) {
        self.state.lock().watch_senders.clear();
    }
}

#[async_trait]
impl CoordinationClient for FakeCoordinator {
    async fn grant(&self, ttl: Duration) -> Result<Lease, CoordinationError> {
        let stall = {
            let mut state = self.state.lock();
            if let Some(err) = state.fail_grant.clone() {
                return Err(err);
            }
            state.grants.push(ttl);
            state.stall_grant
        };
        if stall {
            futures::future::pending::<()>().await;
        }
        let mut state = self.state.lock();
        state.next_lease += 1;
        Ok(Lease {
            id: LeaseId(state.next_lease),
            ttl,
        })
    }

    async fn put(&self, key: &str, value: &str, lease: LeaseId) -> Result<(), CoordinationError> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_put.clone() {
            return Err(err);
        }
        state.puts.push((key.to_string(), value.to_string(), lease));
        Ok(())
    }

    async fn keep_alive(&self, lease: Lease) -> Result<KeepAliveStream, CoordinationError> {
        let stall = {
            let state = self.state.lock();
            if let Some(err) = state.fail_keepalive.clone() {
                return Err(err);
            }
            state.stall_keepalive
        };
        if stall {
            futures::future::pending::<()>().await;
        }
        let (tx, rx) = unbounded();
        self.state.lock().keepalives.push((lease.id, tx));
        Ok(rx.boxed())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), CoordinationError> {
        let (stall, failure) = {
            let mut state = self.state.lock();
            state.revokes.push(lease);
            (state.stall_revoke, state.fail_revoke.clone())
        };
        if stall {
            futures::future::pending::<()>().await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, CoordinationError> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_watch.clone() {
            return Err(err);
        }
        let (tx, rx) = unbounded();
        state.watches.push(prefix.to_string());
        state.watch_senders.push(tx);
        Ok(rx.boxed())
    }
}

/// Poll `condition` until it holds or `within` elapses.
pub(crate) async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `fut`, failing the test if it takes longer than a second.
pub(crate) async fn within_a_second<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(1), fut)
        .await
        .expect("operation did not finish within a second")
}
