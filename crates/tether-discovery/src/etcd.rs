//! Etcd Coordination Client
//!
//! [`CoordinationClient`] over `etcd-client`. Keys are stored as
//! `{base_path}/{address}` with the instance metadata as the value.

use async_trait::async_trait;
use etcd_client::{
    Client, EventType, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions, WatchOptions,
    Watcher,
};
use futures::{stream, StreamExt};
use std::time::Duration;
use tether_core::{
    CoordinationClient, CoordinationError, Endpoint, EventOp, KeepAliveAck, KeepAliveStream,
    Lease, LeaseId, MembershipEntry, WatchBatch, WatchStream,
};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Floor for the renewal cadence so a tiny TTL cannot spin the keeper.
const MIN_RENEWAL_INTERVAL: Duration = Duration::from_millis(100);

/// Etcd-backed coordination client
#[derive(Clone)]
pub struct EtcdCoordinationClient {
    client: Client,
    keepalive_interval: Duration,
}

impl EtcdCoordinationClient {
    /// Connect to etcd. A single attempt; callers own any retry policy.
    ///
    /// `keepalive_interval` is an upper bound on the renewal cadence; short
    /// leases are renewed more often.
    pub async fn connect(
        endpoints: &[String],
        keepalive_interval: Duration,
    ) -> Result<Self, CoordinationError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| CoordinationError::Unavailable(e.to_string()))?;
        debug!(endpoints = ?endpoints, "Connected to etcd");
        Ok(Self::from_client(client, keepalive_interval))
    }

    pub fn from_client(client: Client, keepalive_interval: Duration) -> Self {
        Self {
            client,
            keepalive_interval,
        }
    }
}

/// Renew at most every `configured`, and at least three times per TTL.
pub(crate) fn renewal_interval(configured: Duration, ttl: Duration) -> Duration {
    configured.min(ttl / 3).max(MIN_RENEWAL_INTERVAL)
}

fn store_error(e: etcd_client::Error) -> CoordinationError {
    CoordinationError::Backend(e.to_string())
}

fn lease_error(lease: LeaseId, e: etcd_client::Error) -> CoordinationError {
    lease_error_from_message(lease, e.to_string())
}

fn lease_error_from_message(lease: LeaseId, message: String) -> CoordinationError {
    if message.contains("lease not found") {
        CoordinationError::LeaseNotFound(lease)
    } else {
        CoordinationError::Backend(message)
    }
}

/// Map a keep-alive response TTL to an ack.
fn ack_from_ttl(lease: LeaseId, ttl: i64) -> Result<KeepAliveAck, CoordinationError> {
    // Server answers TTL 0 once the lease is gone
    if ttl <= 0 {
        return Err(CoordinationError::LeaseNotFound(lease));
    }
    Ok(KeepAliveAck {
        lease_id: lease,
        ttl: Duration::from_secs(ttl as u64),
    })
}

/// Convert a raw key-value under `prefix` into a membership entry.
///
/// Keys outside the prefix, naming no address, or not UTF-8 are skipped.
fn entry_from_kv(prefix: &str, key: &[u8], value: &[u8], op: EventOp) -> Option<MembershipEntry> {
    let key = match std::str::from_utf8(key) {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "Non UTF-8 key in watch event");
            return None;
        }
    };

    let address = key.strip_prefix(prefix).filter(|a| !a.is_empty())?;

    let metadata = match op {
        EventOp::Add => match std::str::from_utf8(value) {
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!(key = %key, error = %e, "Non UTF-8 metadata, registering without it");
                String::new()
            }
        },
        EventOp::Delete => String::new(),
    };

    Some(MembershipEntry {
        key: key.to_string(),
        endpoint: Endpoint::new(address, metadata),
        op,
    })
}

struct KeepAliveState {
    lease: LeaseId,
    keeper: LeaseKeeper,
    stream: LeaseKeepAliveStream,
    ticker: Interval,
    finished: bool,
}

impl KeepAliveState {
    /// Send one renewal and wait for its response.
    async fn renew(&mut self) -> Option<Result<KeepAliveAck, CoordinationError>> {
        self.ticker.tick().await;

        if let Err(e) = self.keeper.keep_alive().await {
            self.finished = true;
            return Some(Err(lease_error(self.lease, e)));
        }

        match self.stream.message().await {
            Ok(Some(resp)) => {
                let ack = ack_from_ttl(self.lease, resp.ttl());
                match &ack {
                    Ok(_) => trace!(lease_id = %self.lease, ttl = resp.ttl(), "Keep-alive OK"),
                    Err(_) => self.finished = true,
                }
                Some(ack)
            }
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(lease_error(self.lease, e)))
            }
        }
    }
}

/// A server-side watch. The [`Watcher`] is held for as long as the stream
/// is read; dropping both cancels the watch.
struct ActiveWatch {
    _watcher: Watcher,
    stream: etcd_client::WatchStream,
}

#[async_trait]
impl CoordinationClient for EtcdCoordinationClient {
    async fn grant(&self, ttl: Duration) -> Result<Lease, CoordinationError> {
        let mut client = self.client.clone();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let resp = client.lease_grant(ttl_secs, None).await.map_err(store_error)?;

        let granted = if resp.ttl() > 0 {
            Duration::from_secs(resp.ttl() as u64)
        } else {
            Duration::from_secs(ttl_secs as u64)
        };
        Ok(Lease {
            id: LeaseId(resp.id()),
            ttl: granted,
        })
    }

    async fn put(&self, key: &str, value: &str, lease: LeaseId) -> Result<(), CoordinationError> {
        let mut client = self.client.clone();
        let options = PutOptions::new().with_lease(lease.0);
        client
            .put(key, value, Some(options))
            .await
            .map_err(|e| lease_error(lease, e))?;
        Ok(())
    }

    async fn keep_alive(&self, lease: Lease) -> Result<KeepAliveStream, CoordinationError> {
        let mut client = self.client.clone();
        let (keeper, stream) = client
            .lease_keep_alive(lease.id.0)
            .await
            .map_err(|e| lease_error(lease.id, e))?;

        let period = renewal_interval(self.keepalive_interval, lease.ttl);
        debug!(lease_id = %lease.id, period_ms = period.as_millis() as u64, "Keep-alive started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let state = KeepAliveState {
            lease: lease.id,
            keeper,
            stream,
            ticker,
            finished: false,
        };

        let acks = stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            let item = state.renew().await?;
            Some((item, state))
        });

        Ok(acks.boxed())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), CoordinationError> {
        let mut client = self.client.clone();
        client
            .lease_revoke(lease.0)
            .await
            .map_err(|e| lease_error(lease, e))?;
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, CoordinationError> {
        let mut client = self.client.clone();

        // Snapshot first, then watch from the next revision so nothing is missed
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(store_error)?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
        let snapshot: WatchBatch = resp
            .kvs()
            .iter()
            .filter_map(|kv| entry_from_kv(prefix, kv.key(), kv.value(), EventOp::Add))
            .collect();

        debug!(
            prefix = %prefix,
            revision = revision,
            members = snapshot.len(),
            "Watch snapshot loaded"
        );

        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(revision + 1);
        let (watcher, stream) = client
            .watch(prefix, Some(options))
            .await
            .map_err(store_error)?;
        let active = ActiveWatch {
            _watcher: watcher,
            stream,
        };

        let prefix = prefix.to_string();
        let updates = stream::unfold(Some(active), move |state| {
            let prefix = prefix.clone();
            async move {
                let mut active = state?;
                loop {
                    match active.stream.message().await {
                        Ok(Some(resp)) => {
                            if resp.canceled() {
                                let err = CoordinationError::Backend(
                                    "watch canceled by server".to_string(),
                                );
                                return Some((Err(err), None));
                            }

                            let batch: WatchBatch = resp
                                .events()
                                .iter()
                                .filter_map(|event| {
                                    let op = match event.event_type() {
                                        EventType::Put => EventOp::Add,
                                        EventType::Delete => EventOp::Delete,
                                    };
                                    event
                                        .kv()
                                        .and_then(|kv| entry_from_kv(&prefix, kv.key(), kv.value(), op))
                                })
                                .collect();

                            // Progress notifications carry no events
                            if batch.is_empty() {
                                continue;
                            }
                            return Some((Ok(batch), Some(active)));
                        }
                        Ok(None) => return None,
                        Err(e) => return Some((Err(store_error(e)), None)),
                    }
                }
            }
        });

        Ok(stream::once(async move { Ok(snapshot) }).chain(updates).boxed())
    }
}
