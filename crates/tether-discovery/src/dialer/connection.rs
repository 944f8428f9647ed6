//! Dialed connection and the sink its resolver publishes into.

use super::balancer::Picker;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    AddressList, ClientConn, DiscoveryError, PublishError, Resolver, ResolverState, Target,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{debug, trace};

/// Sink handed to the resolver.
///
/// Owned by the resolver's processing task: once that task exits the
/// address channel closes, which is how a blocking dial notices a resolver
/// that stopped before publishing. The channel holds `None` until the first
/// publication.
pub(crate) struct DialSink {
    target: String,
    picker: Arc<Mutex<Picker>>,
    addresses: watch::Sender<Option<AddressList>>,
    last_error: Arc<Mutex<Option<DiscoveryError>>>,
}

impl ClientConn for DialSink {
    fn update_state(&self, state: ResolverState) -> Result<(), PublishError> {
        let addresses = state.addresses;
        let subchannels = {
            let mut picker = self.picker.lock();
            picker.update(&addresses);
            picker.len()
        };
        trace!(resolver_target = %self.target, addresses = addresses.len(), subchannels, "Picker updated");

        let empty = addresses.is_empty();
        self.addresses.send_replace(Some(addresses));
        if empty {
            return Err(PublishError::EmptyAddressList);
        }
        Ok(())
    }

    fn report_error(&self, error: DiscoveryError) {
        debug!(resolver_target = %self.target, error = %error, "Resolver reported error");
        *self.last_error.lock() = Some(error);
    }
}

/// Client connection over a resolved target
pub struct Connection {
    target: Target,
    resolver: Box<dyn Resolver>,
    picker: Arc<Mutex<Picker>>,
    addresses: watch::Receiver<Option<AddressList>>,
    last_error: Arc<Mutex<Option<DiscoveryError>>>,
}

/// Shared halves wired between a [`Connection`] and its [`DialSink`].
pub(crate) struct Wiring {
    pub sink: Arc<DialSink>,
    picker: Arc<Mutex<Picker>>,
    addresses: watch::Receiver<Option<AddressList>>,
    last_error: Arc<Mutex<Option<DiscoveryError>>>,
}

impl Wiring {
    pub fn new(target: &Target, picker: Picker) -> Self {
        let picker = Arc::new(Mutex::new(picker));
        let last_error = Arc::new(Mutex::new(None));
        let (tx, rx) = watch::channel(None);
        let sink = Arc::new(DialSink {
            target: target.to_string(),
            picker: picker.clone(),
            addresses: tx,
            last_error: last_error.clone(),
        });
        Self {
            sink,
            picker,
            addresses: rx,
            last_error,
        }
    }

    /// Finish wiring once the resolver is built. The sink must already have
    /// been moved into the resolver.
    pub fn connect(self, target: Target, resolver: Box<dyn Resolver>) -> Connection {
        Connection {
            target,
            resolver,
            picker: self.picker,
            addresses: self.addresses,
            last_error: self.last_error,
        }
    }
}

impl Connection {
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Channel for the next call, chosen by the load-balancing policy.
    pub fn pick(&self) -> Result<Channel, DiscoveryError> {
        self.picker.lock().pick().ok_or(DiscoveryError::NoAddresses)
    }

    /// Most recently published address list; empty before the first
    /// publication.
    pub fn addresses(&self) -> AddressList {
        self.addresses.borrow().clone().unwrap_or_default()
    }

    /// Whether the resolver has published at least once.
    pub fn is_resolved(&self) -> bool {
        self.addresses.borrow().is_some()
    }

    /// Receiver notified on every publication, `None` until the first.
    pub fn subscribe(&self) -> watch::Receiver<Option<AddressList>> {
        self.addresses.clone()
    }

    /// Most recent error reported by the resolver, if any.
    pub fn last_error(&self) -> Option<DiscoveryError> {
        self.last_error.lock().clone()
    }

    pub fn resolve_now(&self) {
        self.resolver.resolve_now();
    }

    /// Close the resolver. Safe to call more than once.
    pub async fn close(&self) {
        self.resolver.close().await;
    }

    /// Wait for the first publication, empty or not.
    pub(crate) async fn wait_ready(
        &self,
        ctx: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), DiscoveryError> {
        let mut rx = self.addresses.clone();
        let ready = async move { rx.wait_for(Option::is_some).await.map(|_| ()) };

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(DiscoveryError::Cancelled),
            result = tokio::time::timeout(timeout, ready) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(DiscoveryError::ResolverStopped),
                Err(_) => Err(DiscoveryError::DialTimeout(timeout)),
            },
        }
    }
}
