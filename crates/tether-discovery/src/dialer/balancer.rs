//! Client-side picker over the published address list.

use std::collections::HashMap;
use std::time::Duration;
use tether_core::AddressList;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancingPolicy {
    /// Rotate through every address
    #[default]
    RoundRobin,
    /// Always use the first address in list order
    PickFirst,
}

struct Subchannel {
    address: String,
    channel: Channel,
}

/// One lazily connected channel per address.
///
/// Updated by the resolver sink on every publication; channels for addresses
/// that stay in the list are reused.
pub(crate) struct Picker {
    policy: LoadBalancingPolicy,
    connect_timeout: Duration,
    subchannels: Vec<Subchannel>,
    next: usize,
    /// Channels created so far
    connects: u64,
}

impl Picker {
    pub fn new(policy: LoadBalancingPolicy, connect_timeout: Duration) -> Self {
        Self {
            policy,
            connect_timeout,
            subchannels: Vec::new(),
            next: 0,
            connects: 0,
        }
    }

    /// Reconcile subchannels with `list`. Addresses that do not form a valid
    /// URI are skipped.
    pub fn update(&mut self, list: &AddressList) {
        let mut previous: HashMap<String, Channel> = self
            .subchannels
            .drain(..)
            .map(|sub| (sub.address, sub.channel))
            .collect();

        for endpoint in list.endpoints() {
            let channel = match previous.remove(&endpoint.address) {
                Some(channel) => channel,
                None => match self.connect(&endpoint.address) {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!(address = %endpoint.address, error = %e, "Skipping unusable address");
                        continue;
                    }
                },
            };
            self.subchannels.push(Subchannel {
                address: endpoint.address.clone(),
                channel,
            });
        }

        if !previous.is_empty() {
            debug!(removed = previous.len(), "Dropped channels for departed addresses");
        }
        self.next = match self.subchannels.len() {
            0 => 0,
            len => self.next % len,
        };
    }

    fn connect(&mut self, address: &str) -> Result<Channel, tonic::transport::Error> {
        let uri = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let endpoint = Endpoint::from_shared(uri)?.connect_timeout(self.connect_timeout);
        self.connects += 1;
        Ok(endpoint.connect_lazy())
    }

    fn pick_index(&mut self) -> Option<usize> {
        let len = self.subchannels.len();
        if len == 0 {
            return None;
        }
        match self.policy {
            LoadBalancingPolicy::PickFirst => Some(0),
            LoadBalancingPolicy::RoundRobin => {
                let index = self.next % len;
                self.next = (index + 1) % len;
                Some(index)
            }
        }
    }

    pub fn pick(&mut self) -> Option<Channel> {
        let index = self.pick_index()?;
        Some(self.subchannels[index].channel.clone())
    }

    pub fn len(&self) -> usize {
        self.subchannels.len()
    }
}
