//! Membership set folded from watch batches.

use std::collections::HashMap;
use tether_core::{AddressList, Endpoint, EventOp, MembershipEntry};

/// Current view of live instances for one target, keyed by store key.
///
/// Owned by exactly one resolver task; never shared.
#[derive(Debug, Default)]
pub(crate) struct MembershipSet {
    members: HashMap<String, Endpoint>,
}

impl MembershipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns whether the set changed.
    ///
    /// `Add` overwrites any previous endpoint for the key, `Delete` of an
    /// unknown key is a no-op.
    pub fn apply(&mut self, entry: MembershipEntry) -> bool {
        match entry.op {
            EventOp::Add => {
                let previous = self.members.insert(entry.key, entry.endpoint.clone());
                previous.as_ref() != Some(&entry.endpoint)
            }
            EventOp::Delete => self.members.remove(&entry.key).is_some(),
        }
    }

    /// Apply a batch in delivery order. Returns the number of effective changes.
    pub fn apply_batch(&mut self, batch: impl IntoIterator<Item = MembershipEntry>) -> usize {
        batch
            .into_iter()
            .map(|entry| self.apply(entry))
            .filter(|changed| *changed)
            .count()
    }

    /// Full address list for the current members.
    pub fn address_list(&self) -> AddressList {
        self.members.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&Endpoint> {
        self.members.get(key)
    }
}
