//! Watch-driven resolution of a base path into an address list.

mod membership;
mod watcher;

pub use watcher::{MembershipWatcher, MembershipWatcherBuilder, WatcherState};
