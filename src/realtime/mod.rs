//! Realtime change subscriptions.
//!
//! A [`SubscriptionRegistry`] holds the set of entity ids screens care about
//! and one backend channel filtered to that set. Overlapping interest from
//! several screens collapses into a single channel; every attached listener
//! sees every parsed change.

mod event;
mod feed;
mod registry;

pub use event::{ChangeEvent, ChangeKind, RawChange};
pub use feed::{ChangeFeed, FeedChannel, FeedError, MemoryFeed};
pub use registry::{
    AddOptions, ChannelState, EventRecord, ListenerId, RegistrySet, SubscriptionRegistry,
};
