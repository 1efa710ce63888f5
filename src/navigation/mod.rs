//! Navigation stacks.
//!
//! A [`NavigationStack`] is an ordered list of frames whose bottom entry
//! frame can never be popped. Mutations are optionally mirrored onto a
//! [`HostHistory`] and persisted so a reload restores the same frames.
//! [`GroupNavigation`] holds one stack per tab and remembers the selected one.

mod error;
mod group;
mod history;
mod route;
mod stack;

pub use error::{NavigationError, NavigationResult};
pub use group::GroupNavigation;
pub use history::{HistoryError, HostEvent, HostHistory, MemoryHistory};
pub use route::{FrameToken, Route, RouteFrame};
pub use stack::{FrameHandle, FramePredicate, NavRequest, NavigationStack, StackBuilder, StackOptions};
