use thiserror::Error;

use super::history::HistoryError;
use super::route::FrameToken;

#[derive(Debug, Clone, Error)]
pub enum NavigationError {
    /// The host-history transition underneath the navigation failed.
    #[error("Navigation transition failed: {0}")]
    Transition(#[from] HistoryError),

    /// A host back/forward event named an entry this stack does not know.
    #[error("Host history entry {0} does not match any frame")]
    UnknownHistoryEntry(FrameToken),

    #[error("Navigation stack '{0}' not found")]
    UnknownStack(String),

    #[error("Navigation group '{0}' has no stacks")]
    EmptyGroup(String),
}

/// How an awaited navigation ended.
#[derive(Debug, Clone)]
pub enum NavigationResult {
    /// The target frame was rendered.
    Completed(FrameToken),
    /// A newer navigation on the same stack superseded this one.
    Cancelled,
    /// The target frame was not rendered within the transition timeout.
    TimedOut,
    Failed(NavigationError),
}

impl NavigationResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}
