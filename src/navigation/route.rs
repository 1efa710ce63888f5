use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A navigable screen.
///
/// Implemented by an application enum whose variants are the route keys and
/// whose fields are the route parameters, so the set of valid routes is
/// checked exhaustively wherever a renderer matches on it.
pub trait Route:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable route name, e.g. `"transaction-detail"`.
    fn key(&self) -> &'static str;

    /// Path mirrored into host history.
    fn path(&self) -> String {
        format!("/{}", self.key())
    }
}

/// Correlates a frame with its host-history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameToken(Uuid);

impl FrameToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FrameToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FrameToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of a navigation stack.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteFrame<R> {
    pub route: R,
    pub token: FrameToken,
}

impl<R: Route> RouteFrame<R> {
    pub fn new(route: R) -> Self {
        Self {
            route,
            token: FrameToken::new(),
        }
    }

    pub fn key(&self) -> &'static str {
        self.route.key()
    }
}
