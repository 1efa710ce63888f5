//! Host navigation history boundary.

use parking_lot::Mutex;
use thiserror::Error;

use super::route::FrameToken;

#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("Host history rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

/// Back/forward transition that originated in the host (e.g. a browser button).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The host moved back; `to` is the entry now current.
    Back { to: FrameToken },
    /// The host moved forward; `to` is the entry now current.
    Forward { to: FrameToken },
}

/// Host history the navigation stack mirrors itself onto.
pub trait HostHistory: Send + Sync {
    fn push(&self, token: FrameToken, path: &str) -> Result<(), HistoryError>;

    fn replace(&self, token: FrameToken, path: &str) -> Result<(), HistoryError>;

    fn back(&self, steps: usize) -> Result<(), HistoryError>;
}

/// In-process host history with browser semantics: pushing truncates the
/// forward entries, back/forward move a cursor.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    inner: Mutex<HistoryInner>,
}

#[derive(Debug, Default)]
struct HistoryInner {
    entries: Vec<(FrameToken, String)>,
    cursor: usize,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current entry.
    pub fn current(&self) -> Option<(FrameToken, String)> {
        let inner = self.inner.lock();
        inner.entries.get(inner.cursor).cloned()
    }

    /// Number of entries up to and including the current one.
    pub fn depth(&self) -> usize {
        let inner = self.inner.lock();
        if inner.entries.is_empty() {
            0
        } else {
            inner.cursor + 1
        }
    }

    /// Emulate the user pressing the host's back button.
    pub fn user_back(&self) -> Option<HostEvent> {
        let mut inner = self.inner.lock();
        if inner.cursor == 0 {
            return None;
        }
        inner.cursor -= 1;
        let to = inner.entries[inner.cursor].0;
        Some(HostEvent::Back { to })
    }

    /// Emulate the user pressing the host's forward button.
    pub fn user_forward(&self) -> Option<HostEvent> {
        let mut inner = self.inner.lock();
        if inner.cursor + 1 >= inner.entries.len() {
            return None;
        }
        inner.cursor += 1;
        let to = inner.entries[inner.cursor].0;
        Some(HostEvent::Forward { to })
    }
}

impl HostHistory for MemoryHistory {
    fn push(&self, token: FrameToken, path: &str) -> Result<(), HistoryError> {
        let mut inner = self.inner.lock();
        if inner.entries.is_empty() {
            inner.entries.push((token, path.to_string()));
            inner.cursor = 0;
            return Ok(());
        }
        let keep = inner.cursor + 1;
        inner.entries.truncate(keep);
        inner.entries.push((token, path.to_string()));
        inner.cursor = keep;
        Ok(())
    }

    fn replace(&self, token: FrameToken, path: &str) -> Result<(), HistoryError> {
        let mut inner = self.inner.lock();
        let cursor = inner.cursor;
        match inner.entries.get_mut(cursor) {
            Some(entry) => *entry = (token, path.to_string()),
            None => inner.entries.push((token, path.to_string())),
        }
        Ok(())
    }

    fn back(&self, steps: usize) -> Result<(), HistoryError> {
        let mut inner = self.inner.lock();
        if steps > inner.cursor {
            return Err(HistoryError::Rejected {
                operation: "back",
                reason: format!("cannot go back {} from position {}", steps, inner.cursor),
            });
        }
        inner.cursor -= steps;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_truncates_forward_entries() {
        let history = MemoryHistory::new();
        let (a, b, c) = (FrameToken::new(), FrameToken::new(), FrameToken::new());
        history.replace(a, "/a").unwrap();
        history.push(b, "/b").unwrap();
        history.back(1).unwrap();
        history.push(c, "/c").unwrap();

        assert_eq!(history.depth(), 2);
        assert_eq!(history.current().unwrap().0, c);
        assert!(history.user_forward().is_none());
    }

    #[test]
    fn user_back_reports_new_current() {
        let history = MemoryHistory::new();
        let (a, b) = (FrameToken::new(), FrameToken::new());
        history.replace(a, "/a").unwrap();
        history.push(b, "/b").unwrap();

        assert_eq!(history.user_back(), Some(HostEvent::Back { to: a }));
        assert_eq!(history.user_back(), None);
        assert_eq!(history.user_forward(), Some(HostEvent::Forward { to: b }));
    }

    #[test]
    fn back_past_start_rejected() {
        let history = MemoryHistory::new();
        history.replace(FrameToken::new(), "/").unwrap();
        assert!(history.back(1).is_err());
    }
}
