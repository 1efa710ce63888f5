//! Backend change stream boundary.

use std::collections::BTreeSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use super::event::RawChange;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Failed to open change feed for '{entity}': {reason}")]
    Open { entity: String, reason: String },

    #[error("Registry for '{0}' already exists with a different event type")]
    EntityType(String),
}

/// Receiving half of one open backend channel. Dropping it closes the channel.
pub type FeedChannel = mpsc::Receiver<RawChange>;

/// Source of realtime change notifications, filtered by entity id.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a channel delivering changes of `entity` whose id is in `ids`.
    async fn open(
        &self,
        entity: &str,
        ids: &BTreeSet<String>,
        buffer: usize,
    ) -> Result<FeedChannel, FeedError>;
}

struct OpenChannel {
    entity: String,
    ids: BTreeSet<String>,
    tx: mpsc::Sender<RawChange>,
}

/// In-process feed. The host (or a test) pushes changes with [`emit`](Self::emit).
#[derive(Default)]
pub struct MemoryFeed {
    channels: Mutex<Vec<OpenChannel>>,
    opened: Mutex<usize>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `change` to every open channel of `entity` that watches its id.
    /// Returns how many channels accepted it.
    pub fn emit(&self, entity: &str, change: RawChange) -> usize {
        let mut channels = self.channels.lock();
        channels.retain(|c| !c.tx.is_closed());
        channels
            .iter()
            .filter(|c| c.entity == entity && c.ids.contains(&change.id))
            .filter(|c| match c.tx.try_send(change.clone()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(entity, error = %e, "Dropping change for a full channel");
                    false
                }
            })
            .count()
    }

    /// Channels of `entity` that are still open.
    pub fn open_channels(&self, entity: &str) -> usize {
        self.channels
            .lock()
            .iter()
            .filter(|c| c.entity == entity && !c.tx.is_closed())
            .count()
    }

    /// Total channels ever opened.
    pub fn opened(&self) -> usize {
        *self.opened.lock()
    }

    /// Drop every channel of `entity` from the backend side.
    pub fn disconnect(&self, entity: &str) {
        self.channels.lock().retain(|c| c.entity != entity);
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn open(
        &self,
        entity: &str,
        ids: &BTreeSet<String>,
        buffer: usize,
    ) -> Result<FeedChannel, FeedError> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.channels.lock().push(OpenChannel {
            entity: entity.to_string(),
            ids: ids.clone(),
            tx,
        });
        *self.opened.lock() += 1;
        Ok(rx)
    }
}
