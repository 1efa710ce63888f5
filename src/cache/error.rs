use thiserror::Error;

/// Errors surfaced by [`DemandCache`](super::DemandCache).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The producer failed. The entry keeps its last good value.
    #[error("Producer for '{scope}:{key}' failed: {source}")]
    Producer {
        scope: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CacheError {
    pub fn scope(&self) -> &str {
        match self {
            CacheError::Producer { scope, .. } => scope,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            CacheError::Producer { key, .. } => key,
        }
    }
}
