use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

/// Per-call settings for [`DemandCache::demand`](super::DemandCache::demand).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandOptions {
    /// Entries older than this are treated as absent. Falls back to the
    /// configured default when unset.
    pub ttl: Option<Duration>,
    /// Mirror the produced value to durable storage.
    pub persist: bool,
    /// External fingerprint (e.g. active locale). Any change forces a refetch.
    pub deps: Vec<Value>,
}

impl DemandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn persist(mut self) -> Self {
        self.persist = true;
        self
    }

    /// Dependencies that cannot be encoded are left out of the fingerprint.
    pub fn deps<D: Serialize>(mut self, deps: &[D]) -> Self {
        self.deps = deps
            .iter()
            .filter_map(|d| match serde_json::to_value(d) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unserializable demand dependency");
                    None
                }
            })
            .collect();
        self
    }
}
