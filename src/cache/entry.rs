use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// Materialized value of an entry.
///
/// Hydrated entries stay as raw JSON until the first typed read,
/// because the value type is only known at the call site.
pub(crate) enum Slot {
    Live(Arc<dyn Any + Send + Sync>),
    Raw(Value),
}

pub(crate) struct Entry {
    pub slot: Slot,
    /// `None` when the age is unknown (hydrated from a clock we cannot map).
    pub written_at: Option<Instant>,
    pub written_wall: SystemTime,
    pub deps: Vec<Value>,
    pub persisted: bool,
}

impl Entry {
    /// Fresh means: dependencies unchanged and not older than `ttl`.
    pub fn is_fresh(&self, ttl: Option<Duration>, deps: &[Value], now: Instant) -> bool {
        if self.deps.as_slice() != deps {
            return false;
        }
        match (ttl, self.written_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(ttl), Some(written_at)) => now.saturating_duration_since(written_at) < ttl,
        }
    }
}

/// On-disk form of a persisted entry.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedEntry {
    pub scope: String,
    pub key: String,
    pub value: Value,
    pub written_at_ms: u64,
    #[serde(default)]
    pub deps: Vec<Value>,
}

impl PersistedEntry {
    /// Re-base the wall-clock write time onto the monotonic clock.
    pub fn written_at(&self, now: Instant) -> Option<Instant> {
        let written = UNIX_EPOCH + Duration::from_millis(self.written_at_ms);
        let age = SystemTime::now().duration_since(written).unwrap_or(Duration::ZERO);
        now.checked_sub(age)
    }

    pub fn written_wall(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.written_at_ms)
    }
}

pub(crate) fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(written_at: Option<Instant>, deps: Vec<Value>) -> Entry {
        Entry {
            slot: Slot::Raw(json!(1)),
            written_at,
            written_wall: SystemTime::now(),
            deps,
            persisted: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_decides_freshness() {
        let written = Instant::now();
        let e = entry(Some(written), vec![]);

        assert!(e.is_fresh(Some(Duration::from_secs(1)), &[], written + Duration::from_millis(500)));
        assert!(!e.is_fresh(Some(Duration::from_secs(1)), &[], written + Duration::from_secs(2)));
        assert!(e.is_fresh(None, &[], written + Duration::from_secs(3600)));
    }

    #[test]
    fn changed_deps_are_stale() {
        let now = Instant::now();
        let e = entry(Some(now), vec![json!("en")]);
        assert!(e.is_fresh(None, &[json!("en")], now));
        assert!(!e.is_fresh(None, &[json!("fr")], now));
    }

    #[test]
    fn unknown_age_is_stale_under_ttl() {
        let e = entry(None, vec![]);
        assert!(!e.is_fresh(Some(Duration::from_secs(60)), &[], Instant::now()));
        assert!(e.is_fresh(None, &[], Instant::now()));
    }
}
