//! Scoped demand cache.
//!
//! Screens read and write business data through this cache instead of
//! talking to the backend directly. Entries are namespaced by scope and
//! key so a whole business area can be purged at once (e.g. on sign-out).
//!
//! # Guarantees
//!
//! - At most one live entry and at most one running producer per (scope, key).
//!   A `demand` that finds a producer in flight returns immediately; callers
//!   may still re-check `get()` inside their producer, but the cache is the
//!   authority on deduplication.
//! - Expiry is lazy: `ttl` and `deps` are only evaluated by the next `demand`.
//! - A failed producer leaves the previous value in place.
//!
//! # Example
//!
//! ```ignore
//! let key = CacheKey::<Vec<Transaction>>::new("payment_flow", "transactions");
//! cache.demand(&key, DemandOptions::new().ttl(Duration::from_secs(30)), |ctx| async move {
//!     if ctx.get().is_some() {
//!         return Ok(());
//!     }
//!     ctx.set(backend.list_transactions().await?);
//!     Ok(())
//! }).await?;
//! let transactions = cache.read_or(&key, Vec::new());
//! ```

mod entry;
mod error;
mod key;
mod options;
mod store;

pub use error::CacheError;
pub use key::{CacheKey, CacheValue, EntryId};
pub use options::DemandOptions;
pub use store::{CacheChange, CacheMeta, DemandCache, DemandOutcome, EntryInfo, ProducerContext};
