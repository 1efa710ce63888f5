use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Values that can live in the demand cache.
///
/// `Serialize`/`DeserializeOwned` are required so any entry can be
/// persisted and re-hydrated without a second registration step.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Untyped (scope, key) identity of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId {
    pub scope: String,
    pub key: String,
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.key)
    }
}

/// Typed handle for a cache entry.
///
/// Binding the value type to the key means every reader of
/// `("payment_flow", "transactions")` agrees on what is stored there.
pub struct CacheKey<T> {
    id: EntryId,
    _value: PhantomData<fn() -> T>,
}

impl<T> CacheKey<T> {
    pub fn new(scope: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: EntryId {
                scope: scope.into(),
                key: key.into(),
            },
            _value: PhantomData,
        }
    }

    pub fn scope(&self) -> &str {
        &self.id.scope
    }

    pub fn key(&self) -> &str {
        &self.id.key
    }

    pub fn id(&self) -> &EntryId {
        &self.id
    }
}

impl<T> Clone for CacheKey<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for CacheKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.id).finish()
    }
}
