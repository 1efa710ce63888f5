use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use super::entry::{unix_millis, Entry, PersistedEntry, Slot};
use super::error::CacheError;
use super::key::{CacheKey, CacheValue, EntryId};
use super::options::DemandOptions;
use crate::config::CacheConfig;
use crate::storage::{storage_key, KeyValueStore};
use crate::task::{spawn_interval, TaskHandle};

/// What a `demand` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemandOutcome {
    /// A fresh entry already existed; the producer was not run.
    Fresh,
    /// Another producer for the same entry is running; this call deferred to it.
    InFlight,
    /// The producer ran to completion.
    Produced,
}

/// Notification emitted after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    Written(EntryId),
    Removed(EntryId),
    ScopeCleared { scope: String, removed: usize },
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMeta {
    /// False until persisted entries have been loaded. Until then an absent
    /// value does not mean "empty".
    pub is_hydrated: bool,
    pub entries: usize,
    pub in_flight: usize,
}

/// Listing row for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub id: EntryId,
    pub written_at: SystemTime,
    pub persisted: bool,
    pub deps: usize,
}

/// Process-wide scoped key/value cache with at-most-one producer per entry.
///
/// Cheap to clone; all clones share the same entries.
#[derive(Clone)]
pub struct DemandCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    state: Mutex<CacheState>,
    /// Held across every storage mutation together with the in-memory
    /// change it mirrors. Lock order: `persist`, then `state`.
    persist: Mutex<()>,
    storage: Option<Arc<dyn KeyValueStore>>,
    config: CacheConfig,
    hydration_started: AtomicBool,
    /// `Some(loaded)` once hydration has finished.
    hydrated: watch::Sender<Option<usize>>,
    changes: broadcast::Sender<CacheChange>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<EntryId, Entry>,
    in_flight: HashSet<EntryId>,
    epochs: Epochs,
}

/// Purge counters per scope and per entry.
#[derive(Debug, Clone, Default)]
struct Epochs {
    scopes: HashMap<String, u64>,
    keys: HashMap<EntryId, u64>,
}

/// Epochs observed when a producer started. A purge bumps them so the
/// producer's late `set` cannot resurrect removed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    scope_epoch: u64,
    key_epoch: u64,
}

impl Epochs {
    fn ticket(&self, id: &EntryId) -> Ticket {
        Ticket {
            scope_epoch: self.scopes.get(&id.scope).copied().unwrap_or(0),
            key_epoch: self.keys.get(id).copied().unwrap_or(0),
        }
    }

    fn bump_scope(&mut self, scope: &str) {
        *self.scopes.entry(scope.to_string()).or_insert(0) += 1;
    }

    fn bump_key(&mut self, id: &EntryId) {
        *self.keys.entry(id.clone()).or_insert(0) += 1;
    }
}

/// Handle given to a producer: read the current value, publish a new one.
pub struct ProducerContext<T> {
    cache: DemandCache,
    key: CacheKey<T>,
    options: DemandOptions,
    ticket: Ticket,
}

impl<T: CacheValue> ProducerContext<T> {
    pub fn key(&self) -> &CacheKey<T> {
        &self.key
    }

    pub fn get(&self) -> Option<T> {
        self.cache.read(&self.key)
    }

    /// Publish `value`. Returns false if the entry was purged since the
    /// producer started, in which case the value is dropped.
    pub fn set(&self, value: T) -> bool {
        self.cache
            .apply(self.key.id(), value, Some((&self.options, self.ticket)))
    }
}

impl DemandCache {
    /// In-memory cache with nothing to hydrate.
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Cache backed by durable storage. Someone must call
    /// [`hydrate`](Self::hydrate) (`Runtime::build` does); `demand` waits for it.
    pub fn with_storage(config: CacheConfig, storage: Arc<dyn KeyValueStore>) -> Self {
        Self::build(config, Some(storage))
    }

    fn build(config: CacheConfig, storage: Option<Arc<dyn KeyValueStore>>) -> Self {
        let (hydrated, _) = watch::channel(storage.is_none().then_some(0));
        let (changes, _) = broadcast::channel(config.change_buffer.max(1));
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                persist: Mutex::new(()),
                storage,
                config,
                hydration_started: AtomicBool::new(false),
                hydrated,
                changes,
            }),
        }
    }

    /// Seed entries from durable storage. Runs once; later calls return 0.
    ///
    /// Entries that fail to decode are skipped. Entries written before
    /// hydration finished win over their persisted copies, and entries
    /// purged while storage was being read stay purged.
    pub fn hydrate(&self) -> usize {
        if self.inner.hydration_started.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let Some(storage) = &self.inner.storage else {
            self.inner.hydrated.send_replace(Some(0));
            return 0;
        };

        // Purges that completed before this point are already gone from storage.
        let epochs = {
            let _persist = self.inner.persist.lock();
            self.inner.state.lock().epochs.clone()
        };

        let prefix = format!("{}/", self.inner.config.namespace);
        let keys = storage.keys(&prefix).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Cache hydration could not list persisted entries");
            Vec::new()
        });

        let mut persisted = Vec::with_capacity(keys.len());
        for storage_key in keys {
            let bytes = match storage.get(&storage_key) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(key = %storage_key, error = %e, "Failed to read persisted entry");
                    continue;
                }
            };
            match serde_json::from_slice::<PersistedEntry>(&bytes) {
                Ok(entry) => persisted.push(entry),
                Err(e) => {
                    tracing::warn!(key = %storage_key, error = %e, "Discarding undecodable cache entry");
                }
            }
        }

        let now = Instant::now();
        let mut loaded = 0;
        {
            let mut state = self.inner.state.lock();
            for p in persisted {
                let id = EntryId {
                    scope: p.scope.clone(),
                    key: p.key.clone(),
                };
                if state.entries.contains_key(&id) {
                    continue;
                }
                if state.epochs.ticket(&id) != epochs.ticket(&id) {
                    tracing::debug!(scope = %id.scope, key = %id.key, "Skipping entry purged during hydration");
                    continue;
                }
                let entry = Entry {
                    written_at: p.written_at(now),
                    written_wall: p.written_wall(),
                    slot: Slot::Raw(p.value),
                    deps: p.deps,
                    persisted: true,
                };
                state.entries.insert(id, entry);
                loaded += 1;
            }
        }

        self.inner.hydrated.send_replace(Some(loaded));
        tracing::info!(loaded, "Cache hydrated");
        loaded
    }

    pub fn is_hydrated(&self) -> bool {
        self.inner.hydrated.borrow().is_some()
    }

    /// Resolves once hydration has completed, with the number of entries it loaded.
    pub async fn wait_hydrated(&self) -> usize {
        let mut rx = self.inner.hydrated.subscribe();
        let count = match rx.wait_for(|loaded| loaded.is_some()).await {
            Ok(loaded) => (*loaded).unwrap_or(0),
            Err(_) => 0,
        };
        count
    }

    pub fn meta(&self) -> CacheMeta {
        let state = self.inner.state.lock();
        CacheMeta {
            is_hydrated: self.is_hydrated(),
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
        }
    }

    /// Subscribe to mutation notifications.
    pub fn changes(&self) -> broadcast::Receiver<CacheChange> {
        self.inner.changes.subscribe()
    }

    /// Last materialized value, never blocking.
    pub fn read<T: CacheValue>(&self, key: &CacheKey<T>) -> Option<T> {
        let mut state = self.inner.state.lock();
        let entry = state.entries.get_mut(key.id())?;
        materialize(key.id(), entry)
    }

    pub fn read_or<T: CacheValue>(&self, key: &CacheKey<T>, initial: T) -> T {
        self.read(key).unwrap_or(initial)
    }

    /// Unconditionally overwrite an entry (optimistic local mutation).
    pub fn write<T: CacheValue>(&self, key: &CacheKey<T>, value: T) {
        self.apply(key.id(), value, None);
    }

    /// Drop one entry and its persisted copy.
    pub fn remove<T>(&self, key: &CacheKey<T>) -> bool {
        let id = key.id();
        let persist = self.inner.persist.lock();
        let removed = {
            let mut state = self.inner.state.lock();
            state.epochs.bump_key(id);
            state.entries.remove(id)
        };

        let Some(entry) = removed else {
            return false;
        };
        if entry.persisted {
            self.unpersist(&self.persisted_key(id));
        }
        drop(persist);
        tracing::debug!(scope = %id.scope, key = %id.key, "Cache entry removed");
        let _ = self.inner.changes.send(CacheChange::Removed(id.clone()));
        true
    }

    /// Remove every entry under `scope`, in memory and on disk.
    pub fn clear_scope(&self, scope: &str) -> usize {
        let persist = self.inner.persist.lock();
        let removed = {
            let mut state = self.inner.state.lock();
            state.epochs.bump_scope(scope);
            let before = state.entries.len();
            state.entries.retain(|id, _| id.scope != scope);
            before - state.entries.len()
        };

        if let Some(storage) = &self.inner.storage {
            let prefix = format!(
                "{}/",
                storage_key(&[&self.inner.config.namespace, &escape_segment(scope)])
            );
            match storage.keys(&prefix) {
                Ok(keys) => keys.iter().for_each(|k| self.unpersist(k)),
                Err(e) => tracing::warn!(scope, error = %e, "Failed to list persisted scope"),
            }
        }
        drop(persist);

        tracing::info!(scope, removed, "Cache scope cleared");
        let _ = self.inner.changes.send(CacheChange::ScopeCleared {
            scope: scope.to_string(),
            removed,
        });
        removed
    }

    /// Run `producer` unless a fresh entry exists or another producer for
    /// the same entry is already running.
    ///
    /// Waits for hydration first so a persisted value is never clobbered
    /// by a producer that assumed the cache was empty. On producer failure
    /// the entry keeps its last good value and the error is returned.
    pub async fn demand<T, F, Fut>(
        &self,
        key: &CacheKey<T>,
        options: DemandOptions,
        producer: F,
    ) -> Result<DemandOutcome, CacheError>
    where
        T: CacheValue,
        F: FnOnce(ProducerContext<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        self.wait_hydrated().await;

        let id = key.id().clone();
        let ttl = options.ttl.or_else(|| self.inner.config.default_ttl());
        let ticket = {
            let mut state = self.inner.state.lock();
            if state.in_flight.contains(&id) {
                tracing::trace!(scope = %id.scope, key = %id.key, "Producer already in flight");
                return Ok(DemandOutcome::InFlight);
            }
            if let Some(entry) = state.entries.get(&id) {
                if entry.is_fresh(ttl, &options.deps, Instant::now()) {
                    return Ok(DemandOutcome::Fresh);
                }
            }
            state.in_flight.insert(id.clone());
            state.epochs.ticket(&id)
        };

        // Released on completion and when the caller drops this future.
        let inner = Arc::clone(&self.inner);
        let release_id = id.clone();
        let _release = scopeguard::guard((), move |_| {
            inner.state.lock().in_flight.remove(&release_id);
        });

        tracing::debug!(scope = %id.scope, key = %id.key, "Producer started");
        let ctx = ProducerContext {
            cache: self.clone(),
            key: key.clone(),
            options,
            ticket,
        };

        match producer(ctx).await {
            Ok(()) => {
                tracing::debug!(scope = %id.scope, key = %id.key, "Producer finished");
                Ok(DemandOutcome::Produced)
            }
            Err(source) => {
                tracing::warn!(scope = %id.scope, key = %id.key, error = %source, "Producer failed");
                Err(CacheError::Producer {
                    scope: id.scope,
                    key: id.key,
                    source,
                })
            }
        }
    }

    /// Re-demand `key` every `period` until the returned handle is disposed.
    pub fn poll<T, F, Fut>(
        &self,
        key: CacheKey<T>,
        period: Duration,
        options: DemandOptions,
        factory: F,
    ) -> TaskHandle
    where
        T: CacheValue,
        F: Fn(ProducerContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cache = self.clone();
        let factory = Arc::new(factory);
        spawn_interval(period, move || {
            let cache = cache.clone();
            let key = key.clone();
            let options = options.clone();
            let factory = Arc::clone(&factory);
            async move {
                if let Err(e) = cache.demand(&key, options, |ctx| factory(ctx)).await {
                    tracing::debug!(scope = e.scope(), key = e.key(), "Polling demand failed");
                }
            }
        })
    }

    /// Store `value`. `produced` carries the demand options and the ticket
    /// when called from a producer; plain writes keep the entry's metadata.
    fn apply<T: CacheValue>(
        &self,
        id: &EntryId,
        value: T,
        produced: Option<(&DemandOptions, Ticket)>,
    ) -> bool {
        let now_wall = SystemTime::now();
        // Held through the storage write so a purge cannot slip in between.
        let persist = self.inner.persist.lock();
        let persist_payload = {
            let mut state = self.inner.state.lock();
            if let Some((_, ticket)) = produced {
                if state.epochs.ticket(id) != ticket {
                    tracing::debug!(scope = %id.scope, key = %id.key, "Discarding value for purged entry");
                    return false;
                }
            }

            let previous = state.entries.get(id);
            let (deps, persisted) = match produced {
                Some((options, _)) => (
                    options.deps.clone(),
                    options.persist || previous.is_some_and(|e| e.persisted),
                ),
                None => (
                    previous.map(|e| e.deps.clone()).unwrap_or_default(),
                    previous.is_some_and(|e| e.persisted),
                ),
            };

            let payload = persisted.then(|| {
                serde_json::to_value(&value).map(|encoded| PersistedEntry {
                    scope: id.scope.clone(),
                    key: id.key.clone(),
                    value: encoded,
                    written_at_ms: unix_millis(now_wall),
                    deps: deps.clone(),
                })
            });

            state.entries.insert(
                id.clone(),
                Entry {
                    slot: Slot::Live(Arc::new(value)),
                    written_at: Some(Instant::now()),
                    written_wall: now_wall,
                    deps,
                    persisted,
                },
            );
            payload
        };

        match persist_payload {
            Some(Ok(payload)) => self.persist(id, &payload),
            Some(Err(e)) => {
                // An older copy on disk would resurface on the next start.
                tracing::warn!(scope = %id.scope, key = %id.key, error = %e, "Cache value is not serializable, dropping persisted copy");
                self.unpersist(&self.persisted_key(id));
            }
            None => {}
        }
        drop(persist);
        let _ = self.inner.changes.send(CacheChange::Written(id.clone()));
        true
    }

    /// Wall-clock time of the last write, if the entry exists.
    pub fn written_at<T>(&self, key: &CacheKey<T>) -> Option<SystemTime> {
        self.inner
            .state
            .lock()
            .entries
            .get(key.id())
            .map(|e| e.written_wall)
    }

    /// Every entry, optionally limited to one scope, ordered by scope then key.
    pub fn entries(&self, scope: Option<&str>) -> Vec<EntryInfo> {
        let state = self.inner.state.lock();
        let mut entries: Vec<EntryInfo> = state
            .entries
            .iter()
            .filter(|(id, _)| scope.map_or(true, |s| id.scope == s))
            .map(|(id, entry)| EntryInfo {
                id: id.clone(),
                written_at: entry.written_wall,
                persisted: entry.persisted,
                deps: entry.deps.len(),
            })
            .collect();
        entries.sort_by(|a, b| (&a.id.scope, &a.id.key).cmp(&(&b.id.scope, &b.id.key)));
        entries
    }

    fn persisted_key(&self, id: &EntryId) -> String {
        storage_key(&[
            &self.inner.config.namespace,
            &escape_segment(&id.scope),
            &escape_segment(&id.key),
        ])
    }

    fn persist(&self, id: &EntryId, payload: &PersistedEntry) {
        let Some(storage) = &self.inner.storage else {
            return;
        };
        let result = serde_json::to_vec(payload)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                storage
                    .set(&self.persisted_key(id), &bytes)
                    .map_err(|e| e.to_string())
            });
        if let Err(error) = result {
            tracing::warn!(scope = %id.scope, key = %id.key, %error, "Failed to persist cache entry");
        }
    }

    fn unpersist(&self, storage_key: &str) {
        if let Some(storage) = &self.inner.storage {
            if let Err(e) = storage.remove(storage_key) {
                tracing::warn!(key = %storage_key, error = %e, "Failed to remove persisted entry");
            }
        }
    }
}

fn materialize<T: CacheValue>(id: &EntryId, entry: &mut Entry) -> Option<T> {
    let decoded = match &entry.slot {
        Slot::Live(value) => {
            let typed = (**value).downcast_ref::<T>().cloned();
            if typed.is_none() {
                tracing::warn!(entry = %id, "Cache entry read with a mismatched type");
            }
            return typed;
        }
        Slot::Raw(raw) => serde_json::from_value::<T>(raw.clone()),
    };

    match decoded {
        Ok(value) => {
            entry.slot = Slot::Live(Arc::new(value.clone()));
            Some(value)
        }
        Err(e) => {
            tracing::warn!(entry = %id, error = %e, "Persisted cache value does not match the requested type");
            None
        }
    }
}

/// Keeps `/` inside scopes and keys from colliding with the key separator.
fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace('/', "%2F")
}
