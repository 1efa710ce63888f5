use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use super::event::{ChangeEvent, ChangeKind, RawChange};
use super::feed::{ChangeFeed, FeedChannel, FeedError};
use crate::config::RealtimeConfig;
use crate::task::TaskHandle;

/// Typed payload of a watched entity.
pub trait EventRecord: Clone + DeserializeOwned + Send + Sync + 'static {}

impl<T: Clone + DeserializeOwned + Send + Sync + 'static> EventRecord for T {}

type Listener<E> = Arc<dyn Fn(&ChangeEvent<E>) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Report the id as changed even if it is already watched.
    pub override_existing: bool,
    /// Replay the last known record of the id to listeners right away.
    pub update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No ids are watched, so no channel is open.
    Idle,
    Open,
    /// The backend closed the channel or refused to open it. Listeners get
    /// nothing until the next `update_subscription`.
    Broken,
}

/// Watch-set of one entity type with a single backend channel behind it.
///
/// Cheap to clone; all clones share the same watch-set and listeners.
pub struct SubscriptionRegistry<E: EventRecord> {
    inner: Arc<RegistryInner<E>>,
}

impl<E: EventRecord> Clone for SubscriptionRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RegistryInner<E> {
    entity: String,
    feed: Arc<dyn ChangeFeed>,
    buffer: usize,
    state: Mutex<RegistryState<E>>,
}

struct RegistryState<E> {
    watched: BTreeSet<String>,
    listeners: Vec<(ListenerId, Listener<E>)>,
    next_listener: u64,
    records: HashMap<String, E>,
    channel: Option<TaskHandle>,
    channel_state: ChannelState,
    /// Bumped by every `update_subscription`; a slower, older call must
    /// not install its channel over a newer one.
    generation: u64,
}

impl<E: EventRecord> SubscriptionRegistry<E> {
    pub fn new(entity: impl Into<String>, feed: Arc<dyn ChangeFeed>, buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entity: entity.into(),
                feed,
                buffer,
                state: Mutex::new(RegistryState {
                    watched: BTreeSet::new(),
                    listeners: Vec::new(),
                    next_listener: 0,
                    records: HashMap::new(),
                    channel: None,
                    channel_state: ChannelState::Idle,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn entity(&self) -> &str {
        &self.inner.entity
    }

    /// Start watching `id`. Returns whether the watch-set changed; the
    /// channel itself follows on the next [`update_subscription`](Self::update_subscription).
    pub fn add_id(&self, id: impl Into<String>, options: AddOptions) -> bool {
        let id = id.into();
        let (changed, replay) = {
            let mut state = self.inner.state.lock();
            let changed = state.watched.insert(id.clone()) || options.override_existing;
            let replay = if options.update {
                state.records.get(&id).cloned().map(|record| {
                    let event = ChangeEvent {
                        kind: ChangeKind::Update,
                        id: id.clone(),
                        record: Some(record),
                        replayed: true,
                    };
                    (event, snapshot(&state.listeners))
                })
            } else {
                None
            };
            (changed, replay)
        };

        if changed {
            tracing::trace!(entity = %self.inner.entity, id = %id, "Id watched");
        }
        if let Some((event, listeners)) = replay {
            listeners.iter().for_each(|listener| listener(&event));
        }
        changed
    }

    /// Stop watching `id` and forget its last known record.
    pub fn remove_id(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        state.records.remove(id);
        state.watched.remove(id)
    }

    pub fn is_watching(&self, id: &str) -> bool {
        self.inner.state.lock().watched.contains(id)
    }

    pub fn watched_ids(&self) -> Vec<String> {
        self.inner.state.lock().watched.iter().cloned().collect()
    }

    /// Remember `record` as the last known value of `id`, replayed by
    /// `add_id` with `update` set.
    pub fn record(&self, id: impl Into<String>, record: E) {
        self.inner.state.lock().records.insert(id.into(), record);
    }

    pub fn last_record(&self, id: &str) -> Option<E> {
        self.inner.state.lock().records.get(id).cloned()
    }

    /// Replace the backend channel with one filtered to the current
    /// watch-set. With nothing watched, the old channel is closed and none
    /// is opened.
    pub async fn update_subscription(&self) -> Result<(), FeedError> {
        let (ids, generation) = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            if let Some(previous) = state.channel.take() {
                previous.dispose();
            }
            // Stays idle if this call is dropped before the new channel opens.
            state.channel_state = ChannelState::Idle;
            if state.watched.is_empty() {
                tracing::debug!(entity = %self.inner.entity, "Subscription closed, nothing watched");
                return Ok(());
            }
            (state.watched.clone(), state.generation)
        };

        let opened = self
            .inner
            .feed
            .open(&self.inner.entity, &ids, self.inner.buffer)
            .await;

        let mut state = self.inner.state.lock();
        if state.generation != generation {
            tracing::debug!(entity = %self.inner.entity, "Subscription superseded while opening");
            return Ok(());
        }
        match opened {
            Ok(rx) => {
                state.channel = Some(spawn_dispatcher(&self.inner, rx, generation));
                state.channel_state = ChannelState::Open;
                tracing::debug!(entity = %self.inner.entity, ids = ids.len(), "Resubscribed");
                Ok(())
            }
            Err(e) => {
                state.channel_state = ChannelState::Broken;
                tracing::warn!(entity = %self.inner.entity, error = %e, "Failed to open change feed");
                Err(e)
            }
        }
    }

    pub fn channel_state(&self) -> ChannelState {
        self.inner.state.lock().channel_state
    }

    /// Deliver every parsed change for a watched id to `listener`.
    pub fn attach_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent<E>) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(listener, _)| *listener != id);
        state.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }
}

fn snapshot<E>(listeners: &[(ListenerId, Listener<E>)]) -> Vec<Listener<E>> {
    listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
}

fn spawn_dispatcher<E: EventRecord>(
    inner: &Arc<RegistryInner<E>>,
    mut rx: FeedChannel,
    generation: u64,
) -> TaskHandle {
    let registry = Arc::downgrade(inner);
    TaskHandle::new(tokio::spawn(async move {
        while let Some(raw) = rx.recv().await {
            let Some(inner) = registry.upgrade() else {
                return;
            };
            inner.dispatch(raw);
        }
        mark_broken(&registry, generation);
    }))
}

fn mark_broken<E>(registry: &Weak<RegistryInner<E>>, generation: u64) {
    let Some(inner) = registry.upgrade() else {
        return;
    };
    let mut state = inner.state.lock();
    if state.generation == generation {
        state.channel_state = ChannelState::Broken;
        tracing::warn!(entity = %inner.entity, "Change feed closed by backend");
    }
}

impl<E: EventRecord> RegistryInner<E> {
    /// Parse and fan out one change. Listeners run outside the lock.
    fn dispatch(&self, raw: RawChange) {
        let id = raw.id.clone();
        let event = match ChangeEvent::<E>::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(entity = %self.entity, id = %id, error = %e, "Skipping unparseable change");
                return;
            }
        };

        let listeners = {
            let mut state = self.state.lock();
            if !state.watched.contains(&event.id) {
                tracing::trace!(entity = %self.entity, id = %event.id, "Dropping change for unwatched id");
                return;
            }
            match (event.kind, &event.record) {
                (ChangeKind::Delete, _) => {
                    state.records.remove(&event.id);
                }
                (_, Some(record)) => {
                    state.records.insert(event.id.clone(), record.clone());
                }
                (_, None) => {}
            }
            snapshot(&state.listeners)
        };

        for listener in listeners {
            listener(&event);
        }
    }
}

/// One registry per entity name, created on first use and shared afterwards.
pub struct RegistrySet {
    feed: Arc<dyn ChangeFeed>,
    buffer: usize,
    registries: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl RegistrySet {
    pub fn new(feed: Arc<dyn ChangeFeed>, config: &RealtimeConfig) -> Self {
        Self {
            feed,
            buffer: config.channel_buffer,
            registries: Mutex::new(HashMap::new()),
        }
    }

    /// The registry for `entity`. Fails if it was first requested with a
    /// different event type.
    pub fn registry<E: EventRecord>(&self, entity: &str) -> Result<SubscriptionRegistry<E>, FeedError> {
        let mut registries = self.registries.lock();
        if let Some(existing) = registries.get(entity) {
            return existing
                .downcast_ref::<SubscriptionRegistry<E>>()
                .cloned()
                .ok_or_else(|| FeedError::EntityType(entity.to_string()));
        }
        let registry = SubscriptionRegistry::new(entity, Arc::clone(&self.feed), self.buffer);
        registries.insert(entity.to_string(), Box::new(registry.clone()));
        Ok(registry)
    }

    pub fn entities(&self) -> Vec<String> {
        let mut entities: Vec<String> = self.registries.lock().keys().cloned().collect();
        entities.sort();
        entities
    }
}
