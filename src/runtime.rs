//! Service container built once at application start.
//!
//! Owns the cache, the subscription registries and the tab navigation group,
//! and is passed by reference to whatever renders screens.

use std::sync::Arc;

use thiserror::Error;

use crate::cache::DemandCache;
use crate::config::{ConfigError, RuntimeConfig};
use crate::navigation::{GroupNavigation, HostHistory, NavigationError, NavigationStack, Route, StackOptions};
use crate::realtime::{ChangeFeed, MemoryFeed, RegistrySet};
use crate::storage::{KeyValueStore, MemoryStore};

/// Group id under which the tab selection is persisted.
pub const TAB_GROUP: &str = "tabs";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),
}

type HistoryFactory = Box<dyn Fn(&str) -> Arc<dyn HostHistory>>;

pub struct RuntimeBuilder<R: Route> {
    config: RuntimeConfig,
    entry: Box<dyn Fn(&str) -> R>,
    storage: Option<Arc<dyn KeyValueStore>>,
    feed: Option<Arc<dyn ChangeFeed>>,
    history: Option<HistoryFactory>,
}

impl<R: Route> RuntimeBuilder<R> {
    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Host history for each stack, keyed by stack id.
    pub fn history<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn HostHistory> + 'static,
    {
        self.history = Some(Box::new(factory));
        self
    }

    /// Validate the configuration and wire every component. Persisted stacks
    /// and the tab selection are restored here. Cache hydration starts here
    /// too, on the blocking pool when a tokio runtime is running and inline
    /// otherwise.
    pub fn build(self) -> Result<Runtime<R>, RuntimeError> {
        self.config.validate()?;

        let storage: Arc<dyn KeyValueStore> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(MemoryStore::new()),
        };
        let feed: Arc<dyn ChangeFeed> = match self.feed {
            Some(feed) => feed,
            None => Arc::new(MemoryFeed::new()),
        };
        let nav = &self.config.navigation;
        let options = StackOptions::from(nav);

        let stacks = nav
            .stacks
            .iter()
            .map(|id| {
                let mut builder = NavigationStack::builder(id.as_str(), (self.entry)(id))
                    .options(options.clone())
                    .storage(Arc::clone(&storage));
                if let Some(factory) = &self.history {
                    builder = builder.history(factory(id));
                }
                builder.build()
            })
            .collect();

        let group_storage = nav.persist.then(|| Arc::clone(&storage));
        let navigation = GroupNavigation::new(
            TAB_GROUP,
            stacks,
            nav.initial_stack(),
            group_storage,
            nav.namespace.as_str(),
        )?;

        let cache = DemandCache::with_storage(self.config.cache.clone(), Arc::clone(&storage));
        start_hydration(&cache);
        let registries = RegistrySet::new(feed, &self.config.realtime);

        tracing::info!(
            stacks = nav.stacks.len(),
            current = navigation.current(),
            "Runtime ready"
        );

        Ok(Runtime {
            config: self.config,
            storage,
            cache,
            registries,
            navigation,
        })
    }
}

fn start_hydration(cache: &DemandCache) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let cache = cache.clone();
            handle.spawn_blocking(move || cache.hydrate());
        }
        Err(_) => {
            cache.hydrate();
        }
    }
}

pub struct Runtime<R: Route> {
    config: RuntimeConfig,
    storage: Arc<dyn KeyValueStore>,
    cache: DemandCache,
    registries: RegistrySet,
    navigation: GroupNavigation<R>,
}

impl<R: Route> Runtime<R> {
    /// `entry` names the entry route of each configured stack.
    pub fn builder<F>(config: RuntimeConfig, entry: F) -> RuntimeBuilder<R>
    where
        F: Fn(&str) -> R + 'static,
    {
        RuntimeBuilder {
            config,
            entry: Box::new(entry),
            storage: None,
            feed: None,
            history: None,
        }
    }

    /// Wait for the hydration started by `build`; returns how many cache
    /// entries it loaded. Demands issued meanwhile wait for it as well.
    pub async fn hydrate(&self) -> usize {
        self.cache.wait_hydrated().await
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.storage
    }

    pub fn cache(&self) -> &DemandCache {
        &self.cache
    }

    pub fn registries(&self) -> &RegistrySet {
        &self.registries
    }

    pub fn navigation(&self) -> &GroupNavigation<R> {
        &self.navigation
    }

    /// Purge per-session data: every listed cache scope and every stack back
    /// to its entry frame.
    pub fn sign_out(&self, scopes: &[&str]) -> usize {
        let removed: usize = scopes.iter().map(|s| self.cache.clear_scope(s)).sum();
        for id in self.navigation.stack_ids() {
            if let Some(stack) = self.navigation.stack(id) {
                if let Err(e) = stack.reset() {
                    tracing::warn!(stack = id, error = %e, "Failed to reset stack on sign-out");
                }
            }
        }
        tracing::info!(scopes = scopes.len(), removed, "Signed out");
        removed
    }
}
