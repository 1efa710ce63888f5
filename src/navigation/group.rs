use std::sync::Arc;

use parking_lot::RwLock;

use super::error::NavigationError;
use super::history::HostEvent;
use super::route::{FrameToken, Route};
use super::stack::NavigationStack;
use crate::storage::{storage_key, KeyValueStore};

/// Named set of navigation stacks (one per tab) with a current selection.
///
/// Each stack keeps its own frames while another one is shown.
pub struct GroupNavigation<R: Route> {
    id: String,
    stacks: Vec<NavigationStack<R>>,
    current: RwLock<usize>,
    storage: Option<Arc<dyn KeyValueStore>>,
    namespace: String,
}

impl<R: Route> GroupNavigation<R> {
    /// Build a group over `stacks`. The persisted selection wins over
    /// `initial`; with neither, the first stack is current.
    pub fn new(
        id: impl Into<String>,
        stacks: Vec<NavigationStack<R>>,
        initial: Option<&str>,
        storage: Option<Arc<dyn KeyValueStore>>,
        namespace: impl Into<String>,
    ) -> Result<Self, NavigationError> {
        let id = id.into();
        let namespace = namespace.into();
        if stacks.is_empty() {
            return Err(NavigationError::EmptyGroup(id));
        }
        let index_of = |stack_id: &str| stacks.iter().position(|s| s.id() == stack_id);

        let mut current = match initial {
            Some(initial) => index_of(initial)
                .ok_or_else(|| NavigationError::UnknownStack(initial.to_string()))?,
            None => 0,
        };

        if let Some(storage) = &storage {
            match storage.get(&group_storage_key(&namespace, &id)) {
                Ok(Some(bytes)) => match serde_json::from_slice::<String>(&bytes) {
                    Ok(saved) => match index_of(&saved) {
                        Some(index) => current = index,
                        None => tracing::warn!(group = %id, stack = %saved, "Persisted stack no longer exists"),
                    },
                    Err(e) => tracing::warn!(group = %id, error = %e, "Discarding undecodable group selection"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(group = %id, error = %e, "Failed to read group selection"),
            }
        }

        Ok(Self {
            id,
            stacks,
            current: RwLock::new(current),
            storage,
            namespace,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stack_ids(&self) -> Vec<&str> {
        self.stacks.iter().map(|s| s.id()).collect()
    }

    pub fn stack(&self, stack_id: &str) -> Option<&NavigationStack<R>> {
        self.stacks.iter().find(|s| s.id() == stack_id)
    }

    /// Id of the stack currently shown.
    pub fn current(&self) -> &str {
        self.stacks[*self.current.read()].id()
    }

    pub fn current_stack(&self) -> &NavigationStack<R> {
        &self.stacks[*self.current.read()]
    }

    /// Switch the shown stack. Frames of every stack are left untouched.
    pub fn set_current(&self, stack_id: &str) -> Result<(), NavigationError> {
        let index = self
            .stacks
            .iter()
            .position(|s| s.id() == stack_id)
            .ok_or_else(|| NavigationError::UnknownStack(stack_id.to_string()))?;

        let previous = std::mem::replace(&mut *self.current.write(), index);
        if previous != index {
            tracing::info!(group = %self.id, stack = stack_id, "Switched navigation stack");
            self.persist(stack_id);
        }
        Ok(())
    }

    /// Route a host back/forward event to the stack currently shown.
    pub fn handle_host_event(&self, event: HostEvent) -> Result<FrameToken, NavigationError> {
        self.current_stack().handle_host_event(event)
    }

    fn persist(&self, stack_id: &str) {
        let Some(storage) = &self.storage else {
            return;
        };
        let key = group_storage_key(&self.namespace, &self.id);
        let result = serde_json::to_vec(stack_id)
            .map_err(|e| e.to_string())
            .and_then(|bytes| storage.set(&key, &bytes).map_err(|e| e.to_string()));
        if let Err(error) = result {
            tracing::warn!(group = %self.id, %error, "Failed to persist group selection");
        }
    }
}

fn group_storage_key(namespace: &str, id: &str) -> String {
    storage_key(&[namespace, "group", id])
}
