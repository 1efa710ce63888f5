use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::error::{NavigationError, NavigationResult};
use super::history::{HostEvent, HostHistory};
use super::route::{FrameToken, Route, RouteFrame};
use crate::config::NavigationConfig;
use crate::storage::{storage_key, KeyValueStore};

/// Predicate over the current top frame, evaluated while popping.
pub type FramePredicate<R> = Box<dyn Fn(&RouteFrame<R>) -> bool + Send + Sync>;

/// Per-stack behaviour switches.
#[derive(Debug, Clone)]
pub struct StackOptions {
    pub sync_history: bool,
    pub persist: bool,
    pub transition_timeout: Duration,
    pub namespace: String,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self::from(&NavigationConfig::default())
    }
}

impl From<&NavigationConfig> for StackOptions {
    fn from(config: &NavigationConfig) -> Self {
        Self {
            sync_history: config.sync_history,
            persist: config.persist,
            transition_timeout: config.transition_timeout(),
            namespace: config.namespace.clone(),
        }
    }
}

/// A stack mutation, applied synchronously or awaited via
/// [`NavigationStack::navigate`].
pub enum NavRequest<R> {
    Push(R),
    Replace(R),
    Pop,
    /// Pop until the predicate holds for the top frame (or only the entry
    /// frame is left).
    PopUntil(FramePredicate<R>),
    /// Pop as [`PopUntil`](Self::PopUntil) would, then push.
    PushAndPopUntil(R, FramePredicate<R>),
}

/// Ordered, non-empty stack of frames with a fixed entry frame at the bottom.
///
/// Cheap to clone; all clones share the same frames.
pub struct NavigationStack<R: Route> {
    inner: Arc<StackInner<R>>,
}

impl<R: Route> Clone for NavigationStack<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StackInner<R> {
    id: String,
    /// Configured entry route; persisted frames are only trusted when they
    /// were written under the same one.
    entry: R,
    options: StackOptions,
    history: Option<Arc<dyn HostHistory>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    state: Mutex<StackState<R>>,
    signal: watch::Sender<NavSignal>,
}

struct StackState<R> {
    frames: Vec<RouteFrame<R>>,
    /// Frames popped but still reachable by a host forward, nearest last.
    forward: Vec<RouteFrame<R>>,
}

/// Bumped on every mutation; awaited navigations compare their own
/// sequence number against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NavSignal {
    seq: u64,
    rendered: Option<FrameToken>,
}

/// Result of applying a request under the stack lock.
struct Applied<R> {
    target: FrameToken,
    popped: Vec<RouteFrame<R>>,
    /// `None` when the request changed nothing.
    seq: Option<u64>,
}

/// A frame's view of its own position in the stack.
pub struct FrameHandle<R: Route> {
    stack: NavigationStack<R>,
    token: FrameToken,
}

impl<R: Route> FrameHandle<R> {
    pub fn token(&self) -> FrameToken {
        self.token
    }

    /// True only while this frame is the top of its stack.
    pub fn is_top(&self) -> bool {
        self.stack.is_top(self.token)
    }

    /// Report that this frame has rendered.
    pub fn mark_rendered(&self) {
        self.stack.mark_rendered(self.token);
    }
}

pub struct StackBuilder<R: Route> {
    id: String,
    entry: R,
    options: StackOptions,
    history: Option<Arc<dyn HostHistory>>,
    storage: Option<Arc<dyn KeyValueStore>>,
}

impl<R: Route> StackBuilder<R> {
    pub fn options(mut self, options: StackOptions) -> Self {
        self.options = options;
        self
    }

    pub fn history(mut self, history: Arc<dyn HostHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Build the stack, restoring persisted frames (the bottom one included,
    /// since it may have been replaced).
    pub fn build(self) -> NavigationStack<R> {
        let persisted_key = stack_storage_key(&self.options.namespace, &self.id);
        let restored = match (&self.storage, self.options.persist) {
            (Some(storage), true) => restore(storage.as_ref(), &persisted_key, &self.id, &self.entry),
            _ => Vec::new(),
        };
        let mut restored = restored.into_iter();
        let bottom = restored.next().unwrap_or_else(|| self.entry.clone());

        let history = self.history.filter(|_| self.options.sync_history);
        let mut frames = vec![RouteFrame::new(bottom)];

        if let Some(history) = &history {
            if let Err(e) = history.replace(frames[0].token, &frames[0].route.path()) {
                tracing::warn!(stack = %self.id, error = %e, "Failed to seed host history");
            }
        }
        for route in restored {
            let frame = RouteFrame::new(route);
            if let Some(history) = &history {
                if let Err(e) = history.push(frame.token, &frame.route.path()) {
                    tracing::warn!(stack = %self.id, error = %e, "Stopped replaying restored frames");
                    break;
                }
            }
            frames.push(frame);
        }

        if frames.len() > 1 {
            tracing::info!(stack = %self.id, depth = frames.len(), "Navigation stack restored");
        }

        let (signal, _) = watch::channel(NavSignal {
            seq: 0,
            rendered: None,
        });
        NavigationStack {
            inner: Arc::new(StackInner {
                id: self.id,
                entry: self.entry,
                options: self.options,
                history,
                storage: self.storage,
                state: Mutex::new(StackState {
                    frames,
                    forward: Vec::new(),
                }),
                signal,
            }),
        }
    }
}

fn stack_storage_key(namespace: &str, id: &str) -> String {
    storage_key(&[namespace, "stack", id])
}

/// On-disk form of a stack.
#[derive(Serialize, Deserialize)]
struct PersistedStack<R> {
    entry: R,
    frames: Vec<R>,
}

/// Persisted routes, bottom to top. Anything written under a different
/// entry route is stale and ignored.
fn restore<R: Route>(storage: &dyn KeyValueStore, key: &str, id: &str, entry: &R) -> Vec<R> {
    let bytes = match storage.get(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!(stack = %id, error = %e, "Failed to read persisted stack");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<PersistedStack<R>>(&bytes) {
        Ok(persisted) if persisted.entry == *entry => persisted.frames,
        Ok(_) => {
            tracing::warn!(stack = %id, "Persisted stack has a different entry route, ignoring");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(stack = %id, error = %e, "Discarding undecodable persisted stack");
            Vec::new()
        }
    }
}

/// Number of frames to keep so that the top satisfies `predicate`. Never
/// less than one.
fn keep_until<R>(frames: &[RouteFrame<R>], predicate: &FramePredicate<R>) -> usize {
    let mut keep = frames.len();
    while keep > 1 && !predicate(&frames[keep - 1]) {
        keep -= 1;
    }
    keep
}

impl<R: Route> NavigationStack<R> {
    pub fn builder(id: impl Into<String>, entry: R) -> StackBuilder<R> {
        StackBuilder {
            id: id.into(),
            entry,
            options: StackOptions::default(),
            history: None,
            storage: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn top(&self) -> RouteFrame<R> {
        let state = self.inner.state.lock();
        state.frames[state.frames.len() - 1].clone()
    }

    pub fn entry(&self) -> RouteFrame<R> {
        self.inner.state.lock().frames[0].clone()
    }

    /// Frames bottom to top.
    pub fn frames(&self) -> Vec<RouteFrame<R>> {
        self.inner.state.lock().frames.clone()
    }

    pub fn depth(&self) -> usize {
        self.inner.state.lock().frames.len()
    }

    pub fn is_top(&self, token: FrameToken) -> bool {
        self.inner
            .state
            .lock()
            .frames
            .last()
            .is_some_and(|f| f.token == token)
    }

    pub fn handle(&self, token: FrameToken) -> FrameHandle<R> {
        FrameHandle {
            stack: self.clone(),
            token,
        }
    }

    pub fn push(&self, route: R) -> Result<FrameToken, NavigationError> {
        self.apply(NavRequest::Push(route)).map(|a| a.target)
    }

    /// Pop the top frame. Popping the entry frame is a no-op returning `None`.
    pub fn pop(&self) -> Result<Option<RouteFrame<R>>, NavigationError> {
        self.apply(NavRequest::Pop)
            .map(|a| a.popped.into_iter().next())
    }

    /// Swap the top frame for `route`.
    pub fn replace(&self, route: R) -> Result<FrameToken, NavigationError> {
        self.apply(NavRequest::Replace(route)).map(|a| a.target)
    }

    /// Pop until `predicate` holds for the top frame, or only the entry frame
    /// remains, then push `route`.
    pub fn push_and_pop_until<P>(&self, route: R, predicate: P) -> Result<FrameToken, NavigationError>
    where
        P: Fn(&RouteFrame<R>) -> bool + Send + Sync + 'static,
    {
        self.apply(NavRequest::PushAndPopUntil(route, Box::new(predicate)))
            .map(|a| a.target)
    }

    /// Pop until `predicate` holds for the top frame. Returns the popped frames.
    pub fn pop_until<P>(&self, predicate: P) -> Result<Vec<RouteFrame<R>>, NavigationError>
    where
        P: Fn(&RouteFrame<R>) -> bool + Send + Sync + 'static,
    {
        self.apply(NavRequest::PopUntil(Box::new(predicate)))
            .map(|a| a.popped)
    }

    /// Pop everything above the entry frame.
    pub fn reset(&self) -> Result<Vec<RouteFrame<R>>, NavigationError> {
        self.pop_until(|_| false)
    }

    /// Apply `request` and wait until its target frame reports it rendered.
    ///
    /// Resolves `Cancelled` as soon as another mutation lands on this stack
    /// and `TimedOut` after the configured transition timeout.
    pub async fn navigate(&self, request: NavRequest<R>) -> NavigationResult {
        let mut signal = self.inner.signal.subscribe();
        let applied = match self.apply(request) {
            Ok(applied) => applied,
            Err(e) => return NavigationResult::Failed(e),
        };
        let Some(seq) = applied.seq else {
            return NavigationResult::Completed(applied.target);
        };
        let target = applied.target;

        let wait = async {
            loop {
                {
                    let current = *signal.borrow_and_update();
                    if current.seq != seq {
                        return NavigationResult::Cancelled;
                    }
                    if current.rendered == Some(target) {
                        return NavigationResult::Completed(target);
                    }
                }
                if signal.changed().await.is_err() {
                    return NavigationResult::Cancelled;
                }
            }
        };

        match tokio::time::timeout(self.inner.options.transition_timeout, wait).await {
            Ok(result) => {
                if matches!(result, NavigationResult::Cancelled) {
                    tracing::debug!(stack = %self.inner.id, "Navigation superseded");
                }
                result
            }
            Err(_) => {
                tracing::warn!(
                    stack = %self.inner.id,
                    timeout_ms = self.inner.options.transition_timeout.as_millis() as u64,
                    "Navigation timed out waiting for render"
                );
                NavigationResult::TimedOut
            }
        }
    }

    /// Record that the frame `token` rendered. Ignored unless it is the top.
    pub fn mark_rendered(&self, token: FrameToken) {
        let state = self.inner.state.lock();
        if state.frames.last().is_some_and(|f| f.token == token) {
            self.inner.signal.send_modify(|s| s.rendered = Some(token));
        }
    }

    /// Reconcile with a back/forward transition the host already performed.
    ///
    /// Host history is not touched. A transition to the current top is
    /// ignored.
    pub fn handle_host_event(&self, event: HostEvent) -> Result<FrameToken, NavigationError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let top = state.frames[state.frames.len() - 1].token;

        match event {
            HostEvent::Back { to } | HostEvent::Forward { to } if to == top => return Ok(top),
            HostEvent::Back { to } => {
                let Some(index) = state.frames.iter().position(|f| f.token == to) else {
                    tracing::warn!(stack = %self.inner.id, token = %to, "Host back to unknown entry");
                    return Err(NavigationError::UnknownHistoryEntry(to));
                };
                let popped = state.frames.split_off(index + 1);
                state.forward.extend(popped.into_iter().rev());
            }
            HostEvent::Forward { to } => {
                let Some(index) = state.forward.iter().position(|f| f.token == to) else {
                    tracing::warn!(stack = %self.inner.id, token = %to, "Host forward to unknown entry");
                    return Err(NavigationError::UnknownHistoryEntry(to));
                };
                let restored = state.forward.split_off(index);
                state.frames.extend(restored.into_iter().rev());
            }
        }

        tracing::debug!(stack = %self.inner.id, depth = state.frames.len(), "Host history reconciled");
        self.commit(state);
        Ok(state.frames[state.frames.len() - 1].token)
    }

    fn apply(&self, request: NavRequest<R>) -> Result<Applied<R>, NavigationError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let history = self.inner.history.as_deref();
        let top = state.frames[state.frames.len() - 1].token;
        let unchanged = |target| Applied {
            target,
            popped: Vec::new(),
            seq: None,
        };

        let (target, popped) = match request {
            NavRequest::Push(route) => {
                let frame = RouteFrame::new(route);
                if let Some(history) = history {
                    history.push(frame.token, &frame.route.path())?;
                }
                let target = frame.token;
                state.forward.clear();
                state.frames.push(frame);
                (target, Vec::new())
            }
            NavRequest::Replace(route) => {
                let frame = RouteFrame::new(route);
                if let Some(history) = history {
                    history.replace(frame.token, &frame.route.path())?;
                }
                let target = frame.token;
                let last = state.frames.len() - 1;
                let old = std::mem::replace(&mut state.frames[last], frame);
                (target, vec![old])
            }
            NavRequest::Pop => {
                if state.frames.len() == 1 {
                    return Ok(unchanged(top));
                }
                if let Some(history) = history {
                    history.back(1)?;
                }
                let popped = state.frames.split_off(state.frames.len() - 1);
                state.forward.extend(popped.iter().cloned());
                (state.frames[state.frames.len() - 1].token, popped)
            }
            NavRequest::PopUntil(predicate) => {
                let keep = keep_until(&state.frames, &predicate);
                let steps = state.frames.len() - keep;
                if steps == 0 {
                    return Ok(unchanged(top));
                }
                if let Some(history) = history {
                    history.back(steps)?;
                }
                let popped = state.frames.split_off(keep);
                state.forward.extend(popped.iter().rev().cloned());
                (state.frames[keep - 1].token, popped)
            }
            NavRequest::PushAndPopUntil(route, predicate) => {
                let keep = keep_until(&state.frames, &predicate);
                let steps = state.frames.len() - keep;
                if let (Some(history), true) = (history, steps > 0) {
                    history.back(steps)?;
                }
                let popped = state.frames.split_off(keep);
                state.forward.clear();

                let frame = RouteFrame::new(route);
                if let Some(history) = history {
                    if let Err(e) = history.push(frame.token, &frame.route.path()) {
                        // The host already went back; keep the stack in step with it.
                        self.commit(state);
                        return Err(e.into());
                    }
                }
                let target = frame.token;
                state.frames.push(frame);
                (target, popped)
            }
        };

        tracing::debug!(
            stack = %self.inner.id,
            depth = state.frames.len(),
            popped = popped.len(),
            "Navigation applied"
        );
        let seq = self.commit(state);
        Ok(Applied {
            target,
            popped,
            seq: Some(seq),
        })
    }

    /// Persist the frames and invalidate pending navigations. Called with the
    /// state lock held so sequence numbers follow mutation order.
    fn commit(&self, state: &StackState<R>) -> u64 {
        self.persist(&state.frames);
        let mut seq = 0;
        self.inner.signal.send_modify(|s| {
            s.seq += 1;
            s.rendered = None;
            seq = s.seq;
        });
        seq
    }

    fn persist(&self, frames: &[RouteFrame<R>]) {
        if !self.inner.options.persist {
            return;
        }
        let Some(storage) = &self.inner.storage else {
            return;
        };
        let persisted = PersistedStack {
            entry: &self.inner.entry,
            frames: frames.iter().map(|f| &f.route).collect(),
        };
        let key = stack_storage_key(&self.inner.options.namespace, &self.inner.id);
        let result = serde_json::to_vec(&persisted)
            .map_err(|e| e.to_string())
            .and_then(|bytes| storage.set(&key, &bytes).map_err(|e| e.to_string()));
        if let Err(error) = result {
            tracing::warn!(stack = %self.inner.id, %error, "Failed to persist navigation stack");
        }
    }
}
