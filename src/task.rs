//! Cancellable background tasks.
//!
//! Long-lived polling must stop when the screen that started it goes away.
//! Instead of a mounted flag checked on every tick, the screen keeps the
//! [`TaskHandle`] and disposes it (or drops it) on teardown.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Disposer for a spawned task. Dropping the handle cancels the task.
#[derive(Debug)]
pub struct TaskHandle {
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Cancel the task. A tick already past its await point finishes first.
    pub fn dispose(mut self) {
        self.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run `tick` immediately and then every `period`, one tick at a time.
///
/// A slow tick delays the next one rather than piling up.
pub fn spawn_interval<F, Fut>(period: Duration, mut tick: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tick().await;
        }
    });
    TaskHandle::new(handle)
}
