//! One-shot timers and retransmission back-off.
//!
//! - [`TimerHandle`] owns at most one pending tokio task that sleeps and then
//!   runs a callback.  Re-arming replaces the pending task; cancelling aborts
//!   it.  Each arming gets a generation number so a callback that lost a race
//!   with a re-arm or cancel can tell it is stale and do nothing.
//! - [`Backoff`] tracks the current retransmission interval:
//!   `RTO = min(2 × RTO, MAX_RTO)` on every expiry, back to the base on
//!   progress.
//!
//! Callbacks hold only weak references to connection state, so a pending
//! timer never keeps a dropped connection alive.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A re-armable one-shot timer backed by a tokio task.
#[derive(Debug, Default)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire(generation)` after `after`, replacing any pending timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, after: Duration, fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            fire(generation).await;
        }));
    }

    /// Abort the pending timer, if any.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    /// Called by a firing callback to claim the timer.
    ///
    /// Returns `false` when `generation` is no longer the pending timer (it
    /// was cancelled or re-armed meanwhile); the callback must then do
    /// nothing.  On success the handle forgets the task without aborting it,
    /// since the caller is running inside it.
    pub fn release(&mut self, generation: u64) -> bool {
        if self.task.is_none() || self.generation != generation {
            return false;
        }
        self.task = None;
        true
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Exponential retransmission back-off.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the interval after a timeout, capped at the maximum.
    pub fn back_off(&mut self) -> Duration {
        self.current = (self.current * 2).min(self.max);
        self.current
    }

    /// Restore the base interval after the peer made progress.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
