//! Debounce and throttle timers.
//!
//! Each timer is a tokio task that sleeps and then spawns the flush as a
//! separate task, so aborting a timer never cancels a flush that already
//! started. Rescheduling a slot aborts the previous timer in that slot.

use crate::lock;
use futures::future::BoxFuture;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

pub(crate) struct Scheduler {
    throttle: Duration,
    debounce_timer: Mutex<Option<JoinHandle<()>>>,
    deferred_timer: Mutex<Option<JoinHandle<()>>>,
    last_flush: Mutex<Option<Instant>>,
}

impl Scheduler {
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            debounce_timer: Mutex::new(None),
            deferred_timer: Mutex::new(None),
            last_flush: Mutex::new(None),
        }
    }

    /// Runs `task` after `delay`, replacing any pending debounce timer.
    pub fn debounce(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        replace(&self.debounce_timer, spawn_after(delay, task));
    }

    /// Runs `task` after `delay`, replacing any pending deferred flush.
    pub fn defer(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        trace!("Deferring flush by {:?}", delay);
        replace(&self.deferred_timer, spawn_after(delay, task));
    }

    /// Runs `task` after `delay` without touching either slot.
    pub fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        drop(spawn_after(delay, task));
    }

    /// Time left before the throttle floor allows another flush.
    pub fn throttle_remaining(&self) -> Option<Duration> {
        let last = (*lock(&self.last_flush))?;
        let next = last + self.throttle;
        let now = Instant::now();
        (next > now).then(|| next - now)
    }

    /// Records the start of a flush.
    pub fn mark_flush(&self) {
        *lock(&self.last_flush) = Some(Instant::now());
    }

    /// Aborts both timers.
    pub fn cancel(&self) {
        for slot in [&self.debounce_timer, &self.deferred_timer] {
            if let Some(handle) = lock(slot).take() {
                handle.abort();
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn spawn_after(delay: Duration, task: BoxFuture<'static, ()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        tokio::spawn(task);
    })
}

fn replace(slot: &Mutex<Option<JoinHandle<()>>>, handle: JoinHandle<()>) {
    if let Some(previous) = lock(slot).replace(handle) {
        previous.abort();
    }
}
