//! Stuck-operation watchdog.
//!
//! Every batch and every manual sync arms a watchdog. If the operation has
//! not finished when the timeout elapses, the watchdog runs the stuck
//! handler. Dropping the returned guard disarms it, so every exit path of
//! the guarded operation disarms.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Which kind of operation a watchdog guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Guarded {
    Batch,
    ManualSync,
}

/// Disarms the watchdog when dropped.
#[must_use = "dropping the guard disarms the watchdog"]
pub(crate) struct WatchdogGuard {
    timer: JoinHandle<()>,
    generation: u64,
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        trace!("Disarming watchdog {}", self.generation);
        self.timer.abort();
    }
}

/// Runs `on_stuck` unless the guard is dropped within `timeout`.
///
/// The handler is spawned on its own, so a disarm racing with expiry cannot
/// interrupt a handler that already started.
pub(crate) fn arm(timeout: Duration, generation: u64, on_stuck: BoxFuture<'static, ()>) -> WatchdogGuard {
    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        tokio::spawn(on_stuck);
    });
    WatchdogGuard { timer, generation }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn flag_task(flag: &Arc<AtomicBool>) -> BoxFuture<'static, ()> {
        let flag = Arc::clone(flag);
        async move { flag.store(true, Ordering::SeqCst) }.boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout() {
        let fired = Arc::new(AtomicBool::new(false));
        let _guard = arm(Duration::from_secs(15), 1, flag_task(&fired));

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_guard_disarms() {
        let fired = Arc::new(AtomicBool::new(false));
        let guard = arm(Duration::from_secs(15), 1, flag_task(&fired));
        drop(guard);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
