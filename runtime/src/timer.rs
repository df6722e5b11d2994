//! Cancellable timers and guarded background tasks.
//!
//! Every delayed side effect (retry, polling, loading delay, debounce, cache expiry) is a
//! spawned tokio task. The owner keeps its [`AbortHandle`] so the effect can be torn down
//! at any point; dropping the owner tears it down as well.

use composable_request_core::RunFuture;
use futures::future::FutureExt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Spawn `task` on the current runtime, if there is one
pub(crate) fn spawn_detached<F>(task: F) -> Option<AbortHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        Some(handle.spawn(task).abort_handle())
    } else {
        tracing::warn!("No tokio runtime available, background task dropped");
        None
    }
}

/// Drive `run` on the current runtime; the returned future only observes its outcome.
///
/// Dropping the returned future does not stop the run. Without a runtime, `run` is handed
/// back unchanged and makes progress only while polled.
pub(crate) fn detach_run<R>(run: RunFuture<R>) -> RunFuture<R>
where
    R: Send + 'static,
{
    if Handle::try_current().is_err() {
        return run;
    }
    let (tx, rx) = oneshot::channel();
    spawn_detached(async move {
        let _ = tx.send(run.await);
    });
    async move { rx.await.unwrap_or(Ok(None)) }.boxed()
}

/// A single re-armable timer slot
///
/// Scheduling replaces (and aborts) whatever was pending.
#[derive(Debug, Default)]
pub struct Timer {
    slot: Mutex<Option<AbortHandle>>,
}

impl Timer {
    /// Create an idle timer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Run `task` after `delay`, replacing any pending task
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = spawn_detached(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let previous = std::mem::replace(
            &mut *self.slot.lock().unwrap_or_else(PoisonError::into_inner),
            handle,
        );
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Abort the pending task, if any
    pub fn clear(&self) {
        let pending = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = pending {
            pending.abort();
        }
    }

    /// Check if a task is scheduled and has not run yet
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Background task aborted when the guard is dropped
#[derive(Debug)]
pub(crate) struct TaskGuard(AbortHandle);

impl TaskGuard {
    pub(crate) fn spawn<F>(task: F) -> Option<Self>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        spawn_detached(task).map(Self)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = Timer::new();
        let counter = Arc::clone(&fired);
        timer.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = Timer::new();
        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            timer.schedule(Duration::from_millis(50), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_run_finishes_without_observer() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let run: RunFuture<u32> = async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(1))
        }
        .boxed();

        drop(detach_run(run));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_and_drop_abort() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = Timer::new();
        let counter = Arc::clone(&fired);
        timer.schedule(Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.clear();

        let dropped = Timer::new();
        let counter = Arc::clone(&fired);
        dropped.schedule(Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(dropped);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
