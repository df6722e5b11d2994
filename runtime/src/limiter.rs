//! Rate limiters.
//!
//! - [`LeadingLimiter`]: fire at most once per window, dropping calls inside it
//! - [`Debouncer`]: coalesce bursts and fire after a quiet period, with optional leading
//!   edge and `max_wait` bound
//! - [`Debouncer::throttle`]: bounded rate with leading and trailing edges, built as a
//!   debounce whose `max_wait` equals its interval
//!
//! The debouncer follows the classic edge semantics: a call is *invoking* if nothing was
//! called for a full interval (or `max_wait` has elapsed since the last invocation); the
//! first invoking call opens a window and fires on the leading edge if enabled; the timer
//! then fires the most recent pending call on the trailing edge once calls stop.

use crate::timer::Timer;
use composable_request_core::{DebounceOptions, ThrottleOptions};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// A deferred call
pub type Job = Box<dyn FnOnce() + Send>;

/// Fires at most once per window
#[derive(Debug)]
pub struct LeadingLimiter {
    window: Duration,
    last_fired: Mutex<Option<Instant>>,
}

impl LeadingLimiter {
    /// Create a limiter with the given window
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: Mutex::new(None),
        }
    }

    /// Claim the window; returns `false` if a call already fired inside it
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = self
            .last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.saturating_duration_since(at) < self.window => false,
            _ => {
                *last = Some(now);
                true
            },
        }
    }

    /// Wrap `callback` so it runs at most once per `window`
    pub fn wrap<F>(window: Duration, callback: F) -> impl Fn() + Send + Sync + 'static
    where
        F: Fn() + Send + Sync + 'static,
    {
        let limiter = Self::new(window);
        move || {
            if limiter.try_acquire() {
                callback();
            }
        }
    }
}

#[derive(Default)]
struct DebounceState {
    pending: Option<Job>,
    last_call: Option<Instant>,
    last_invoke: Option<Instant>,
    timer_armed: bool,
}

struct DebounceInner {
    wait: Duration,
    leading: bool,
    trailing: bool,
    max_wait: Option<Duration>,
    state: Mutex<DebounceState>,
    timer: Timer,
}

impl DebounceInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, DebounceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn should_invoke(&self, state: &DebounceState, now: Instant) -> bool {
        let Some(last_call) = state.last_call else {
            return true;
        };
        if now.saturating_duration_since(last_call) >= self.wait {
            return true;
        }
        match (self.max_wait, state.last_invoke) {
            (Some(max_wait), Some(last_invoke)) => {
                now.saturating_duration_since(last_invoke) >= max_wait
            },
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn remaining_wait(&self, state: &DebounceState, now: Instant) -> Duration {
        let since_call = state
            .last_call
            .map_or(self.wait, |at| now.saturating_duration_since(at));
        let waiting = self.wait.saturating_sub(since_call);
        match (self.max_wait, state.last_invoke) {
            (Some(max_wait), Some(last_invoke)) => {
                waiting.min(max_wait.saturating_sub(now.saturating_duration_since(last_invoke)))
            },
            _ => waiting,
        }
    }

    fn arm(self: &Arc<Self>, state: &mut DebounceState, delay: Duration) {
        state.timer_armed = true;
        let weak: Weak<Self> = Arc::downgrade(self);
        self.timer.schedule(delay, async move {
            if let Some(inner) = weak.upgrade() {
                inner.timer_expired();
            }
        });
    }

    fn timer_expired(self: &Arc<Self>) {
        let now = Instant::now();
        let job = {
            let mut state = self.lock();
            if self.should_invoke(&state, now) {
                state.timer_armed = false;
                let job = state.pending.take();
                if self.trailing && job.is_some() {
                    state.last_invoke = Some(now);
                    job
                } else {
                    None
                }
            } else {
                let remaining = self.remaining_wait(&state, now);
                self.arm(&mut state, remaining);
                None
            }
        };
        if let Some(job) = job {
            job();
        }
    }
}

/// Coalesces bursts of calls
///
/// Cheap to clone; clones share the same window.
///
/// # Example
///
/// ```ignore
/// let debouncer = Debouncer::new(Duration::from_millis(300), DebounceOptions::default());
/// debouncer.call(|| println!("search"));
/// debouncer.call(|| println!("search")); // replaces the pending call
/// ```
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<DebounceInner>,
}

impl Debouncer {
    /// Debounce with the given quiet period and edge options
    #[must_use]
    pub fn new(wait: Duration, options: DebounceOptions) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                wait,
                leading: options.leading,
                trailing: options.trailing,
                max_wait: options.max_wait.map(|max_wait| max_wait.max(wait)),
                state: Mutex::new(DebounceState::default()),
                timer: Timer::new(),
            }),
        }
    }

    /// Throttle: at most one call per `interval`, firing on the edges `options` enables
    #[must_use]
    pub fn throttle(interval: Duration, options: ThrottleOptions) -> Self {
        Self::new(
            interval,
            DebounceOptions {
                leading: options.leading,
                trailing: options.trailing,
                max_wait: Some(interval),
            },
        )
    }

    /// Submit a call; it replaces any call still pending in the current window
    ///
    /// A replaced call is dropped without running.
    pub fn call<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = &self.inner;
        let now = Instant::now();
        let run_now = {
            let mut state = inner.lock();
            let invoking = inner.should_invoke(&state, now);
            state.pending = Some(Box::new(job));
            state.last_call = Some(now);

            if invoking && !state.timer_armed {
                state.last_invoke = Some(now);
                inner.arm(&mut state, inner.wait);
                if inner.leading {
                    state.pending.take()
                } else {
                    None
                }
            } else if invoking && inner.max_wait.is_some() {
                inner.arm(&mut state, inner.wait);
                state.last_invoke = Some(now);
                state.pending.take()
            } else {
                if !state.timer_armed {
                    inner.arm(&mut state, inner.wait);
                }
                None
            }
        };
        if let Some(job) = run_now {
            job();
        }
    }

    /// Drop the pending call and reset the window
    pub fn cancel(&self) {
        self.inner.timer.clear();
        let dropped = std::mem::take(&mut *self.inner.lock());
        drop(dropped);
    }

    /// Check if a call is waiting for its trailing edge
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.lock().pending.is_some()
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("wait", &self.inner.wait)
            .field("leading", &self.inner.leading)
            .field("trailing", &self.inner.trailing)
            .field("max_wait", &self.inner.max_wait)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Job) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |value: u32| -> Job {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().unwrap().push(value))
        };
        (log, make)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_limiter_once_per_window() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let limited = LeadingLimiter::wrap(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        limited();
        limited();
        advance(50).await;
        limited();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        advance(60).await;
        limited();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_burst_into_trailing_call() {
        let (log, job) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(100), DebounceOptions::default());

        for value in 1..=5 {
            debouncer.call(job(value));
            advance(20).await;
        }
        assert!(log.lock().unwrap().is_empty());
        assert!(debouncer.is_pending());

        advance(100).await;
        assert_eq!(*log.lock().unwrap(), vec![5]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_leading_edge() {
        let (log, job) = recorder();
        let debouncer = Debouncer::new(
            Duration::from_millis(100),
            DebounceOptions {
                leading: true,
                trailing: false,
                max_wait: None,
            },
        );
        debouncer.call(job(1));
        debouncer.call(job(2));
        advance(150).await;
        debouncer.call(job(3));
        assert_eq!(*log.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_max_wait_bounds_delay() {
        let (log, job) = recorder();
        let debouncer = Debouncer::new(
            Duration::from_millis(100),
            DebounceOptions {
                leading: false,
                trailing: true,
                max_wait: Some(Duration::from_millis(250)),
            },
        );
        // Continuous triggering every 50ms for 600ms
        for value in 0..12 {
            debouncer.call(job(value));
            advance(50).await;
        }
        let fired = log.lock().unwrap().len();
        assert!(fired >= 2, "max_wait should force invocations, got {fired}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_cancel_drops_pending() {
        let (log, job) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(100), DebounceOptions::default());
        debouncer.call(job(1));
        debouncer.cancel();
        advance(200).await;
        assert!(log.lock().unwrap().is_empty());

        debouncer.call(job(2));
        advance(101).await;
        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_leading_and_trailing() {
        let (log, job) = recorder();
        let throttle = Debouncer::throttle(Duration::from_millis(100), ThrottleOptions::default());

        throttle.call(job(1));
        assert_eq!(*log.lock().unwrap(), vec![1]);
        advance(10).await;
        throttle.call(job(2));
        advance(10).await;
        throttle.call(job(3));
        advance(100).await;
        assert_eq!(*log.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spacing_under_continuous_triggering() {
        let stamps = Arc::new(Mutex::new(Vec::<Instant>::new()));
        let throttle = Debouncer::throttle(Duration::from_millis(100), ThrottleOptions::default());

        for _ in 0..50 {
            let stamps = Arc::clone(&stamps);
            throttle.call(move || stamps.lock().unwrap().push(Instant::now()));
            advance(10).await;
        }
        advance(200).await;

        let stamps = stamps.lock().unwrap();
        assert!(stamps.len() >= 5);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }
}
