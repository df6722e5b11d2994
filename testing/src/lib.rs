//! # Composable Request Testing
//!
//! Testing utilities and helpers for composable request controllers.
//!
//! This crate provides:
//! - Deterministic [`Clock`] and [`RandomSource`] implementations
//! - [`MockService`], a scriptable service that records its calls
//! - An isolated test environment and tracing setup
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use composable_request_testing::{test_environment, MockService};
//! use composable_request_runtime::{Engine, RequestOptions};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_user_profile() {
//!     let service = MockService::resolving("ada".to_string());
//!     let engine = Engine::from_service(
//!         service.service(),
//!         RequestOptions::new(1).with_environment(test_environment()),
//!     )?;
//!
//!     let user = engine.run_async(7).await?;
//!     assert_eq!(user.as_deref(), Some("ada"));
//!     assert_eq!(service.calls(), vec![1, 7]);
//! }
//! ```

use chrono::{DateTime, Utc};
use composable_request_core::{Clock, RandomSource};

pub mod mock_service;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, RandomSource, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use composable_request_testing::mocks::FixedClock;
    /// use composable_request_core::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to
    ///
    /// Clones share the same time, so a test can keep one and hand another to the
    /// environment.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move forward by `by`
        pub fn advance(&self, by: Duration) {
            let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time = time.checked_add_signed(by).unwrap_or(*time);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Random source that cycles through a fixed list of samples
    #[derive(Debug)]
    pub struct SequenceRandom {
        samples: Vec<f64>,
        next: AtomicUsize,
    }

    impl SequenceRandom {
        /// Cycle through `samples`; an empty list always yields `0.0`
        #[must_use]
        pub fn new(samples: Vec<f64>) -> Self {
            Self {
                samples,
                next: AtomicUsize::new(0),
            }
        }

        /// Always yield `sample`
        #[must_use]
        pub fn constant(sample: f64) -> Self {
            Self::new(vec![sample])
        }
    }

    impl RandomSource for SequenceRandom {
        fn next_f64(&self) -> f64 {
            if self.samples.is_empty() {
                return 0.0;
            }
            let index = self.next.fetch_add(1, Ordering::SeqCst) % self.samples.len();
            self.samples[index]
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

/// Test helpers and utilities
pub mod helpers {
    use super::mocks::SequenceRandom;
    use composable_request_runtime::RequestEnvironment;
    use std::sync::Arc;
    use std::time::Duration;

    /// An environment that shares nothing with other tests.
    ///
    /// Time follows tokio (so `start_paused` tests control cache ages) and retry jitter
    /// always samples `0.0`, making each backoff exactly its base step.
    #[must_use]
    pub fn test_environment() -> RequestEnvironment {
        RequestEnvironment::isolated().with_random(Arc::new(SequenceRandom::constant(0.0)))
    }

    /// Install a test-friendly tracing subscriber; later calls are no-ops
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Let spawned tasks run, then move paused time forward by `by`
    pub async fn advance(by: Duration) {
        tokio::task::yield_now().await;
        tokio::time::advance(by).await;
        tokio::task::yield_now().await;
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use composable_request_core::RetryCount;
    use proptest::prelude::*;
    use std::time::Duration;

    /// Durations from zero to `max_ms` milliseconds
    pub fn durations(max_ms: u64) -> impl Strategy<Value = Duration> {
        (0..=max_ms).prop_map(Duration::from_millis)
    }

    /// Finite and infinite retry counts
    pub fn retry_counts() -> impl Strategy<Value = RetryCount> {
        prop_oneof![
            (0u32..10).prop_map(RetryCount::Limited),
            Just(RetryCount::Infinite),
        ]
    }

    /// Uniform samples in `[0, 1)`
    pub fn unit_samples() -> impl Strategy<Value = f64> {
        0.0f64..1.0
    }
}

// Re-export commonly used items
pub use helpers::{advance, init_test_tracing, test_environment};
pub use mock_service::MockService;
pub use mocks::{test_clock, FixedClock, ManualClock, SequenceRandom};
