//! Retry policy for failed requests.
//!
//! A failed request is re-issued after a delay until the retry budget is spent. Without a
//! fixed interval the delay follows randomized exponential backoff:
//!
//! ```text
//! delay = base * (floor(r * 2^min(attempt, 9)) + 1)      r uniform in [0, 1)
//! ```
//!
//! # Example
//!
//! ```rust
//! use composable_request_core::RetryCount;
//! use composable_request_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .count(RetryCount::Limited(3))
//!     .interval(Duration::from_millis(500))
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(0, 0.7), Duration::from_millis(500));
//! assert!(policy.allows(2));
//! assert!(!policy.allows(3));
//! ```

use composable_request_core::{RandomSource, RetryCount};
use std::time::Duration;

/// Base unit of the randomized backoff
pub const BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Exponent cap of the randomized backoff
pub const BACKOFF_MAX_EXPONENT: u32 = 9;

/// Retry policy configuration.
///
/// # Default Values
///
/// - `count`: disabled (`Limited(0)`)
/// - `interval`: none (randomized backoff)
/// - `base`: 1 second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How many retries are allowed after the first failure
    pub count: RetryCount,
    /// Fixed delay between retries; `None` selects randomized backoff
    pub interval: Option<Duration>,
    /// Unit of the randomized backoff
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: RetryCount::Limited(0),
            interval: None,
            base: BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            count: None,
            interval: None,
            base: None,
        }
    }

    /// Whether retries are enabled at all
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.count.is_enabled()
    }

    /// Whether another retry is allowed after `retried` retries already happened
    #[must_use]
    pub const fn allows(&self, retried: u32) -> bool {
        self.count.allows(retried)
    }

    /// Calculate the delay before retry number `attempt` (zero-based).
    ///
    /// `sample` is a uniform random number in `[0, 1)`; it is ignored when a fixed
    /// interval is configured.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32, sample: f64) -> Duration {
        if let Some(interval) = self.interval {
            return interval;
        }
        let exponent = attempt.min(BACKOFF_MAX_EXPONENT);
        let span = f64::from(1_u32 << exponent);
        let sample = sample.clamp(0.0, 1.0 - f64::EPSILON);
        // sample * span < 2^9, so the cast cannot truncate
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let steps = (sample * span).floor() as u32 + 1;
        self.base.saturating_mul(steps)
    }

    /// Delay before retry number `attempt`, drawing the sample from `random`
    #[must_use]
    pub fn next_delay(&self, attempt: u32, random: &dyn RandomSource) -> Duration {
        self.delay_for_attempt(attempt, random.next_f64())
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    count: Option<RetryCount>,
    interval: Option<Duration>,
    base: Option<Duration>,
}

impl RetryPolicyBuilder {
    /// Set the retry budget.
    #[must_use]
    pub const fn count(mut self, count: RetryCount) -> Self {
        self.count = Some(count);
        self
    }

    /// Set a fixed delay between retries.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the unit of the randomized backoff.
    #[must_use]
    pub const fn base(mut self, base: Duration) -> Self {
        self.base = Some(base);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            count: self.count.unwrap_or(RetryCount::Limited(0)),
            interval: self.interval,
            base: self.base.unwrap_or(BACKOFF_BASE),
        }
    }
}
