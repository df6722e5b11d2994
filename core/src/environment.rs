//! Injected dependencies.
//!
//! Time and randomness are abstracted behind traits so cache freshness and retry
//! backoff can be made deterministic in tests.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Test - fixed time for deterministic tests
/// struct FixedClock { time: DateTime<Utc> }
/// impl Clock for FixedClock {
///     fn now(&self) -> DateTime<Utc> {
///         self.time
///     }
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Source of uniform random numbers in `[0, 1)`
pub trait RandomSource: Send + Sync {
    /// Next sample
    fn next_f64(&self) -> f64;
}
