//! Layered configuration.
//!
//! Every tunable lives in a [`ConfigLayer`] as an `Option`. Layers merge innermost-wins:
//!
//! ```text
//! explicit call options  >  scoped provider layer  >  global layer  >  built-in defaults
//! ```
//!
//! [`ConfigLayer::resolve`] flattens the result into a [`ResolvedConfig`], which is the
//! only thing the engine and its plugins read.

use crate::error::ConfigError;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Default hard-eviction time for cache entries (10 minutes)
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(600);

/// Default minimum gap between focus-triggered refreshes
pub const DEFAULT_REFOCUS_TIMESPAN: Duration = Duration::from_secs(5);

/// A duration that may be unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Expires after the given duration
    Finite(Duration),

    /// Never expires
    Infinite,
}

impl Lifetime {
    /// Build from milliseconds, treating negative values as infinite
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        u64::try_from(millis).map_or(Self::Infinite, |ms| Self::Finite(Duration::from_millis(ms)))
    }

    /// Check if something that is `elapsed` old is still within this lifetime
    #[must_use]
    pub fn covers(self, elapsed: Duration) -> bool {
        match self {
            Self::Finite(limit) => elapsed < limit,
            Self::Infinite => true,
        }
    }

    /// The finite duration, if any
    #[must_use]
    pub const fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Finite(duration) => Some(duration),
            Self::Infinite => None,
        }
    }
}

/// How many times a failed run is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCount {
    /// Retry at most this many times
    Limited(u32),

    /// Retry until a run succeeds or is cancelled
    Infinite,
}

impl RetryCount {
    /// Build from the signed form, treating negative values as infinite
    #[must_use]
    pub fn from_i64(count: i64) -> Self {
        u32::try_from(count).map_or(Self::Infinite, Self::Limited)
    }

    /// Check if retrying is enabled at all
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Limited(0))
    }

    /// Check if another retry is allowed after `retried` retries
    #[must_use]
    pub const fn allows(self, retried: u32) -> bool {
        match self {
            Self::Limited(max) => retried < max,
            Self::Infinite => true,
        }
    }
}

/// Debounce edge options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceOptions {
    /// Fire on the leading edge of a burst
    pub leading: bool,

    /// Fire on the trailing edge of a burst
    pub trailing: bool,

    /// Longest a call may be delayed under continuous triggering
    pub max_wait: Option<Duration>,
}

impl Default for DebounceOptions {
    fn default() -> Self {
        Self {
            leading: false,
            trailing: true,
            max_wait: None,
        }
    }
}

/// Throttle edge options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleOptions {
    /// Fire on the leading edge of a window
    pub leading: bool,

    /// Fire once more at the end of a window that saw extra triggers
    pub trailing: bool,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            leading: true,
            trailing: true,
        }
    }
}

/// One layer of configuration; unset fields fall through to outer layers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    /// Skip the automatic initial run
    pub manual: Option<bool>,
    /// Hard eviction time for cache entries
    pub cache_time: Option<Lifetime>,
    /// Freshness window for cache entries
    pub stale_time: Option<Lifetime>,
    /// Retries after a failure
    pub error_retry_count: Option<RetryCount>,
    /// Fixed retry gap; exponential backoff when unset
    pub error_retry_interval: Option<Duration>,
    /// Debounce window for the run path
    pub debounce_interval: Option<Duration>,
    /// Debounce edge options
    pub debounce_options: Option<DebounceOptions>,
    /// Throttle window for the run path
    pub throttle_interval: Option<Duration>,
    /// Throttle edge options
    pub throttle_options: Option<ThrottleOptions>,
    /// Gap between polling refreshes
    pub polling_interval: Option<Duration>,
    /// Keep polling while the page is hidden
    pub polling_when_hidden: Option<bool>,
    /// Keep polling while offline
    pub polling_when_offline: Option<bool>,
    /// Delay before the loading flag turns on
    pub loading_delay: Option<Duration>,
    /// Minimum time a visible loading flag stays on
    pub loading_keep: Option<Duration>,
    /// Refresh when the window regains focus or becomes visible
    pub refresh_on_window_focus: Option<bool>,
    /// Minimum gap between focus-triggered refreshes
    pub refocus_timespan: Option<Duration>,
}

macro_rules! layer_setters {
    ($($(#[$doc:meta])* $name:ident => $field:ident: $ty:ty;)*) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub const fn $name(mut self, value: $ty) -> Self {
                self.$field = Some(value);
                self
            }
        )*
    };
}

impl ConfigLayer {
    /// Empty layer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    layer_setters! {
        /// Skip the automatic initial run
        with_manual => manual: bool;
        /// Set the cache eviction time
        with_cache_time => cache_time: Lifetime;
        /// Set the cache freshness window
        with_stale_time => stale_time: Lifetime;
        /// Set the retry count
        with_error_retry_count => error_retry_count: RetryCount;
        /// Set a fixed retry gap
        with_error_retry_interval => error_retry_interval: Duration;
        /// Debounce the run path
        with_debounce_interval => debounce_interval: Duration;
        /// Set debounce edge options
        with_debounce_options => debounce_options: DebounceOptions;
        /// Throttle the run path
        with_throttle_interval => throttle_interval: Duration;
        /// Set throttle edge options
        with_throttle_options => throttle_options: ThrottleOptions;
        /// Poll at this interval
        with_polling_interval => polling_interval: Duration;
        /// Keep polling while hidden
        with_polling_when_hidden => polling_when_hidden: bool;
        /// Keep polling while offline
        with_polling_when_offline => polling_when_offline: bool;
        /// Delay the loading flag
        with_loading_delay => loading_delay: Duration;
        /// Keep a visible loading flag on for at least this long
        with_loading_keep => loading_keep: Duration;
        /// Refresh on focus and visibility
        with_refresh_on_window_focus => refresh_on_window_focus: bool;
        /// Set the minimum gap between focus refreshes
        with_refocus_timespan => refocus_timespan: Duration;
    }

    /// Overlay `inner` on this layer; fields set in `inner` win
    #[must_use]
    pub fn merge(&self, inner: &Self) -> Self {
        Self {
            manual: inner.manual.or(self.manual),
            cache_time: inner.cache_time.or(self.cache_time),
            stale_time: inner.stale_time.or(self.stale_time),
            error_retry_count: inner.error_retry_count.or(self.error_retry_count),
            error_retry_interval: inner.error_retry_interval.or(self.error_retry_interval),
            debounce_interval: inner.debounce_interval.or(self.debounce_interval),
            debounce_options: inner.debounce_options.or(self.debounce_options),
            throttle_interval: inner.throttle_interval.or(self.throttle_interval),
            throttle_options: inner.throttle_options.or(self.throttle_options),
            polling_interval: inner.polling_interval.or(self.polling_interval),
            polling_when_hidden: inner.polling_when_hidden.or(self.polling_when_hidden),
            polling_when_offline: inner.polling_when_offline.or(self.polling_when_offline),
            loading_delay: inner.loading_delay.or(self.loading_delay),
            loading_keep: inner.loading_keep.or(self.loading_keep),
            refresh_on_window_focus: inner
                .refresh_on_window_focus
                .or(self.refresh_on_window_focus),
            refocus_timespan: inner.refocus_timespan.or(self.refocus_timespan),
        }
    }

    /// Flatten into a resolved configuration, filling built-in defaults
    #[must_use]
    pub fn resolve(&self) -> ResolvedConfig {
        ResolvedConfig {
            manual: self.manual.unwrap_or(false),
            cache_time: self.cache_time.unwrap_or(Lifetime::Finite(DEFAULT_CACHE_TIME)),
            stale_time: self.stale_time.unwrap_or(Lifetime::Finite(Duration::ZERO)),
            error_retry_count: self.error_retry_count.unwrap_or(RetryCount::Limited(0)),
            error_retry_interval: self.error_retry_interval.filter(|d| !d.is_zero()),
            debounce_interval: self.debounce_interval,
            debounce_options: self.debounce_options.unwrap_or_default(),
            throttle_interval: self.throttle_interval,
            throttle_options: self.throttle_options.unwrap_or_default(),
            polling_interval: self.polling_interval,
            polling_when_hidden: self.polling_when_hidden.unwrap_or(false),
            polling_when_offline: self.polling_when_offline.unwrap_or(false),
            loading_delay: self.loading_delay.filter(|d| !d.is_zero()),
            loading_keep: self.loading_keep.filter(|d| !d.is_zero()),
            refresh_on_window_focus: self.refresh_on_window_focus.unwrap_or(false),
            refocus_timespan: self.refocus_timespan.unwrap_or(DEFAULT_REFOCUS_TIMESPAN),
        }
    }

    /// Resolve `explicit` over an optional scoped layer over the global layer
    #[must_use]
    pub fn layered(explicit: &Self, scope: Option<&Self>) -> ResolvedConfig {
        let mut merged = global_config();
        if let Some(scope) = scope {
            merged = merged.merge(scope);
        }
        merged.merge(explicit).resolve()
    }
}

/// Fully merged configuration with every default applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Skip the automatic initial run
    pub manual: bool,
    /// Hard eviction time for cache entries
    pub cache_time: Lifetime,
    /// Freshness window for cache entries
    pub stale_time: Lifetime,
    /// Retries after a failure
    pub error_retry_count: RetryCount,
    /// Fixed retry gap; exponential backoff when `None`
    pub error_retry_interval: Option<Duration>,
    /// Debounce window, if debouncing
    pub debounce_interval: Option<Duration>,
    /// Debounce edge options
    pub debounce_options: DebounceOptions,
    /// Throttle window, if throttling
    pub throttle_interval: Option<Duration>,
    /// Throttle edge options
    pub throttle_options: ThrottleOptions,
    /// Polling interval, if polling
    pub polling_interval: Option<Duration>,
    /// Keep polling while hidden
    pub polling_when_hidden: bool,
    /// Keep polling while offline
    pub polling_when_offline: bool,
    /// Loading flag delay, if any
    pub loading_delay: Option<Duration>,
    /// Minimum visible loading time, if any
    pub loading_keep: Option<Duration>,
    /// Refresh on focus and visibility
    pub refresh_on_window_focus: bool,
    /// Minimum gap between focus refreshes
    pub refocus_timespan: Duration,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLayer::default().resolve()
    }
}

impl ResolvedConfig {
    /// Reject unsupported option combinations
    ///
    /// # Errors
    ///
    /// - [`ConfigError::DebounceWithThrottle`] if both rate limiters are configured
    /// - [`ConfigError::MaxWaitTooShort`] if `max_wait` is below the debounce interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_interval.is_some() && self.throttle_interval.is_some() {
            return Err(ConfigError::DebounceWithThrottle);
        }
        if let (Some(interval), Some(max_wait)) =
            (self.debounce_interval, self.debounce_options.max_wait)
        {
            if max_wait < interval {
                return Err(ConfigError::MaxWaitTooShort { interval, max_wait });
            }
        }
        Ok(())
    }
}

static GLOBAL_CONFIG: RwLock<Option<ConfigLayer>> = RwLock::new(None);

/// Replace the process-wide configuration layer
pub fn set_global_config(layer: ConfigLayer) {
    *GLOBAL_CONFIG
        .write()
        .unwrap_or_else(PoisonError::into_inner) = Some(layer);
}

/// Current process-wide configuration layer
#[must_use]
pub fn global_config() -> ConfigLayer {
    GLOBAL_CONFIG
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_default()
}

/// Clear the process-wide configuration layer
pub fn reset_global_config() {
    *GLOBAL_CONFIG
        .write()
        .unwrap_or_else(PoisonError::into_inner) = None;
}
