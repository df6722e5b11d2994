//! Shared services an engine runs against.
//!
//! A [`RequestEnvironment`] bundles the clock, the random source, both caches and the host
//! event registry. Engines default to the process-wide [`RequestEnvironment::global`];
//! tests build an [`RequestEnvironment::isolated`] one so nothing leaks between them.

use crate::cache::{PromiseCache, ValueCache};
use crate::listeners::ListenerRegistry;
use chrono::{DateTime, Utc};
use composable_request_core::{Clock, RandomSource};
use std::sync::{Arc, OnceLock};

/// Wall clock that follows tokio's time source
///
/// Anchored to UTC when created and advanced by [`tokio::time::Instant`], so pausing or
/// advancing tokio time in tests moves this clock too.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor_utc: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor a new clock at the current time
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor_utc: Utc::now(),
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.anchor);
        chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|elapsed| self.anchor_utc.checked_add_signed(elapsed))
            .unwrap_or(self.anchor_utc)
    }
}

/// Uniform samples from the thread-local generator
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Services shared by every engine bound to this environment
#[derive(Clone)]
pub struct RequestEnvironment {
    /// Time source for cache timestamps
    pub clock: Arc<dyn Clock>,
    /// Random source for retry backoff
    pub random: Arc<dyn RandomSource>,
    /// Settled values, keyed by cache key
    pub values: ValueCache,
    /// Outstanding requests, keyed by cache key
    pub in_flight: PromiseCache,
    /// Focus, visibility and reconnect events
    pub listeners: ListenerRegistry,
}

impl RequestEnvironment {
    /// The process-wide environment
    #[must_use]
    pub fn global() -> Self {
        static GLOBAL: OnceLock<RequestEnvironment> = OnceLock::new();
        GLOBAL.get_or_init(Self::isolated).clone()
    }

    /// A fresh environment sharing nothing with any other
    #[must_use]
    pub fn isolated() -> Self {
        Self {
            clock: Arc::new(TokioClock::new()),
            random: Arc::new(ThreadRandom),
            values: ValueCache::new(),
            in_flight: PromiseCache::new(),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the random source
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }
}

impl Default for RequestEnvironment {
    fn default() -> Self {
        Self::global()
    }
}

impl std::fmt::Debug for RequestEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEnvironment")
            .field("values", &self.values)
            .field("in_flight", &self.in_flight)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
