//! Process-wide caches shared by engines.
//!
//! - [`ValueCache`]: settled values with per-entry expiry and cross-engine change listeners
//! - [`PromiseCache`]: outstanding requests, for deduplicating concurrent identical calls

mod inflight;
mod value;

pub use inflight::{PromiseCache, SharedQuery};
pub use value::{CacheSubscription, ValueCache};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the cache plugin stores per key
///
/// Serializable so custom cache stores can persist entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<R, P> {
    /// The cached value
    pub data: R,

    /// Parameters that produced the value
    pub params: P,

    /// When the value was cached
    pub timestamp: DateTime<Utc>,
}

impl<R, P> CacheEntry<R, P> {
    /// Time elapsed between caching and `now` (zero if `now` is earlier)
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.timestamp).to_std().unwrap_or_default()
    }
}
