//! Error taxonomy.
//!
//! - [`RequestError`]: the outcome of a failed invocation. It is cloneable because the same
//!   failure is stored in engine state, handed to plugins and user callbacks, and shared by
//!   every caller awaiting a deduplicated in-flight request.
//! - [`ConfigError`]: unsupported option combinations, reported when an engine is built.
//!
//! A superseded (stale) completion is not an error and has no variant here.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A failed invocation
#[derive(Error, Debug, Clone)]
pub enum RequestError {
    /// The service function failed
    #[error("service failed: {0}")]
    Service(Arc<anyhow::Error>),

    /// The HTTP adapter received an error status
    #[error("HTTP {status} from {url}")]
    Http {
        /// Response status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The HTTP adapter could not reach the server
    #[error("transport failed: {0}")]
    Transport(String),

    /// The response body could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RequestError {
    /// Wrap any error as a service failure
    pub fn service(err: impl Into<anyhow::Error>) -> Self {
        Self::Service(Arc::new(err.into()))
    }

    /// Build a service failure from a message
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Service(Arc::new(anyhow::Error::msg(message)))
    }
}

impl From<anyhow::Error> for RequestError {
    fn from(err: anyhow::Error) -> Self {
        Self::Service(Arc::new(err))
    }
}

/// Unsupported configuration, reported at setup time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Only one half of a custom cache store was supplied
    #[error("custom cache getter and setter must be supplied together")]
    IncompleteCacheStore,

    /// Both rate limiters wrap the run path; only one may be active
    #[error("debounce and throttle cannot be combined on one request")]
    DebounceWithThrottle,

    /// A fixed cache key was empty
    #[error("cache key must not be empty")]
    EmptyCacheKey,

    /// `max_wait` would fire before the debounce interval could elapse
    #[error("max_wait {max_wait:?} is shorter than the debounce interval {interval:?}")]
    MaxWaitTooShort {
        /// Debounce interval
        interval: Duration,
        /// Requested max wait
        max_wait: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_display() {
        let err = RequestError::msg("boom");
        assert_eq!(err.to_string(), "service failed: boom");
    }

    #[test]
    fn test_from_anyhow() {
        let err: RequestError = anyhow::anyhow!("nope").into();
        assert!(matches!(err, RequestError::Service(_)));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MaxWaitTooShort {
            interval: Duration::from_millis(100),
            max_wait: Duration::from_millis(50),
        };
        assert!(err.to_string().contains("shorter"));
    }
}
