//! Metrics for observability and monitoring.
//!
//! Engines and plugins record counters through the `metrics` facade; nothing is exported
//! unless the host installs a recorder. [`install_prometheus`] installs the Prometheus
//! recorder for hosts that want one.
//!
//! | counter | incremented when |
//! |---------|------------------|
//! | `request.invocations` | a run reaches the engine |
//! | `request.success` | a current run succeeds |
//! | `request.error` | a current run fails |
//! | `request.stale_discarded` | a superseded result is dropped |
//! | `request.cancelled` | an engine is cancelled |
//! | `request.cache.hit` | a fresh cache entry answers a run |
//! | `request.cache.stale` | a stale cache entry is shown while revalidating |
//! | `request.cache.dedup` | a run joins an in-flight request |
//! | `request.retry.scheduled` | a retry is scheduled |
//! | `request.polling.scheduled` | a polling refresh is scheduled |
//!
//! # Example
//!
//! ```rust,no_run
//! use composable_request_runtime::metrics::install_prometheus;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_prometheus()?;
//! // ... run requests ...
//! println!("{}", handle.render());
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::counter;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!("request.invocations", "Runs that reached the engine");
    describe_counter!("request.success", "Runs whose successful result was applied");
    describe_counter!("request.error", "Runs whose failure was applied");
    describe_counter!(
        "request.stale_discarded",
        "Results dropped because a newer run or a cancel superseded them"
    );
    describe_counter!("request.cancelled", "Engine cancellations");
    describe_counter!("request.cache.hit", "Runs answered by a fresh cache entry");
    describe_counter!(
        "request.cache.stale",
        "Runs that showed a stale cache entry while revalidating"
    );
    describe_counter!(
        "request.cache.dedup",
        "Runs that joined an in-flight request instead of calling the service"
    );
    describe_counter!("request.retry.scheduled", "Retries scheduled after a failure");
    describe_counter!("request.polling.scheduled", "Polling refreshes scheduled");
}

/// Install the Prometheus recorder and register metric descriptions.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    register_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}
