//! # Composable Request Core
//!
//! Core traits and types for reactive request-state controllers.
//!
//! A controller (the *engine*, implemented in the runtime crate) binds one asynchronous
//! service function and tracks the lifecycle of invoking it as observable state:
//! `loading`, `data`, `error`, `params` and `status`. Independent behaviours (caching,
//! retry, debounce, polling, ...) are layered on as [`Plugin`]s that observe and modify
//! each invocation without knowing about each other.
//!
//! ## Core Concepts
//!
//! - **[`StateCell`]**: observable cell with synchronous read-after-write visibility
//! - **[`Plugin`]**: lifecycle interceptor with typed hook results
//! - **[`BeforeOutcome`]**: `Proceed` / `Break` / `Return`, first short-circuit wins
//! - **[`RequestError`]**: cloneable failure shared by every observer of a run
//! - **[`ConfigLayer`]**: layered configuration resolved into a [`ResolvedConfig`]
//! - **[`Clock`] / [`RandomSource`]**: injected time and randomness
//!
//! ## Example
//!
//! ```ignore
//! use composable_request_core::{BeforeOutcome, Plugin};
//!
//! struct Gate(bool);
//!
//! impl Plugin<u32, String> for Gate {
//!     fn on_before(&self, _params: &u32) -> BeforeOutcome<String> {
//!         if self.0 { BeforeOutcome::proceed() } else { BeforeOutcome::Break(None) }
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod config;
pub mod environment;
pub mod error;
pub mod plugin;
pub mod state;

pub use config::{
    ConfigLayer, DebounceOptions, Lifetime, ResolvedConfig, RetryCount, ThrottleOptions,
};
pub use environment::{Clock, RandomSource};
pub use error::{ConfigError, RequestError};
pub use plugin::{
    merge_before, BeforeOutcome, Data, Params, Plugin, Query, QueryFuture, RunFuture, Runner,
    StatePatch,
};
pub use state::{watch_changes, QueryState, StateCell, Status};
