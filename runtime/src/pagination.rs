//! Paginated queries.
//!
//! [`Pagination`] drives one engine whose parameters carry a page position. Every page
//! change re-runs the engine with the previous parameters moved to the new page.

use crate::engine::Engine;
use crate::options::RequestOptions;
use composable_request_core::{ConfigError, Data, Params, RequestError, RunFuture};
use std::future::Future;

/// Parameters that carry a page position
pub trait PageParams: Params {
    /// One-based page number
    fn current(&self) -> u64;

    /// Items per page
    fn page_size(&self) -> u64;

    /// Copy of these parameters moved to another page
    #[must_use]
    fn with_page(&self, current: u64, page_size: u64) -> Self;
}

/// A page of results that knows the total item count
pub trait PagedData: Data {
    /// Total number of items across all pages
    fn total(&self) -> u64;
}

/// Page navigation over one engine
pub struct Pagination<P, R> {
    engine: Engine<P, R>,
}

impl<P, R> Clone for Pagination<P, R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<P, R> Pagination<P, R>
where
    P: PageParams,
    R: PagedData,
{
    /// Bind `service` with page-aware parameters
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the options combine unsupported features.
    pub fn new<F, Fut, E>(service: F, options: RequestOptions<P, R>) -> Result<Self, ConfigError>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<RequestError>,
    {
        Ok(Self {
            engine: Engine::new(service, options)?,
        })
    }

    /// The underlying engine
    #[must_use]
    pub const fn engine(&self) -> &Engine<P, R> {
        &self.engine
    }

    fn base_params(&self) -> P {
        self.engine
            .params()
            .unwrap_or_else(|| self.engine.default_params().clone())
    }

    /// Current one-based page
    #[must_use]
    pub fn current(&self) -> u64 {
        self.base_params().current()
    }

    /// Items per page
    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.base_params().page_size()
    }

    /// Total item count from the last page loaded; zero before any data
    #[must_use]
    pub fn total(&self) -> u64 {
        self.engine.data().map_or(0, |data| data.total())
    }

    /// Number of pages; zero when there is nothing to page through
    #[must_use]
    pub fn total_page(&self) -> u64 {
        let page_size = self.page_size();
        if page_size == 0 {
            return 0;
        }
        self.total().div_ceil(page_size)
    }

    /// Move to `current` and `page_size` and return the run's outcome
    ///
    /// # Errors
    ///
    /// The returned future fails with the service's [`RequestError`].
    pub fn change_pagination_async(&self, current: u64, page_size: u64) -> RunFuture<R> {
        let params = self.base_params().with_page(current, page_size);
        self.engine.run_async(params)
    }

    /// Move to `current` and `page_size`
    pub fn change_pagination(&self, current: u64, page_size: u64) {
        let params = self.base_params().with_page(current, page_size);
        self.engine.run(params);
    }

    /// Move to page `current`
    pub fn change_current(&self, current: u64) {
        self.change_pagination(current, self.page_size());
    }

    /// Change the page size, keeping the current page
    pub fn change_page_size(&self, page_size: u64) {
        self.change_pagination(self.current(), page_size);
    }
}
