//! HTTP service adapter.
//!
//! A [`ServiceDescriptor`] names the service an engine binds: a URL, a request spec, a
//! function building a request spec from the parameters, or an arbitrary async function.
//! HTTP variants are executed with `reqwest` and decoded as JSON.
//!
//! # Example
//!
//! ```ignore
//! let service = ServiceDescriptor::<u32>::Thunk(Arc::new(|id| {
//!     RequestSpec::get(format!("https://api.example.com/users/{id}"))
//! }))
//! .into_service(reqwest::Client::new());
//!
//! let engine = Engine::from_service(service, RequestOptions::new(1))?;
//! ```

use crate::options::ServiceFn;
use composable_request_core::{Params, RequestError};
use futures::future::FutureExt;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::Arc;

/// A single HTTP request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    /// Absolute URL
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Query string pairs
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
}

impl RequestSpec {
    /// `GET url`
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// `POST url` with a JSON body
    #[must_use]
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query pair
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// What an engine calls
pub enum ServiceDescriptor<P> {
    /// `GET` this URL, ignoring the parameters
    Url(String),
    /// Send this request, ignoring the parameters
    Request(RequestSpec),
    /// Build the request from the parameters
    Thunk(Arc<dyn Fn(&P) -> RequestSpec + Send + Sync>),
    /// Call this function
    Factory(ServiceFn<P, Value>),
}

impl<P> std::fmt::Debug for ServiceDescriptor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Request(spec) => f.debug_tuple("Request").field(spec).finish(),
            Self::Thunk(_) => f.write_str("Thunk(..)"),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

impl<P> ServiceDescriptor<P>
where
    P: Params,
{
    /// Convert into an engine service, sending HTTP variants through `client`
    #[must_use]
    pub fn into_service(self, client: Client) -> ServiceFn<P, Value> {
        match self {
            Self::Url(url) => {
                let spec = RequestSpec::get(url);
                Arc::new(move |_| execute(client.clone(), spec.clone()).boxed())
            },
            Self::Request(spec) => Arc::new(move |_| execute(client.clone(), spec.clone()).boxed()),
            Self::Thunk(build) => {
                Arc::new(move |params| execute(client.clone(), build(&params)).boxed())
            },
            Self::Factory(service) => service,
        }
    }
}

/// Send `spec` and decode the response body as JSON.
///
/// # Errors
///
/// - [`RequestError::Transport`] if the request could not be sent or the body not read
/// - [`RequestError::Http`] if the response status is 400 or above
/// - [`RequestError::Decode`] if the body is not valid JSON
pub async fn execute(client: Client, spec: RequestSpec) -> Result<Value, RequestError> {
    let mut request = client
        .request(spec.method.clone(), &spec.url)
        .header(ACCEPT, HeaderValue::from_static("application/json"));
    for (name, value) in &spec.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if !spec.query.is_empty() {
        request = request.query(&spec.query);
    }
    if let Some(body) = &spec.body {
        request = request
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body.to_string());
    }

    tracing::debug!(method = %spec.method, url = %spec.url, "Sending request");
    let response = request
        .send()
        .await
        .map_err(|e| RequestError::Transport(e.to_string()))?;

    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(RequestError::Http {
            status: status.as_u16(),
            url: spec.url,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| RequestError::Transport(e.to_string()))?;
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&body).map_err(|e| RequestError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_spec_builders() {
        let spec = RequestSpec::post("http://localhost/users", json!({"name": "ada"}))
            .with_header("x-trace", "1")
            .with_query("page", "2");
        assert_eq!(spec.method, Method::POST);
        assert_eq!(spec.headers, vec![("x-trace".to_string(), "1".to_string())]);
        assert_eq!(spec.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(spec.body, Some(json!({"name": "ada"})));
    }

    #[tokio::test]
    async fn test_factory_passes_through() {
        let service = ServiceDescriptor::<u32>::Factory(Arc::new(|n: u32| {
            async move { Ok(json!({ "n": n })) }.boxed()
        }))
        .into_service(Client::new());
        assert_eq!(service(4).await.ok(), Some(json!({ "n": 4 })));
    }
}
