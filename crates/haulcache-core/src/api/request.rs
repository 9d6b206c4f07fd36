//! Request options, the wire-level request/response pair and retry policy.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use super::ApiError;

/// Initial backoff delay before the first retry.
/// Doubled after every further attempt.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// How many times a retryable failure is attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::none()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Options a call-site passes along with a resource path.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Consult and populate the shared response cache.
    pub cache: bool,
    /// Fetch as soon as a subscription is created.
    pub immediate: bool,
    /// Values whose change forces a refetch.
    pub dependencies: Vec<Value>,
    /// `None` uses the client's configured timeout.
    pub timeout: Option<Duration>,
    pub method: Method,
    pub body: Option<Value>,
    /// Header overrides, merged over the defaults. Names are stored lowercase.
    pub headers: BTreeMap<String, String>,
    /// `None` uses the client's configured retry policy.
    pub retry: Option<RetryPolicy>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache: true,
            immediate: true,
            dependencies: Vec::new(),
            timeout: None,
            method: Method::GET,
            body: None,
            headers: BTreeMap::new(),
            retry: None,
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a write: never cached, never retried, never fetched on subscribe.
    pub fn mutation(method: Method, body: Option<Value>) -> Self {
        Self {
            cache: false,
            immediate: false,
            method,
            body,
            retry: Some(RetryPolicy::none()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Wait for an explicit `fetch()`/`refetch()` instead of loading on subscribe.
    #[must_use]
    pub fn deferred(mut self) -> Self {
        self.immediate = false;
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<Value>) -> Self {
        self.dependencies = dependencies;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// A fully resolved request handed to a [`Transport`](super::Transport).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Raw response as returned by a transport, before status handling.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse a successful body as JSON; non-2xx becomes [`ApiError::Response`].
    /// An empty success body (e.g. 204) parses as `null`.
    pub fn into_json(self) -> Result<Value, ApiError> {
        if !self.is_success() {
            return Err(ApiError::from_status(self.status, &self.status_text, &self.body));
        }
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

/// Join a base URL and a resource path. Absolute URLs pass through untouched.
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
