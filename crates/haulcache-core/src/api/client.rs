//! API client for communicating with the logistics REST backend.
//!
//! This module provides the `ApiClient` struct, the single entry point every
//! consumer goes through for network reads and writes. It owns the shared
//! response cache and the keep-alive timer, merges default headers, applies
//! per-request timeouts and retries transient failures with backoff.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::CredentialProvider;
use crate::cache::{CacheKey, ResponseCache};
use crate::config::ApiSettings;
use crate::keepalive::KeepAlive;

use super::request::{join_url, ApiRequest, FetchOptions, RetryPolicy};
use super::transport::{HttpTransport, Transport};
use super::ApiError;

/// Handle to the fetch layer.
/// Clone is cheap - all clones share one cache, transport and keep-alive timer.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    settings: ApiSettings,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    cache: ResponseCache,
    keep_alive: KeepAlive,
}

impl ApiClient {
    /// Create a client talking HTTP to `settings.base_url`.
    pub fn new(settings: ApiSettings, credentials: Arc<dyn CredentialProvider>) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new()?);
        Ok(Self::with_transport(settings, transport, credentials))
    }

    /// Create a client over any transport.
    pub fn with_transport(
        settings: ApiSettings,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let cache = ResponseCache::new(settings.cache_ttl());
        let keep_alive = KeepAlive::new(Arc::clone(&transport), &settings);
        Self {
            inner: Arc::new(ClientInner {
                settings,
                transport,
                credentials,
                cache,
                keep_alive,
            }),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    pub fn clear_cache(&self) {
        debug!(entries = self.inner.cache.len(), "Clearing response cache");
        self.inner.cache.clear();
    }

    pub fn has_credential(&self) -> bool {
        self.inner.credentials.token().is_some()
    }

    /// Start the periodic health probe. Only the first call starts a timer;
    /// returns whether this call did.
    pub fn start_keep_alive(&self) -> bool {
        self.inner.keep_alive.ensure_started()
    }

    /// Probe aggressively to wake a sleeping backend, then test once.
    pub async fn wake_up(&self) -> Result<(), ApiError> {
        self.inner.keep_alive.wake_up().await
    }

    pub fn cache_key(&self, path: &str, options: &FetchOptions) -> CacheKey {
        CacheKey::new(path, options)
    }

    /// Resolve path and options into a request with merged headers.
    /// Overrides win over `Content-Type` and `Authorization`.
    pub fn build_request(&self, path: &str, options: &FetchOptions) -> ApiRequest {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        if let Some(token) = self.inner.credentials.token() {
            headers.insert("authorization".to_string(), format!("Bearer {}", token));
        }
        for (name, value) in &options.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        ApiRequest {
            method: options.method.clone(),
            url: join_url(&self.inner.settings.base_url, path),
            headers,
            body: options.body.clone(),
        }
    }

    pub(crate) fn timeout_for(&self, options: &FetchOptions) -> Duration {
        options
            .timeout
            .unwrap_or_else(|| self.inner.settings.request_timeout())
    }

    pub(crate) fn retry_for(&self, options: &FetchOptions) -> RetryPolicy {
        options
            .retry
            .unwrap_or_else(|| RetryPolicy::retries(self.inner.settings.max_retries))
    }

    /// One-shot fetch not tied to a call-site.
    ///
    /// Serves a fresh cached payload when `options.cache` is set, otherwise
    /// goes to the network and caches a successful result.
    pub async fn fetch(&self, path: &str, options: &FetchOptions) -> Result<Value, ApiError> {
        let key = self.cache_key(path, options);
        if options.cache {
            if let Some(payload) = self.inner.cache.get(&key) {
                return Ok(payload);
            }
        }

        let epoch = self.inner.cache.epoch();
        let request = self.build_request(path, options);
        let payload = self
            .execute(&request, self.timeout_for(options), self.retry_for(options))
            .await?;

        if options.cache {
            self.inner.cache.insert_if_current(key, payload.clone(), epoch);
        }
        Ok(payload)
    }

    /// [`fetch`](Self::fetch) and deserialize the payload.
    pub async fn fetch_json<T: DeserializeOwned>(&self, path: &str, options: &FetchOptions) -> Result<T, ApiError> {
        let payload = self.fetch(path, options).await?;
        serde_json::from_value(payload).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Cached GET with default options.
    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.fetch(path, &FetchOptions::default()).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.fetch(path, &FetchOptions::mutation(Method::POST, Some(body))).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.fetch(path, &FetchOptions::mutation(Method::PUT, Some(body))).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.fetch(path, &FetchOptions::mutation(Method::DELETE, None)).await
    }

    /// Send a request, racing it against `timeout`, retrying retryable
    /// failures with exponential backoff. Never touches the cache.
    pub(crate) async fn execute(
        &self,
        request: &ApiRequest,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Value, ApiError> {
        let mut retries = 0;
        let mut backoff = retry.initial_backoff;

        loop {
            debug!(method = %request.method, url = %request.url, "Sending request");
            let result = match tokio::time::timeout(timeout, self.inner.transport.send(request)).await {
                Ok(Ok(response)) => response.into_json(),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ApiError::Timeout(timeout)),
            };

            match result {
                Err(e) if e.is_retryable() && retries < retry.max_retries => {
                    retries += 1;
                    warn!(
                        url = %request.url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Request failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2); // Exponential backoff
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Request failed");
                    return Err(e);
                }
                Ok(payload) => return Ok(payload),
            }
        }
    }
}
