//! Scripted transport and client builders shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ApiClient, ApiError, ApiRequest, ApiResponse, Transport};
use crate::auth::MemoryTokenStore;
use crate::config::ApiSettings;

pub const TEST_BASE_URL: &str = "http://backend.test/api";

/// What the fake backend does for one call.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, Value),
    Status(u16),
    NetworkDown,
    /// Never answers.
    Hang,
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Json(200, body)
    }

    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

/// A backend keyed by request path. Replies queued for a path are consumed
/// in order; the last one is repeated for any further calls.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        let url = format!("{}{}", TEST_BASE_URL, path);
        self.calls.lock().unwrap().iter().filter(|r| r.url == url).count()
    }

    fn next_reply(&self, path: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Status(404)),
            None => Reply::Status(404),
        }
    }
}

async fn play(reply: Reply) -> Result<ApiResponse, ApiError> {
    let mut reply = reply;
    loop {
        match reply {
            Reply::Json(status, body) => {
                return Ok(ApiResponse {
                    status,
                    status_text: String::new(),
                    body: body.to_string(),
                })
            }
            Reply::Status(status) => {
                return Ok(ApiResponse {
                    status,
                    status_text: String::new(),
                    body: String::new(),
                })
            }
            Reply::NetworkDown => return Err(ApiError::Network("connection refused".into())),
            Reply::Hang => std::future::pending::<()>().await,
            Reply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.calls.lock().unwrap().push(request.clone());
        let path = request
            .url
            .strip_prefix(TEST_BASE_URL)
            .unwrap_or(&request.url)
            .to_string();
        let reply = self.next_reply(&path);
        play(reply).await
    }
}

pub fn test_settings() -> ApiSettings {
    ApiSettings {
        base_url: TEST_BASE_URL.to_string(),
        ..ApiSettings::default()
    }
}

/// Client with a stored token.
pub fn test_client(transport: Arc<FakeTransport>) -> ApiClient {
    let tokens = Arc::new(MemoryTokenStore::with_token("test-token"));
    ApiClient::with_transport(test_settings(), transport, tokens)
}

/// Client without any credential.
pub fn anonymous_client(transport: Arc<FakeTransport>) -> ApiClient {
    ApiClient::with_transport(test_settings(), transport, Arc::new(MemoryTokenStore::new()))
}
