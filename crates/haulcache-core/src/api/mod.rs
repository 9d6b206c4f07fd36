//! REST API client module for the logistics backend.
//!
//! This module provides the `ApiClient` through which every read and write
//! reaches the backend, the `Transport` seam it sends through, and the
//! `ApiError` taxonomy surfaced to call-sites.
//!
//! Authenticated requests carry a bearer token read from the injected
//! `CredentialProvider` on every call.

pub mod client;
pub mod error;
pub mod request;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use request::{ApiRequest, ApiResponse, FetchOptions, RetryPolicy};
pub use transport::{HttpTransport, Transport};
