//! Resource fetch and cache layer for the Haulcache logistics backend.
//!
//! Every read and write goes through one [`ApiClient`]. Reads are served
//! from a shared time-bounded cache where possible; each call-site holds a
//! [`Subscription`] that keeps at most one request in flight and never lets
//! an older response overwrite a newer one. Around that sit a keep-alive for
//! a backend that sleeps when idle, a role-based cache warm-up after sign-in,
//! and the session layer owning the bearer token.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod keepalive;
pub mod models;
pub mod preload;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, FetchOptions, RetryPolicy};
pub use auth::{AuthError, CredentialProvider, KeyringTokenStore, ProfileStore, SessionManager, TokenStore};
pub use config::{ApiSettings, Config};
pub use fetch::{FetchOutcome, ResourceState, Status, Subscription};
pub use models::{Role, UserProfile};
pub use preload::{PreloadPlan, PreloadReport};
