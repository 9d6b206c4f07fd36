//! In-memory response cache.
//!
//! This module provides the `ResponseCache` shared by every call-site of an
//! `ApiClient`. Responses are keyed by path and response-shaping options and
//! are considered stale after 5 minutes by default.

pub mod store;

pub use store::{CacheEntry, CacheKey, ResponseCache};
