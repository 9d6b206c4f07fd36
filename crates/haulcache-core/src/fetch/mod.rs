//! Per-call-site resource subscriptions.

pub mod subscription;

pub use subscription::{FetchOutcome, ResourceState, Status, Subscription};
