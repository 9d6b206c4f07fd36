//! Backend records the fetch layer itself needs to understand.

pub mod user;

pub use user::{LoginResponse, Role, UserProfile};
