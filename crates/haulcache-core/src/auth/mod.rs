//! Identity: who is signed in and the token their requests carry.
//!
//! The fetch layer only ever sees a read-only [`CredentialProvider`]. The
//! [`SessionManager`] owns the write side and the stored profile.

pub mod credentials;
pub mod identity;
pub mod session;

pub use credentials::{CredentialProvider, KeyringTokenStore, MemoryTokenStore, TokenStore};
pub use identity::{AuthError, SessionManager};
pub use session::{ProfileStore, StoredProfile};
