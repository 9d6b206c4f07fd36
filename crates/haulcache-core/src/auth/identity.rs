use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, FetchOptions};
use crate::models::{LoginResponse, UserProfile};
use crate::preload::{PreloadReport, CURRENT_USER_PATH};

use super::credentials::TokenStore;
use super::session::ProfileStore;

const LOGIN_PATH: &str = "/auth/login";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("The server is not responding. Please try again in a minute ({0})")]
    BackendUnreachable(ApiError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Failed to store credentials: {0:#}")]
    Storage(anyhow::Error),
}

impl AuthError {
    fn from_login_failure(error: ApiError) -> Self {
        match error.status() {
            Some(400) | Some(401) => AuthError::InvalidCredentials,
            _ if error.is_connectivity() => AuthError::BackendUnreachable(error),
            _ => AuthError::Api(error),
        }
    }
}

/// Owns the signed-in identity: the bearer token and the session copy of
/// the user's profile.
///
/// The client handed in must read its credential from the same store.
pub struct SessionManager {
    client: ApiClient,
    tokens: Arc<dyn TokenStore>,
    profiles: ProfileStore,
    /// Warm-up started by the last login.
    preload: Mutex<Option<JoinHandle<PreloadReport>>>,
}

impl SessionManager {
    pub fn new(client: ApiClient, tokens: Arc<dyn TokenStore>, profiles: ProfileStore) -> Self {
        Self {
            client,
            tokens,
            profiles,
            preload: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Sign in, waking the backend once if it does not answer.
    ///
    /// On success the cache is warmed in the background for the user's role.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, AuthError> {
        let body = json!({ "email": email, "password": password });

        let response = match self.post_login(&body).await {
            Err(e) if e.is_connectivity() => {
                warn!(error = %e, "Login could not reach the backend, waking it up");
                if let Err(wake_error) = self.client.wake_up().await {
                    return Err(AuthError::BackendUnreachable(wake_error));
                }
                self.post_login(&body).await
            }
            other => other,
        };
        let response = response.map_err(AuthError::from_login_failure)?;

        self.cancel_preload();
        self.client.clear_cache();
        self.tokens
            .store_token(&response.token)
            .map_err(AuthError::Storage)?;
        if let Err(e) = self.profiles.save(&response.user) {
            warn!(error = %e, "Failed to save profile");
        }
        info!(user = %response.user.email, role = %response.user.role, "Login successful");

        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            let report = client.preload_critical_data().await;
            debug!(?report, "Background preload done");
            report
        });
        *self.lock_preload() = Some(handle);

        Ok(response.user)
    }

    /// Wait for the warm-up started by the last login. `None` when there is
    /// none pending or it was cancelled.
    pub async fn finish_preload(&self) -> Option<PreloadReport> {
        let handle = self.lock_preload().take()?;
        handle.await.ok()
    }

    fn cancel_preload(&self) {
        if let Some(handle) = self.lock_preload().take() {
            debug!("Cancelling background preload");
            handle.abort();
        }
    }

    fn lock_preload(&self) -> MutexGuard<'_, Option<JoinHandle<PreloadReport>>> {
        self.preload.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Forget the token, the stored profile and every cached response.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.cancel_preload();
        self.tokens.clear_token().map_err(AuthError::Storage)?;
        if let Err(e) = self.profiles.clear() {
            warn!(error = %e, "Failed to remove stored profile");
        }
        self.client.clear_cache();
        info!("Logged out");
        Ok(())
    }

    /// The profile saved at the last login or refresh, if any.
    pub fn cached_user(&self) -> Option<UserProfile> {
        match self.profiles.load() {
            Ok(stored) => stored.map(|s| s.user),
            Err(e) => {
                warn!(error = %e, "Failed to read stored profile");
                None
            }
        }
    }

    /// Ask the backend who we are, bypassing the cache, and keep the
    /// stored copy in sync.
    pub async fn refresh_profile(&self) -> Result<UserProfile, AuthError> {
        let user: UserProfile = self
            .client
            .fetch_json(CURRENT_USER_PATH, &FetchOptions::default().no_cache())
            .await?;

        if self.cached_user().as_ref() != Some(&user) {
            debug!(user = %user.email, "Stored profile out of date");
            self.profiles.save(&user).map_err(AuthError::Storage)?;
        }
        Ok(user)
    }

    async fn post_login(&self, body: &serde_json::Value) -> Result<LoginResponse, ApiError> {
        let payload = self.client.post(LOGIN_PATH, body.clone()).await?;
        serde_json::from_value(payload).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::{CredentialProvider, MemoryTokenStore};
    use crate::models::Role;
    use crate::testing::{test_settings, FakeTransport, Reply};

    struct Fixture {
        fake: Arc<FakeTransport>,
        tokens: Arc<MemoryTokenStore>,
        session: SessionManager,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let fake = FakeTransport::new();
        let tokens = Arc::new(MemoryTokenStore::new());
        let client = ApiClient::with_transport(test_settings(), fake.clone(), tokens.clone());
        let dir = tempfile::tempdir().unwrap();
        let session = SessionManager::new(client, tokens.clone(), ProfileStore::new(dir.path().to_path_buf()));
        Fixture {
            fake,
            tokens,
            session,
            _dir: dir,
        }
    }

    fn user_json(role: &str) -> serde_json::Value {
        json!({"id": "u-1", "name": "Ada Freight", "email": "ada@haul.example", "role": role})
    }

    fn login_ok() -> Reply {
        Reply::ok(json!({"token": "t-abc", "user": user_json("customer")}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_stores_token_and_profile() {
        let f = fixture();
        f.fake.on(LOGIN_PATH, login_ok());
        f.fake.on(CURRENT_USER_PATH, Reply::ok(user_json("customer")));

        let user = f.session.login("ada@haul.example", "hunter2").await.unwrap();
        assert_eq!(user.role, Role::Customer);
        assert_eq!(f.tokens.token().as_deref(), Some("t-abc"));
        assert_eq!(f.session.cached_user(), Some(user));

        let login = &f.fake.calls()[0];
        assert_eq!(login.body, Some(json!({"email": "ada@haul.example", "password": "hunter2"})));

        // Background preload runs with the new token
        tokio::time::sleep(Duration::from_secs(1)).await;
        let me = f.fake.calls().into_iter().find(|c| c.url.ends_with(CURRENT_USER_PATH)).unwrap();
        assert_eq!(me.header("authorization"), Some("Bearer t-abc"));
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let f = fixture();
        f.fake.on(LOGIN_PATH, Reply::Status(401));

        let err = f.session.login("ada@haul.example", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(f.tokens.token(), None);
        assert_eq!(f.session.cached_user(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_wakes_backend_and_retries_once() {
        let f = fixture();
        f.fake.on(LOGIN_PATH, Reply::NetworkDown);
        f.fake.on(LOGIN_PATH, login_ok());
        f.fake.on("/health", Reply::Status(200));

        f.session.login("ada@haul.example", "hunter2").await.unwrap();
        assert_eq!(f.fake.calls_to(LOGIN_PATH), 2);
        assert_eq!(f.fake.calls_to("/health"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_gives_up_when_backend_stays_down() {
        let f = fixture();
        f.fake.on(LOGIN_PATH, Reply::Status(503));
        f.fake.on("/health", Reply::NetworkDown);

        let err = f.session.login("ada@haul.example", "hunter2").await.unwrap_err();
        assert!(matches!(err, AuthError::BackendUnreachable(ApiError::Network(_))));
        assert_eq!(f.fake.calls_to(LOGIN_PATH), 1);
        assert_eq!(f.tokens.token(), None);
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let f = fixture();
        f.fake.on(LOGIN_PATH, login_ok());
        f.fake.on("/orders", Reply::ok(json!([])));
        f.session.login("ada@haul.example", "hunter2").await.unwrap();
        f.session.client().get("/orders").await.unwrap();
        assert!(!f.session.client().cache().is_empty());

        f.session.logout().unwrap();
        assert_eq!(f.tokens.token(), None);
        assert_eq!(f.session.cached_user(), None);
        assert!(f.session.client().cache().is_empty());
        assert!(!f.session.client().has_credential());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_preload_leaves_no_cached_data() {
        let f = fixture();
        f.fake.on(LOGIN_PATH, login_ok());
        f.fake.on(CURRENT_USER_PATH, Reply::ok(user_json("customer")));
        f.fake.on(
            "/shipments/my",
            Reply::delayed(Duration::from_millis(200), Reply::ok(json!(["private-of-ada"]))),
        );
        f.fake.on("/orders", Reply::ok(json!([])));

        f.session.login("ada@haul.example", "hunter2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.session.logout().unwrap();
        assert!(f.session.client().cache().is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.session.client().cache().is_empty());
        assert_eq!(f.session.finish_preload().await, None);

        let before = f.fake.calls_to("/shipments/my");
        f.session.client().get("/shipments/my").await.unwrap();
        assert_eq!(f.fake.calls_to("/shipments/my"), before + 1);
    }

    #[tokio::test]
    async fn test_finish_preload_reports_warm_up() {
        let f = fixture();
        f.fake.on(LOGIN_PATH, login_ok());
        f.fake.on(CURRENT_USER_PATH, Reply::ok(user_json("customer")));
        f.fake.on("/shipments/my", Reply::ok(json!([])));
        f.fake.on("/orders", Reply::ok(json!([])));

        f.session.login("ada@haul.example", "hunter2").await.unwrap();
        let report = f.session.finish_preload().await;
        assert_eq!(
            report,
            Some(PreloadReport::Completed {
                role: Role::Customer,
                succeeded: 2,
                failed: 0
            })
        );
        assert_eq!(f.session.finish_preload().await, None);
    }

    #[tokio::test]
    async fn test_refresh_profile_updates_stored_copy() {
        let f = fixture();
        f.tokens.store_token("t-abc").unwrap();
        f.fake.on(CURRENT_USER_PATH, Reply::ok(user_json("carrier")));
        f.fake.on(CURRENT_USER_PATH, Reply::ok(user_json("admin")));

        let first = f.session.refresh_profile().await.unwrap();
        assert_eq!(first.role, Role::Carrier);
        let second = f.session.refresh_profile().await.unwrap();
        assert_eq!(second.role, Role::Admin);

        assert_eq!(f.session.cached_user().map(|u| u.role), Some(Role::Admin));
        assert_eq!(f.fake.calls_to(CURRENT_USER_PATH), 2);
    }

    #[tokio::test]
    async fn test_refresh_profile_surfaces_api_errors() {
        let f = fixture();
        f.fake.on(CURRENT_USER_PATH, Reply::Status(401));

        let err = f.session.refresh_profile().await.unwrap_err();
        assert!(matches!(err, AuthError::Api(ref e) if e.is_unauthorized()));
    }
}
