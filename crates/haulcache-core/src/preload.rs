//! Role-driven cache warm-up after sign-in.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, FetchOptions};
use crate::models::{Role, UserProfile};

/// Endpoint returning the signed-in user's profile.
pub const CURRENT_USER_PATH: &str = "/users/me";

/// Which resources to warm for each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadPlan {
    resources: HashMap<Role, Vec<String>>,
}

impl Default for PreloadPlan {
    fn default() -> Self {
        let table: [(Role, &[&str]); 4] = [
            (Role::Customer, &["/shipments/my", "/orders"]),
            (Role::Carrier, &["/shipments/available", "/shipments/my"]),
            (Role::Operator, &["/shipments", "/vehicles"]),
            (Role::Admin, &["/shipments", "/vehicles", "/users", "/pricing"]),
        ];
        let resources = table
            .into_iter()
            .map(|(role, paths)| (role, paths.iter().map(|p| p.to_string()).collect()))
            .collect();
        Self { resources }
    }
}

impl PreloadPlan {
    pub fn empty() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: Role, paths: Vec<String>) -> Self {
        self.resources.insert(role, paths);
        self
    }

    pub fn resources_for(&self, role: Role) -> &[String] {
        self.resources.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreloadReport {
    /// Nobody is signed in, nothing was fetched.
    NoCredential,
    /// The profile lookup failed so the role is unknown.
    RoleUnavailable(ApiError),
    Completed {
        role: Role,
        succeeded: usize,
        failed: usize,
    },
}

impl ApiClient {
    /// Warm the cache with what the signed-in user's dashboard shows first.
    pub async fn preload_critical_data(&self) -> PreloadReport {
        self.preload_with(&PreloadPlan::default()).await
    }

    /// Like [`preload_critical_data`](Self::preload_critical_data) with a custom plan.
    /// Warm-up failures are logged and counted, never returned.
    pub async fn preload_with(&self, plan: &PreloadPlan) -> PreloadReport {
        if !self.has_credential() {
            debug!("No credential, skipping preload");
            return PreloadReport::NoCredential;
        }

        let user: UserProfile = match self.fetch_json(CURRENT_USER_PATH, &FetchOptions::default()).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Could not determine role for preload");
                return PreloadReport::RoleUnavailable(e);
            }
        };

        let paths = plan.resources_for(user.role);
        let results = join_all(paths.iter().map(|path| async move {
            let result = self.fetch(path, &FetchOptions::default()).await;
            if let Err(ref e) = result {
                warn!(path = %path, error = %e, "Failed to preload resource");
            }
            result
        }))
        .await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let failed = results.len() - succeeded;
        info!(role = %user.role, succeeded, failed, "Preload finished");

        PreloadReport::Completed {
            role: user.role,
            succeeded,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{anonymous_client, test_client, FakeTransport, Reply};
    use serde_json::json;

    fn me(role: &str) -> Reply {
        Reply::ok(json!({"id": "u1", "email": "ops@haul.example", "role": role}))
    }

    #[test]
    fn test_default_plan() {
        let plan = PreloadPlan::default();
        assert_eq!(plan.resources_for(Role::Customer), ["/shipments/my", "/orders"]);
        assert_eq!(plan.resources_for(Role::Admin).len(), 4);
        assert!(plan.resources_for(Role::Unknown).is_empty());
    }

    #[tokio::test]
    async fn test_no_credential_means_no_io() {
        let fake = FakeTransport::new();
        let client = anonymous_client(fake.clone());

        assert_eq!(client.preload_critical_data().await, PreloadReport::NoCredential);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let fake = FakeTransport::new();
        fake.on(CURRENT_USER_PATH, me("admin"));
        fake.on("/shipments", Reply::ok(json!([])));
        fake.on("/vehicles", Reply::ok(json!(["truck"])));
        fake.on("/users", Reply::Status(404));
        fake.on("/pricing", Reply::ok(json!({"per_km": 1.1})));
        let client = test_client(fake.clone());

        let report = client.preload_critical_data().await;
        assert_eq!(
            report,
            PreloadReport::Completed {
                role: Role::Admin,
                succeeded: 3,
                failed: 1
            }
        );

        // The warmed entries serve later default reads without network I/O
        let before = fake.calls().len();
        client.get("/vehicles").await.unwrap();
        client.get("/pricing").await.unwrap();
        client.get("/shipments").await.unwrap();
        assert_eq!(fake.calls().len(), before);
        assert!(client.get("/users").await.is_err());
    }

    #[tokio::test]
    async fn test_role_unavailable() {
        let fake = FakeTransport::new();
        fake.on(CURRENT_USER_PATH, Reply::Status(401));
        let client = test_client(fake.clone());

        let report = client.preload_critical_data().await;
        assert!(matches!(report, PreloadReport::RoleUnavailable(ref e) if e.is_unauthorized()));
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_role_fetches_nothing_else() {
        let fake = FakeTransport::new();
        fake.on(CURRENT_USER_PATH, me("dispatcher"));
        let client = test_client(fake.clone());

        let report = client.preload_critical_data().await;
        assert_eq!(
            report,
            PreloadReport::Completed {
                role: Role::Unknown,
                succeeded: 0,
                failed: 0
            }
        );
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_custom_plan() {
        let fake = FakeTransport::new();
        fake.on(CURRENT_USER_PATH, me("carrier"));
        fake.on("/routes/today", Reply::ok(json!([])));
        let client = test_client(fake.clone());
        let plan = PreloadPlan::empty().with_role(Role::Carrier, vec!["/routes/today".to_string()]);

        let report = client.preload_with(&plan).await;
        assert!(matches!(report, PreloadReport::Completed { succeeded: 1, failed: 0, .. }));
        assert_eq!(fake.calls_to("/routes/today"), 1);
    }
}
