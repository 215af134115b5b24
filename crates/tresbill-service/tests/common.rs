//! Common test utilities for tresbill integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;

use tresbill_core::VatConfig;
use tresbill_service::{create_router, AppState, ServiceConfig};
use tresbill_store::Store;

/// Webhook secret wired into every harness.
pub const WEBHOOK_SECRET: &str = "whsec-test";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct store handle for seeding and assertions.
    pub store: Arc<Store>,
}

/// Seeded admin credentials.
pub const ADMIN: (&str, &str) = ("billing-ops", "admin-pass-123");
/// Seeded regular user credentials; classifies as private tier.
pub const USER: (&str, &str) = ("acme9", "user-pass-123");

impl TestHarness {
    /// Create a new test harness with a fresh in-memory database and two
    /// seeded accounts.
    pub async fn new() -> Self {
        Self::with_database("sqlite::memory:").await
    }

    /// Like [`TestHarness::new`] but backed by a file in a temp directory,
    /// so the pool runs with multiple connections. The returned guard keeps
    /// the directory alive.
    pub async fn new_on_disk() -> (Self, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let url = format!("sqlite://{}", dir.path().join("tresbill.db").display());
        (Self::with_database(&url).await, dir)
    }

    async fn with_database(url: &str) -> Self {
        let store = Store::connect(url)
            .await
            .expect("Failed to open store")
            .with_vat(VatConfig::default())
            .with_audit_signing("test-audit-secret", "k-test");

        store.seed_default_rates().await.expect("seed rates");
        store
            .create_user(ADMIN.0, ADMIN.1, "admin")
            .await
            .expect("seed admin");
        store
            .create_user(USER.0, USER.1, "user")
            .await
            .expect("seed user");

        let config = ServiceConfig {
            jwt_secret: "test-jwt-secret".into(),
            webhook_secret: Some(WEBHOOK_SECRET.into()),
            audit_secret: Some("test-audit-secret".into()),
            audit_key_id: "k-test".into(),
            ..ServiceConfig::default()
        };

        let store = Arc::new(store);
        let state = AppState::new(Arc::clone(&store), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self { server, store }
    }

    /// Log in through the API and return a bearer header value.
    pub async fn login(&self, username: &str, password: &str) -> String {
        let response = self
            .server
            .post("/auth/login")
            .json(&serde_json::json!({ "username": username, "password": password }))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        format!(
            "Bearer {}",
            body["token"].as_str().expect("token in login response")
        )
    }

    /// Bearer header for the seeded admin.
    pub async fn admin_auth(&self) -> String {
        self.login(ADMIN.0, ADMIN.1).await
    }

    /// Bearer header for the seeded user.
    pub async fn user_auth(&self) -> String {
        self.login(USER.0, USER.1).await
    }
}

/// One scheduler accounting row for receipt fixtures.
#[must_use]
pub fn job_row(user: &str, job_id: &str) -> serde_json::Value {
    serde_json::json!({
        "user": user,
        "job_id": job_id,
        "elapsed": "10:00:00",
        "total_cpu": "00:00:00",
        "req_tres": "cpu=2,mem=4G",
        "state": "COMPLETED",
        "end": "2025-03-10T12:00:00",
    })
}
