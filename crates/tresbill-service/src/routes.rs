//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{auth, gl, health, payments, rates, receipts};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Maximum concurrent requests for admin GL endpoints. Posting engines
/// serialize on the database anyway, so the limit stays small.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 10;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /formula` - Published pricing (ETag-cached)
/// - `POST /auth/login` - Issue session token
/// - `POST /payments/webhook` - Provider webhooks (signature verification)
///
/// ## Users (JWT auth)
/// - `GET /auth/me` - Current user
/// - `GET /v1/receipts` / `GET /v1/receipts/{id}` - Own receipts
/// - `POST /v1/payments/receipt/{id}/start` - Start checkout
/// - `GET /v1/payments/{id}` - Payment intent status
///
/// ## Admin (JWT auth, admin role)
/// - `POST /formula` - Update tier rates
/// - Receipt lifecycle, tier overrides, user creation
/// - GL operations: accruals, close/reopen, ECL, exports, audit log
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // User-facing API routes
    let api_routes = Router::new()
        // Receipts
        .route("/receipts", get(receipts::list_own))
        .route("/receipts/:id", get(receipts::get_one))
        // Payments
        .route("/payments/receipt/:id/start", post(payments::start_checkout))
        .route("/payments/:id", get(payments::get_payment))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    // Admin routes (role enforced by the AdminUser extractor)
    let admin_routes = Router::new()
        // Users and tiers
        .route("/users", post(auth::create_user))
        .route("/tiers/:username", put(auth::set_tier_override))
        .route("/tiers/:username", delete(auth::clear_tier_override))
        // Receipt lifecycle
        .route("/receipts", get(receipts::admin_list))
        .route("/receipts", post(receipts::admin_create))
        .route("/receipts/:id/paid", post(receipts::admin_mark_paid))
        .route("/receipts/:id/void", post(receipts::admin_void))
        .route("/receipts/:id/revert", post(receipts::admin_revert))
        .route("/invoices/void-month", post(receipts::admin_void_month))
        .route("/receipts/paid.csv", get(receipts::admin_paid_csv))
        // GL operations
        .route("/gl/accruals/:year/:month", post(gl::post_accruals))
        .route("/periods/:year/:month/close", post(gl::close_period))
        .route("/periods/:year/:month/reopen", post(gl::reopen_period))
        .route("/gl/ecl/:year/:month", post(gl::post_ecl))
        .route("/gl/export.csv", get(gl::export_gl_csv))
        .route("/gl/formal-export.zip", get(gl::formal_export))
        .route("/gl/xero/bank.csv", get(gl::xero_bank_csv))
        .route("/gl/xero/sales.csv", get(gl::xero_sales_csv))
        // Audit log
        .route("/audit", get(gl::list_audit))
        .route("/audit/verify", get(gl::verify_audit))
        .route("/audit.csv", get(gl::audit_csv))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // Published pricing
        .route("/formula", get(rates::get_formula))
        .route("/formula", post(rates::set_formula))
        // Auth
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        // API v1 routes
        .nest("/v1", api_routes)
        .nest("/v1/admin", admin_routes)
        // Webhooks (no rate limit - controlled by external services)
        .route("/payments/webhook", post(payments::provider_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
