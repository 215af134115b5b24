//! Login and user administration handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use tresbill_core::Tier;
use tresbill_store::AuditEvent;

use crate::auth::{issue_token, AdminUser, AuthUser};
use crate::error::ApiError;
use crate::handlers::{client_ip, user_agent};
use crate::state::AppState;

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent requests.
    pub token: String,
    /// Role carried by the token.
    pub role: String,
}

/// Verify credentials and issue a session token.
///
/// Failures count toward the per-(user, ip) throttle; a locked pair gets
/// 429 until the lock expires. Every attempt is audited.
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let ip = client_ip(&headers);
    let ua = user_agent(&headers);
    let username = body.username.trim().to_string();

    let (locked, seconds_left) = state.store.throttle_is_locked(&username, &ip).await?;
    if locked {
        state
            .store
            .record_audit(
                AuditEvent::new(&username, "auth.login")
                    .blocked("locked")
                    .extra(json!({ "seconds_left": seconds_left }))
                    .http("POST", "/auth/login", Some(ip), ua),
            )
            .await?;
        return Err(ApiError::Locked { seconds_left });
    }

    let Some(user) = state.store.verify_password(&username, &body.password).await? else {
        let now_locked = state
            .store
            .throttle_register_failure(
                &username,
                &ip,
                state.config.throttle_window_sec,
                state.config.throttle_max_fails,
                state.config.throttle_lock_sec,
            )
            .await?;
        state
            .store
            .record_audit(
                AuditEvent::new(&username, "auth.login")
                    .outcome("failure")
                    .extra(json!({ "lock_triggered": now_locked }))
                    .http("POST", "/auth/login", Some(ip), ua),
            )
            .await?;
        tracing::info!(username = %username, lock_triggered = now_locked, "Login failed");
        return Err(ApiError::Unauthorized);
    };

    state.store.throttle_reset(&username, &ip).await?;

    let token = issue_token(&state.config, &user.username, &user.role)?;
    state
        .store
        .record_audit(
            AuditEvent::new(&user.username, "auth.login")
                .http("POST", "/auth/login", Some(ip), ua),
        )
        .await?;

    Ok(Json(LoginResponse {
        token,
        role: user.role,
    }))
}

/// Current-user response.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    /// Login name.
    pub username: String,
    /// Role.
    pub role: String,
    /// Resolved pricing tier.
    pub tier: String,
}

/// Who the presented token belongs to.
pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    let tier = state.store.resolve_tier(&user.username).await?;
    Ok(Json(MeResponse {
        username: user.username,
        role: user.role,
        tier: tier.to_string(),
    }))
}

/// Create-user request body.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    /// Login name.
    pub username: String,
    /// Initial password.
    pub password: String,
    /// Role, defaults to `user`.
    #[serde(default)]
    pub role: Option<String>,
}

/// Create-user response.
#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    /// New user id.
    pub id: i64,
    /// Login name.
    pub username: String,
    /// Role.
    pub role: String,
}

/// Create a user account (admin).
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let username = body.username.trim().to_lowercase();
    if username.is_empty() || body.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "username required and password must be at least 8 characters".into(),
        ));
    }
    let role = match body.role.as_deref() {
        None | Some("user") => "user",
        Some("admin") => "admin",
        Some(other) => {
            return Err(ApiError::BadRequest(format!("unknown role: {other}")));
        }
    };

    let id = state.store.create_user(&username, &body.password, role).await?;
    state
        .store
        .record_audit(
            AuditEvent::new(&admin.0.username, "user.created")
                .target(format!("user:{username}"))
                .extra(json!({ "role": role })),
        )
        .await?;

    Ok(Json(CreateUserResponse {
        id,
        username,
        role: role.to_string(),
    }))
}

/// Tier override request body.
#[derive(Debug, Deserialize)]
pub struct TierOverrideRequest {
    /// Tier name: `mu`, `gov`, or `private`.
    pub tier: String,
}

/// Set a pricing-tier override for a username (admin).
pub async fn set_tier_override(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path(username): Path<String>,
    Json(body): Json<TierOverrideRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tier: Tier = body
        .tier
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown tier: {}", body.tier)))?;

    state
        .store
        .upsert_tier_override(&username, tier, &admin.0.username)
        .await?;
    state
        .store
        .record_audit(
            AuditEvent::new(&admin.0.username, "tier.override.set")
                .target(format!("user:{username}"))
                .extra(json!({ "tier": tier.to_string() })),
        )
        .await?;

    Ok(Json(json!({ "username": username, "tier": tier.to_string() })))
}

/// Remove a pricing-tier override (admin).
pub async fn clear_tier_override(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.store.clear_tier_override(&username).await?;
    state
        .store
        .record_audit(
            AuditEvent::new(&admin.0.username, "tier.override.cleared")
                .target(format!("user:{username}"))
                .outcome(if removed { "success" } else { "noop" }),
        )
        .await?;

    Ok(Json(json!({ "username": username, "removed": removed })))
}
