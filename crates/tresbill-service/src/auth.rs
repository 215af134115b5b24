//! Authentication extractors and session tokens.
//!
//! This module provides:
//! - HS256 session JWT issue/verify (`issue_token`, `decode_token`)
//! - `AuthUser` - any authenticated user
//! - `AdminUser` - authenticated user with the `admin` role

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use tresbill_store::AuditEvent;

use crate::config::ServiceConfig;
use crate::error::ApiError;
use crate::state::AppState;

/// Session JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username).
    pub sub: String,
    /// Role, `user` or `admin`.
    pub role: String,
    /// Expiration time (unix seconds).
    pub exp: i64,
    /// Issued at (unix seconds).
    pub iat: i64,
}

/// Issue a session token for a verified user.
///
/// # Errors
///
/// Returns `ApiError::Internal` if signing fails.
pub fn issue_token(config: &ServiceConfig, username: &str, role: &str) -> Result<String, ApiError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: username.to_string(),
        role: role.to_string(),
        exp: now + config.jwt_ttl_hours * 3600,
        iat: now,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
}

/// Decode and validate a session token.
///
/// # Errors
///
/// Returns `ApiError::Unauthorized` on any validation failure.
pub fn decode_token(config: &ServiceConfig, token: &str) -> Result<Claims, ApiError> {
    let validation = Validation::new(Algorithm::HS256);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(data.claims)
}

/// An authenticated user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Login name.
    pub username: String,
    /// Role from the token.
    pub role: String,
}

impl AuthUser {
    /// Whether this user carries the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            // Extract the Authorization header
            let auth_header = parts
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .ok_or(ApiError::Unauthorized)?;

            let token = auth_header
                .strip_prefix("Bearer ")
                .ok_or(ApiError::Unauthorized)?;

            // Allow test tokens in testing only.
            // This bypass is gated behind #[cfg(test)] or the "test-auth" feature
            // to ensure it is never active in production builds.
            #[cfg(any(test, feature = "test-auth"))]
            {
                if let Some(username) = token.strip_prefix("test-token:") {
                    return Ok(AuthUser {
                        username: username.to_string(),
                        role: "user".to_string(),
                    });
                }
                if let Some(username) = token.strip_prefix("test-admin:") {
                    return Ok(AuthUser {
                        username: username.to_string(),
                        role: "admin".to_string(),
                    });
                }
            }

            let claims = decode_token(&state.config, token)?;

            Ok(AuthUser {
                username: claims.sub,
                role: claims.role,
            })
        })
    }
}

/// An authenticated admin. Non-admin tokens are refused with 403 and the
/// attempt is audited.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let user = AuthUser::from_request_parts(parts, state).await?;

            if !user.is_admin() {
                let path = parts.uri.path().to_string();
                if let Err(e) = state
                    .store
                    .record_audit(
                        AuditEvent::new(&user.username, "auth.forbidden")
                            .target(path)
                            .outcome("blocked"),
                    )
                    .await
                {
                    tracing::error!(error = %e, "Failed to audit forbidden access");
                }
                return Err(ApiError::Forbidden);
            }

            Ok(AdminUser(user))
        })
    }
}
