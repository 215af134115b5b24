//! HTTP request handlers.

pub mod auth;
pub mod gl;
pub mod health;
pub mod payments;
pub mod rates;
pub mod receipts;

use axum::http::HeaderMap;

/// Best-effort client IP from proxy headers.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map_or_else(|| "local".to_string(), |ip| ip.trim().to_string())
}

/// Client user-agent, when sent.
pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
