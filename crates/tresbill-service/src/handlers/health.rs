//! Health check handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` when the service can answer.
    pub status: &'static str,
    /// Whether the database answers a ping.
    pub database: bool,
}

/// Health check with a database ping.
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let database = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.store.pool())
        .await
        .is_ok();

    Ok(Json(HealthResponse {
        status: "ok",
        database,
    }))
}
