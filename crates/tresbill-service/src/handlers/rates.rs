//! Published pricing formula handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use tresbill_core::{canonical_json, RateCard, Tier};
use tresbill_store::AuditEvent;

use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Query string for `GET /formula`.
#[derive(Debug, Deserialize)]
pub struct FormulaQuery {
    /// Tier name; omitted means all tiers.
    #[serde(rename = "type")]
    pub tier: Option<String>,
}

/// Published per-hour rates, with a weak ETag for client caching.
pub async fn get_formula(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FormulaQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let table = state.store.load_rates().await?;

    let body = match query.tier.as_deref() {
        Some(name) => {
            let tier: Tier = name
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("unknown tier: {name}")))?;
            let card = table.for_tier(tier);
            json!({
                "type": tier.to_string(),
                "unit": "per-hour",
                "rates": { "cpu": card.cpu, "gpu": card.gpu, "mem": card.mem },
                "currency": state.config.currency,
            })
        }
        None => {
            let tiers: serde_json::Map<String, Value> = table
                .tiers
                .iter()
                .map(|(name, card)| {
                    (
                        name.clone(),
                        json!({ "cpu": card.cpu, "gpu": card.gpu, "mem": card.mem }),
                    )
                })
                .collect();
            json!({
                "unit": "per-hour",
                "tiers": tiers,
                "currency": state.config.currency,
            })
        }
    };

    let etag = format!(
        "W/\"{}\"",
        hex::encode(Sha256::digest(canonical_json(&body).as_bytes()))
    );

    if headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag)
    {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }

    Ok(([(header::ETAG, etag)], Json(body)).into_response())
}

/// Update one tier's rates (admin).
///
/// The body is checked by hand so malformed numbers come back as plain
/// 400s: `{"type": "gov", "cpu": 3.0, "gpu": 10.0, "mem": 1.0}`.
pub async fn set_formula(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let tier_name = body
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("missing tier type".into()))?;
    let tier: Tier = tier_name
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown tier: {tier_name}")))?;

    let card = RateCard {
        cpu: numeric_field(&body, "cpu")?,
        gpu: numeric_field(&body, "gpu")?,
        mem: numeric_field(&body, "mem")?,
    };

    state.store.save_tier_rates(tier, card.clone()).await?;
    state
        .store
        .record_audit(
            AuditEvent::new(&admin.0.username, "rates.updated")
                .target(format!("tier:{tier}"))
                .extra(json!({ "cpu": card.cpu, "gpu": card.gpu, "mem": card.mem })),
        )
        .await?;

    Ok(Json(json!({
        "type": tier.to_string(),
        "rates": { "cpu": card.cpu, "gpu": card.gpu, "mem": card.mem },
    })))
}

fn numeric_field(body: &Value, key: &str) -> Result<f64, ApiError> {
    let value = body
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| ApiError::BadRequest(format!("{key} must be a number")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(ApiError::BadRequest(format!(
            "{key} must be a non-negative number"
        )));
    }
    Ok(value)
}
