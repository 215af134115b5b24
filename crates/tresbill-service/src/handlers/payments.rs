//! Payment checkout and webhook handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use tresbill_store::AuditEvent;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::{client_ip, user_agent};
use crate::providers::SUCCESS_EVENT_TYPES;
use crate::state::AppState;

/// Checkout response.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Payment intent id.
    pub payment_id: i64,
    /// Hosted checkout URL.
    pub checkout_url: String,
    /// Amount locked at intent creation, in cents.
    pub amount_cents: i64,
    /// Currency code.
    pub currency: String,
}

/// Start (or resume) a checkout for a pending receipt.
///
/// An existing pending intent with a checkout attached is reused, so
/// refreshing the pay page never multiplies intents.
pub async fn start_checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(receipt_id): Path<i64>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let receipt = state.store.require_receipt(receipt_id).await?;
    if receipt.username != user.username && !user.is_admin() {
        return Err(ApiError::Forbidden);
    }

    let provider_name = state.config.payment_provider.clone();
    let provider = state
        .providers
        .get(&provider_name)
        .ok_or_else(|| ApiError::Internal(format!("unknown provider: {provider_name}")))?;

    // Resume an open intent rather than stacking new ones.
    if let Some(existing) = state.store.latest_payment_for_receipt(receipt_id).await? {
        if existing.status == "pending" {
            if let (Some(url), Some(_)) = (&existing.checkout_url, &existing.external_payment_id) {
                return Ok(Json(CheckoutResponse {
                    payment_id: existing.id,
                    checkout_url: url.clone(),
                    amount_cents: existing.amount_cents,
                    currency: existing.currency,
                }));
            }
        }
    }

    let (payment_id, amount_cents) = state
        .store
        .create_payment_for_receipt(
            provider.name(),
            receipt_id,
            &receipt.username,
            &state.config.currency,
        )
        .await?;

    let session = provider
        .create_checkout(
            &format!("R{receipt_id}"),
            amount_cents,
            &state.config.currency,
        )
        .await?;
    state
        .store
        .attach_provider_checkout(
            payment_id,
            &session.external_payment_id,
            Some(&session.checkout_url),
            None,
        )
        .await?;

    state
        .store
        .record_audit(
            AuditEvent::new(&user.username, "payment.checkout.started")
                .target(format!("payment:{payment_id}"))
                .extra(json!({
                    "receipt_id": receipt_id,
                    "amount_cents": amount_cents,
                    "provider": provider.name(),
                })),
        )
        .await?;

    Ok(Json(CheckoutResponse {
        payment_id,
        checkout_url: session.checkout_url,
        amount_cents,
        currency: state.config.currency.clone(),
    }))
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
}

/// Handle payment provider webhooks.
///
/// Every parseable delivery is recorded, bad signatures included; only
/// verified success events can settle a payment.
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let provider_name = state.config.payment_provider.clone();
    let provider = state
        .providers
        .get(&provider_name)
        .ok_or_else(|| ApiError::Internal(format!("unknown provider: {provider_name}")))?;

    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok());

    let event = provider.parse_webhook(&body, signature)?;

    tracing::info!(
        provider = provider.name(),
        event_type = %event.event_type,
        event_id = ?event.external_event_id,
        signature_ok = event.signature_ok,
        "Received provider webhook"
    );

    let payment = match &event.external_payment_id {
        Some(ext) => state.store.get_payment_by_external_id(ext).await?,
        None => None,
    };
    state
        .store
        .record_webhook_event(
            provider.name(),
            event.external_event_id.as_deref(),
            &event.event_type,
            &body,
            event.signature_ok,
            payment.as_ref().map(|p| p.id),
        )
        .await?;

    if !event.signature_ok {
        state
            .store
            .record_audit(
                AuditEvent::new("system", "payment.webhook")
                    .blocked("bad_signature")
                    .extra(json!({ "event_type": event.event_type }))
                    .http("POST", "/payments/webhook", Some(client_ip(&headers)), user_agent(&headers)),
            )
            .await?;
        return Err(ApiError::BadRequest("invalid webhook signature".into()));
    }

    if SUCCESS_EVENT_TYPES.contains(&event.event_type.as_str()) {
        let Some(external_payment_id) = event.external_payment_id.as_deref() else {
            return Err(ApiError::BadRequest("missing payment id".into()));
        };
        let amount = event
            .amount_cents
            .ok_or_else(|| ApiError::BadRequest("missing amount".into()))?;
        let currency = event
            .currency
            .as_deref()
            .unwrap_or(&state.config.currency);

        let settled = state
            .store
            .finalize_success_if_amount_matches(
                external_payment_id,
                amount,
                currency,
                provider.name(),
            )
            .await?;

        tracing::info!(
            external_payment_id = %external_payment_id,
            settled,
            "Processed payment success event"
        );
    } else {
        tracing::debug!(event_type = %event.event_type, "Unhandled provider event");
    }

    Ok(Json(WebhookResponse { received: true }))
}

/// Fetch one payment intent. Owners and admins only.
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let payment = state
        .store
        .get_payment(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("payment not found: {id}")))?;
    if payment.username != user.username && !user.is_admin() {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(serde_json::to_value(&payment).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}
