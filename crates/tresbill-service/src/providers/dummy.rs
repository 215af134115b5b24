//! Built-in simulated payment provider.
//!
//! The dummy provider issues fake checkout URLs and accepts HMAC-signed
//! webhook deliveries. It exists so the full payment path (intent,
//! checkout, webhook, settlement) can run without an external PSP, both
//! in development and in tests.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::crypto::{constant_time_eq, hmac_sha256_hex};
use crate::error::ApiError;
use crate::providers::{CheckoutSession, PaymentProvider, WebhookEvent};

/// Simulated provider with HMAC-signed webhooks.
#[derive(Debug, Clone)]
pub struct DummyProvider {
    webhook_secret: Option<String>,
}

/// Dummy webhook payload shape.
#[derive(Debug, Deserialize)]
struct DummyWebhook {
    /// Event id.
    id: Option<String>,
    /// Event type, e.g. `payment.succeeded`.
    #[serde(rename = "type")]
    event_type: String,
    /// Event data.
    #[serde(default)]
    data: serde_json::Value,
}

impl DummyProvider {
    /// Create the provider. Without a secret, signature checks are
    /// skipped (development mode).
    #[must_use]
    pub fn new(webhook_secret: Option<String>) -> Self {
        Self { webhook_secret }
    }
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn create_checkout(
        &self,
        reference: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<CheckoutSession, ApiError> {
        let external_payment_id = format!("dummy_pi_{}", Uuid::new_v4().simple());

        tracing::info!(
            reference = %reference,
            external_payment_id = %external_payment_id,
            amount_cents,
            currency = %currency,
            "Dummy checkout created"
        );

        Ok(CheckoutSession {
            checkout_url: format!("https://pay.invalid/checkout/{external_payment_id}"),
            external_payment_id,
        })
    }

    fn parse_webhook(
        &self,
        body: &str,
        signature: Option<&str>,
    ) -> Result<WebhookEvent, ApiError> {
        let signature_ok = match &self.webhook_secret {
            Some(secret) => {
                let expected = hmac_sha256_hex(secret, body);
                signature.is_some_and(|sig| constant_time_eq(&expected, sig))
            }
            None => {
                tracing::warn!("Dummy webhook secret not configured - skipping verification");
                true
            }
        };

        let webhook: DummyWebhook =
            serde_json::from_str(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let object = webhook.data.get("object").cloned().unwrap_or_default();

        Ok(WebhookEvent {
            external_event_id: webhook.id,
            event_type: webhook.event_type,
            external_payment_id: object
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from),
            amount_cents: object.get("amount").and_then(serde_json::Value::as_i64),
            currency: object
                .get("currency")
                .and_then(|v| v.as_str())
                .map(String::from),
            signature_ok,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_body() -> String {
        serde_json::json!({
            "id": "evt_1",
            "type": "payment.succeeded",
            "data": {"object": {"id": "dummy_pi_abc", "amount": 10_700, "currency": "THB"}}
        })
        .to_string()
    }

    #[test]
    fn signed_webhook_verifies() {
        let provider = DummyProvider::new(Some("whsec".into()));
        let body = event_body();
        let sig = hmac_sha256_hex("whsec", &body);

        let event = provider.parse_webhook(&body, Some(&sig)).unwrap();
        assert!(event.signature_ok);
        assert_eq!(event.external_payment_id.as_deref(), Some("dummy_pi_abc"));
        assert_eq!(event.amount_cents, Some(10_700));
    }

    #[test]
    fn bad_signature_still_parses() {
        let provider = DummyProvider::new(Some("whsec".into()));
        let body = event_body();

        let event = provider.parse_webhook(&body, Some("deadbeef")).unwrap();
        assert!(!event.signature_ok);
        assert_eq!(event.event_type, "payment.succeeded");
    }

    #[test]
    fn garbage_body_is_rejected() {
        let provider = DummyProvider::new(None);
        assert!(provider.parse_webhook("not json", None).is_err());
    }
}
