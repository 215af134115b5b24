//! Payment provider integrations.
//!
//! Providers turn a pending receipt into a hosted checkout and translate
//! incoming webhook deliveries into a common event shape. The service is
//! provider-agnostic: handlers only talk to the [`PaymentProvider`] trait
//! and look providers up by name in the [`ProviderRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ApiError;

pub mod dummy;

pub use dummy::DummyProvider;

/// A created checkout at the provider.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Provider-side payment/session id.
    pub external_payment_id: String,
    /// Hosted checkout URL for the payer.
    pub checkout_url: String,
}

/// A provider webhook delivery, normalized.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Provider-side event id, when present.
    pub external_event_id: Option<String>,
    /// Provider event type string.
    pub event_type: String,
    /// Provider-side payment id the event refers to.
    pub external_payment_id: Option<String>,
    /// Reported amount in cents.
    pub amount_cents: Option<i64>,
    /// Reported currency code.
    pub currency: Option<String>,
    /// Whether the delivery's signature verified.
    pub signature_ok: bool,
}

/// Event types that settle a payment.
pub const SUCCESS_EVENT_TYPES: &[&str] = &[
    "payment.succeeded",
    "charge.succeeded",
    "checkout.session.completed",
];

/// A payment provider integration.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider name used in URLs and stored rows.
    fn name(&self) -> &'static str;

    /// Create a hosted checkout for a payment intent.
    async fn create_checkout(
        &self,
        reference: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<CheckoutSession, ApiError>;

    /// Parse and signature-check a raw webhook delivery.
    ///
    /// Parse failures are errors; signature failures are not. A delivery
    /// that parses but fails verification comes back with
    /// `signature_ok == false` so the caller can still record it.
    fn parse_webhook(
        &self,
        body: &str,
        signature: Option<&str>,
    ) -> Result<WebhookEvent, ApiError>;
}

/// Providers by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    /// Register a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Look a provider up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn PaymentProvider>> {
        self.providers.get(name)
    }
}
