//! Payment intents and provider webhook events.
//!
//! A payment snapshots the receipt total at creation; settlement later
//! succeeds only if the provider reports exactly that amount in exactly
//! that currency. Webhook events are always recorded, bad signatures
//! included, and dedup on `(provider, external_event_id)`.

use serde::Serialize;
use serde_json::json;
use sqlx::FromRow;

use crate::audit::AuditEvent;
use crate::error::{Result, StoreError};
use crate::{now_iso, Store};

/// A payment intent.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payment {
    /// Row id.
    pub id: i64,
    /// The receipt being settled.
    pub receipt_id: i64,
    /// Receipt owner at creation time.
    pub username: String,
    /// Provider name, e.g. `dummy`.
    pub provider: String,
    /// Amount snapshot in cents; must match the provider's report exactly.
    pub amount_cents: i64,
    /// Expected settlement currency.
    pub currency: String,
    /// `pending`, `succeeded`, or `failed`.
    pub status: String,
    /// Provider-side payment/session id.
    pub external_payment_id: Option<String>,
    /// Provider checkout URL handed to the user.
    pub checkout_url: Option<String>,
    /// Idempotency key sent to the provider.
    pub idempotency_key: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: Option<String>,
}

/// A recorded webhook event.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentEvent {
    /// Row id.
    pub id: i64,
    /// Provider name.
    pub provider: String,
    /// Provider-side event id; dedup key together with the provider.
    pub external_event_id: Option<String>,
    /// Provider event type.
    pub event_type: Option<String>,
    /// Matched payment, when one was found.
    pub payment_id: Option<i64>,
    /// Whether the signature verified (0/1).
    pub signature_ok: i64,
    /// Raw request body as received.
    pub raw_payload: Option<String>,
    /// Receipt timestamp.
    pub received_at: String,
}

impl Store {
    /// Create a payment intent for a pending receipt.
    ///
    /// Returns `(payment_id, amount_cents)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidState`] unless the receipt is pending.
    pub async fn create_payment_for_receipt(
        &self,
        provider: &str,
        receipt_id: i64,
        username: &str,
        currency: &str,
    ) -> Result<(i64, i64)> {
        let receipt = self.require_receipt(receipt_id).await?;
        if receipt.status != "pending" {
            return Err(StoreError::InvalidState(format!(
                "receipt {receipt_id} is {}, not pending",
                receipt.status
            )));
        }
        if receipt.username != username {
            return Err(StoreError::InvalidState(format!(
                "receipt {receipt_id} does not belong to {username}"
            )));
        }

        let payment_id = sqlx::query(
            "INSERT INTO payments \
             (receipt_id, username, provider, amount_cents, currency, status, created_at) \
             VALUES (?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(receipt_id)
        .bind(username)
        .bind(provider)
        .bind(receipt.total_cents)
        .bind(currency)
        .bind(now_iso())
        .execute(self.pool())
        .await?
        .last_insert_rowid();

        tracing::info!(payment_id, receipt_id, provider = %provider, "payment created");
        Ok((payment_id, receipt.total_cents))
    }

    /// Attach the provider's checkout session to a payment.
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails.
    pub async fn attach_provider_checkout(
        &self,
        payment_id: i64,
        external_payment_id: &str,
        checkout_url: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE payments SET external_payment_id = ?, checkout_url = ?, \
             idempotency_key = ?, updated_at = ? WHERE id = ?",
        )
        .bind(external_payment_id)
        .bind(checkout_url)
        .bind(idempotency_key)
        .bind(now_iso())
        .bind(payment_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch a payment.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn get_payment(&self, payment_id: i64) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?")
            .bind(payment_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(payment)
    }

    /// Fetch a payment by its provider-side id.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn get_payment_by_external_id(
        &self,
        external_payment_id: &str,
    ) -> Result<Option<Payment>> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE external_payment_id = ?")
                .bind(external_payment_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(payment)
    }

    /// The most recent payment for a receipt.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn latest_payment_for_receipt(&self, receipt_id: i64) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE receipt_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(receipt_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(payment)
    }

    /// Record a webhook delivery. Always records, bad signatures included.
    /// A duplicate `(provider, external_event_id)` returns the id of the
    /// first recording.
    ///
    /// # Errors
    ///
    /// Returns a database error if the insert fails for any reason other
    /// than the dedup constraint.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_webhook_event(
        &self,
        provider: &str,
        external_event_id: Option<&str>,
        event_type: &str,
        raw_payload: &str,
        signature_ok: bool,
        payment_id: Option<i64>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO payment_events \
             (provider, external_event_id, event_type, payment_id, signature_ok, \
              raw_payload, received_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(provider)
        .bind(external_event_id)
        .bind(event_type)
        .bind(payment_id)
        .bind(i64::from(signature_ok))
        .bind(raw_payload)
        .bind(now_iso())
        .execute(self.pool())
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let existing: i64 = sqlx::query_scalar(
                    "SELECT id FROM payment_events WHERE provider = ? AND external_event_id = ?",
                )
                .bind(provider)
                .bind(external_event_id)
                .fetch_one(self.pool())
                .await?;
                tracing::debug!(event_id = existing, provider = %provider, "webhook replay");
                Ok(existing)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Settle a payment if, and only if, the provider's report matches the
    /// snapshot: same amount in cents and same currency (case-insensitive),
    /// and the receipt still belongs to the payment's user.
    ///
    /// Flips the payment to `succeeded` and the receipt to `paid` in one
    /// transaction. An already-succeeded payment is a `true` noop.
    ///
    /// # Errors
    ///
    /// Returns a database error if the transaction fails.
    pub async fn finalize_success_if_amount_matches(
        &self,
        external_payment_id: &str,
        amount_cents: i64,
        currency: &str,
        provider: &str,
    ) -> Result<bool> {
        let Some(payment) = self.get_payment_by_external_id(external_payment_id).await? else {
            self.record_audit(
                AuditEvent::new("system", "payment.finalize.blocked")
                    .target(format!("external:{external_payment_id}"))
                    .blocked("unknown_payment")
                    .extra(json!({"provider": provider})),
            )
            .await?;
            return Ok(false);
        };
        let target = format!("payment:{}", payment.id);

        if payment.status == "succeeded" {
            return Ok(true);
        }
        if payment.status != "pending" {
            self.record_audit(
                AuditEvent::new("system", "payment.finalize.blocked")
                    .target(target)
                    .blocked("not_pending")
                    .extra(json!({"status": payment.status})),
            )
            .await?;
            return Ok(false);
        }
        if payment.amount_cents != amount_cents
            || !payment.currency.eq_ignore_ascii_case(currency)
        {
            self.record_audit(
                AuditEvent::new("system", "payment.finalize.blocked")
                    .target(target)
                    .blocked("amount_mismatch")
                    .extra(json!({
                        "expected_cents": payment.amount_cents,
                        "reported_cents": amount_cents,
                        "expected_currency": payment.currency,
                        "reported_currency": currency,
                    })),
            )
            .await?;
            return Ok(false);
        }

        let receipt = self.require_receipt(payment.receipt_id).await?;
        if receipt.username != payment.username {
            self.record_audit(
                AuditEvent::new("system", "payment.finalize.blocked")
                    .target(target)
                    .blocked("owner_changed"),
            )
            .await?;
            return Ok(false);
        }

        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE payments SET status = 'succeeded', updated_at = ? WHERE id = ?")
            .bind(now_iso())
            .bind(payment.id)
            .execute(&mut *tx)
            .await?;
        Self::mark_paid_in_tx(
            &mut tx,
            payment.receipt_id,
            &format!("auto:{provider}"),
            Some(external_payment_id),
        )
        .await?;
        tx.commit().await?;

        self.record_audit(
            AuditEvent::new("system", "payment.finalized")
                .target(target)
                .extra(json!({
                    "receipt_id": payment.receipt_id,
                    "amount_cents": amount_cents,
                    "provider": provider,
                })),
        )
        .await?;
        Ok(true)
    }
}
