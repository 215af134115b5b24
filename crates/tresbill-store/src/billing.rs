//! Receipt lifecycle: create, pay, void, revert.
//!
//! A receipt locks the tier and rates it was priced at. Its line items are
//! keyed by canonical job id, and that key is globally unique: a job that
//! has billed once never bills again unless its receipt is voided.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, Row};

use tresbill_core::{BatchKind, PricedJob};

use crate::audit::AuditEvent;
use crate::error::{Result, StoreError};
use crate::export::csv_row;
use crate::{now_iso, parse_iso, Store};

/// A receipt row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Receipt {
    /// Row id.
    pub id: i64,
    /// Billed username.
    pub username: String,
    /// Service window start.
    pub start_ts: String,
    /// Service window end.
    pub end_ts: String,
    /// VAT-inclusive total in cents.
    pub total_cents: i64,
    /// `pending`, `paid`, or `void`.
    pub status: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Settlement timestamp, when paid.
    pub paid_at: Option<String>,
    /// How it was settled (`auto:<provider>` or the marking admin).
    pub method: Option<String>,
    /// Provider payment reference, for provider settlements.
    pub tx_ref: Option<String>,
    /// Tier locked at creation.
    pub pricing_tier: Option<String>,
    /// CPU rate locked at creation.
    pub rate_cpu: Option<f64>,
    /// GPU rate locked at creation.
    pub rate_gpu: Option<f64>,
    /// Memory rate locked at creation.
    pub rate_mem: Option<f64>,
    /// When the rates were locked.
    pub rates_locked_at: Option<String>,
}

/// A receipt line item.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReceiptItem {
    /// Owning receipt.
    pub receipt_id: i64,
    /// Canonical job id; globally unique across all receipts.
    pub job_key: String,
    /// Billed CPU core-hours.
    pub cpu_core_hours: f64,
    /// Billed GPU-hours.
    pub gpu_hours: f64,
    /// Billed memory GB-hours.
    pub mem_gb_hours: f64,
    /// Line cost in cents.
    pub cost_cents: i64,
    /// Final scheduler state.
    pub state: Option<String>,
    /// Job end timestamp.
    pub end_ts: Option<String>,
}

impl Store {
    /// Create a receipt from priced rows.
    ///
    /// Rows for other usernames are ignored. Rows whose `job_key` already
    /// exists on any receipt are silently skipped; the receipt total is
    /// the sum of the rows actually inserted. A receipt with zero inserted
    /// rows is created anyway with a zero total.
    ///
    /// Returns `(receipt_id, total_cents, inserted_items)`.
    ///
    /// # Errors
    ///
    /// Returns a database error if the transaction fails.
    pub async fn create_receipt_from_rows(
        &self,
        username: &str,
        start: &str,
        end: &str,
        rows: &[PricedJob],
        actor: &str,
    ) -> Result<(i64, i64, usize)> {
        let tier = self.resolve_tier(username).await?;
        let card = self.rate_for_tier(tier).await?;
        let now = now_iso();

        let mut tx = self.pool().begin().await?;
        let receipt_id = sqlx::query(
            "INSERT INTO receipts \
             (username, start_ts, end_ts, total_cents, status, created_at, \
              pricing_tier, rate_cpu, rate_gpu, rate_mem, rates_locked_at) \
             VALUES (?, ?, ?, 0, 'pending', ?, ?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(start)
        .bind(end)
        .bind(&now)
        .bind(tier.as_str())
        .bind(card.cpu)
        .bind(card.gpu)
        .bind(card.mem)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let mut total_cents: i64 = 0;
        let mut inserted: usize = 0;
        let mut skipped: usize = 0;
        for row in rows.iter().filter(|r| r.username == username) {
            let result = sqlx::query(
                "INSERT INTO receipt_items \
                 (receipt_id, job_key, cpu_core_hours, gpu_hours, mem_gb_hours, \
                  cost_cents, state, end_ts) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(receipt_id)
            .bind(&row.job_key)
            .bind(row.cpu_core_hours)
            .bind(row.gpu_hours)
            .bind(row.mem_gb_hours)
            .bind(row.cost_cents)
            .bind(&row.state)
            .bind(&row.end)
            .execute(&mut *tx)
            .await;
            match result {
                Ok(_) => {
                    total_cents += row.cost_cents;
                    inserted += 1;
                }
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    // Job already billed somewhere; skip quietly.
                    skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        sqlx::query("UPDATE receipts SET total_cents = ? WHERE id = ?")
            .bind(total_cents)
            .bind(receipt_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            receipt_id,
            username = %username,
            total_cents,
            inserted,
            skipped,
            "receipt created"
        );
        self.record_audit(
            AuditEvent::new(actor, "receipt.created")
                .target(format!("receipt:{receipt_id}"))
                .extra(json!({
                    "username": username,
                    "total_cents": total_cents,
                    "inserted": inserted,
                    "skipped": skipped,
                    "tier": tier.as_str(),
                })),
        )
        .await?;

        Ok((receipt_id, total_cents, inserted))
    }

    /// Every job key that has ever billed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn billed_job_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT job_key FROM receipt_items")
            .fetch_all(self.pool())
            .await?;
        let mut keys = HashSet::with_capacity(rows.len());
        for row in rows {
            keys.insert(row.try_get::<String, _>("job_key")?);
        }
        Ok(keys)
    }

    /// Fetch a receipt.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn get_receipt(&self, receipt_id: i64) -> Result<Option<Receipt>> {
        let receipt = sqlx::query_as::<_, Receipt>("SELECT * FROM receipts WHERE id = ?")
            .bind(receipt_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(receipt)
    }

    /// Fetch a receipt or fail.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if absent.
    pub async fn require_receipt(&self, receipt_id: i64) -> Result<Receipt> {
        self.get_receipt(receipt_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "receipt",
                id: receipt_id.to_string(),
            })
    }

    /// A receipt's line items, ordered by job key.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn get_receipt_items(&self, receipt_id: i64) -> Result<Vec<ReceiptItem>> {
        let items = sqlx::query_as::<_, ReceiptItem>(
            "SELECT * FROM receipt_items WHERE receipt_id = ? ORDER BY job_key",
        )
        .bind(receipt_id)
        .fetch_all(self.pool())
        .await?;
        Ok(items)
    }

    /// A user's receipts, newest first.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn list_receipts(&self, username: &str) -> Result<Vec<Receipt>> {
        let rows = sqlx::query_as::<_, Receipt>(
            "SELECT * FROM receipts WHERE username = ? ORDER BY id DESC",
        )
        .bind(username)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// All receipts, optionally filtered by status, newest first.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn admin_list_receipts(&self, status: Option<&str>) -> Result<Vec<Receipt>> {
        let rows = match status {
            Some(s) => {
                sqlx::query_as::<_, Receipt>(
                    "SELECT * FROM receipts WHERE status = ? ORDER BY id DESC",
                )
                .bind(s)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, Receipt>("SELECT * FROM receipts ORDER BY id DESC")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        Ok(rows)
    }

    /// Low-level paid flip used by provider settlement.
    pub(crate) async fn mark_paid_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        receipt_id: i64,
        method: &str,
        tx_ref: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE receipts SET status = 'paid', paid_at = ?, method = ?, tx_ref = ? \
             WHERE id = ?",
        )
        .bind(now_iso())
        .bind(method)
        .bind(tx_ref)
        .bind(receipt_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Mark a receipt paid by hand.
    ///
    /// Already-paid receipts are a `true` noop; anything not pending
    /// refuses with `false`. The marking admin becomes the `method` and
    /// `tx_ref` stays empty, which distinguishes manual settlements from
    /// provider ones forever.
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails.
    pub async fn mark_receipt_paid(&self, receipt_id: i64, actor: &str) -> Result<bool> {
        let receipt = self.require_receipt(receipt_id).await?;
        match receipt.status.as_str() {
            "paid" => {
                self.record_audit(
                    AuditEvent::new(actor, "receipt.mark_paid")
                        .target(format!("receipt:{receipt_id}"))
                        .outcome("noop"),
                )
                .await?;
                return Ok(true);
            }
            "pending" => {}
            other => {
                self.record_audit(
                    AuditEvent::new(actor, "receipt.mark_paid")
                        .target(format!("receipt:{receipt_id}"))
                        .blocked("not_pending")
                        .extra(json!({"status": other})),
                )
                .await?;
                return Ok(false);
            }
        }

        let mut tx = self.pool().begin().await?;
        Self::mark_paid_in_tx(&mut tx, receipt_id, actor, None).await?;
        tx.commit().await?;

        self.record_audit(
            AuditEvent::new(actor, "receipt.mark_paid")
                .target(format!("receipt:{receipt_id}"))
                .extra(json!({"total_cents": receipt.total_cents})),
        )
        .await?;
        Ok(true)
    }

    /// Void a pending receipt, deleting its items so the jobs can bill
    /// again. Refuses (false) for anything not pending.
    ///
    /// # Errors
    ///
    /// Returns a database error if the transaction fails.
    pub async fn void_receipt(&self, receipt_id: i64, actor: &str) -> Result<bool> {
        let receipt = self.require_receipt(receipt_id).await?;
        if receipt.status != "pending" {
            self.record_audit(
                AuditEvent::new(actor, "receipt.voided")
                    .target(format!("receipt:{receipt_id}"))
                    .blocked("not_pending")
                    .extra(json!({"status": receipt.status})),
            )
            .await?;
            return Ok(false);
        }

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM receipt_items WHERE receipt_id = ?")
            .bind(receipt_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE receipts SET status = 'void' WHERE id = ?")
            .bind(receipt_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.record_audit(
            AuditEvent::new(actor, "receipt.voided")
                .target(format!("receipt:{receipt_id}"))
                .extra(json!({"total_cents": receipt.total_cents})),
        )
        .await?;
        Ok(true)
    }

    /// Undo a manual (or mistaken) settlement: paid back to pending.
    ///
    /// Refuses when a succeeded provider payment exists for the receipt.
    /// Any posted payment batch is reversed into the current open period.
    ///
    /// # Errors
    ///
    /// Returns a database error if the transaction fails.
    pub async fn revert_receipt_to_pending(&self, receipt_id: i64, actor: &str) -> Result<bool> {
        let receipt = self.require_receipt(receipt_id).await?;
        if receipt.status != "paid" {
            self.record_audit(
                AuditEvent::new(actor, "receipt.reverted")
                    .target(format!("receipt:{receipt_id}"))
                    .blocked("not_paid")
                    .extra(json!({"status": receipt.status})),
            )
            .await?;
            return Ok(false);
        }

        let succeeded: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments WHERE receipt_id = ? AND status = 'succeeded'",
        )
        .bind(receipt_id)
        .fetch_one(self.pool())
        .await?;
        if succeeded > 0 {
            self.record_audit(
                AuditEvent::new(actor, "receipt.reverted")
                    .target(format!("receipt:{receipt_id}"))
                    .blocked("provider_settled"),
            )
            .await?;
            return Ok(false);
        }

        let reversed = self
            .reverse_receipt_postings(receipt_id, actor, &[BatchKind::Payment])
            .await?;

        sqlx::query(
            "UPDATE receipts SET status = 'pending', paid_at = NULL, method = NULL, \
             tx_ref = NULL WHERE id = ?",
        )
        .bind(receipt_id)
        .execute(self.pool())
        .await?;

        self.record_audit(
            AuditEvent::new(actor, "receipt.reverted")
                .target(format!("receipt:{receipt_id}"))
                .extra(json!({"reversed_batches": reversed})),
        )
        .await?;
        Ok(true)
    }

    /// Void every pending receipt whose service window ends in the given
    /// month. Paid and out-of-month receipts are untouched.
    ///
    /// Returns `(voided, skipped, voided_ids)`.
    ///
    /// # Errors
    ///
    /// Returns a database error if the transaction fails.
    pub async fn bulk_void_pending_for_month(
        &self,
        year: i32,
        month: u32,
        actor: &str,
        reason: &str,
    ) -> Result<(usize, usize, Vec<i64>)> {
        let receipts = self.admin_list_receipts(None).await?;
        let mut voided = Vec::new();
        let mut skipped = 0usize;
        for receipt in receipts {
            let in_month = parse_iso(&receipt.end_ts)
                .map(crate::period_of)
                .is_some_and(|(y, m)| y == year && m == month);
            if !in_month {
                continue;
            }
            if receipt.status == "pending" {
                if self.void_receipt(receipt.id, actor).await? {
                    voided.push(receipt.id);
                } else {
                    skipped += 1;
                }
            } else {
                skipped += 1;
            }
        }

        self.record_audit(
            AuditEvent::new(actor, "receipt.bulk_void")
                .target(format!("period:{year}-{month:02}"))
                .extra(json!({
                    "reason": reason,
                    "voided": voided.len(),
                    "skipped": skipped,
                    "ids": voided,
                })),
        )
        .await?;
        Ok((voided.len(), skipped, voided))
    }

    /// Paid receipts as CSV, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn paid_receipts_csv(&self) -> Result<String> {
        let rows = sqlx::query_as::<_, Receipt>(
            "SELECT * FROM receipts WHERE status = 'paid' ORDER BY id ASC",
        )
        .fetch_all(self.pool())
        .await?;
        let mut out =
            String::from("id,username,start,end,total_THB,status,created_at,paid_at\n");
        for r in rows {
            out.push_str(&csv_row(&[
                r.id.to_string(),
                r.username,
                r.start_ts,
                r.end_ts,
                tresbill_core::format_cents(r.total_cents),
                r.status,
                r.created_at,
                r.paid_at.unwrap_or_default(),
            ]));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;
    use tresbill_core::Tier;

    pub(crate) fn priced(username: &str, job_key: &str, cost_cents: i64) -> PricedJob {
        PricedJob {
            username: username.into(),
            job_key: job_key.into(),
            cpu_core_hours: 1.0,
            gpu_hours: 0.0,
            mem_gb_hours: 0.0,
            tier: Tier::Private,
            cost_cents,
            state: "COMPLETED".into(),
            end: "2025-03-10T12:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_job_keys_skip_and_total_reflects_inserted() {
        let store = test_store().await;
        let rows = vec![priced("acme", "j1", 1000), priced("acme", "j2", 2500)];
        let (r1, total1, inserted1) = store
            .create_receipt_from_rows("acme", "2025-03-01", "2025-03-31", &rows, "admin")
            .await
            .unwrap();
        assert_eq!(total1, 3500);
        assert_eq!(inserted1, 2);

        // Same rows again plus one new: only the new one lands.
        let rows2 = vec![
            priced("acme", "j1", 1000),
            priced("acme", "j2", 2500),
            priced("acme", "j3", 700),
        ];
        let (r2, total2, inserted2) = store
            .create_receipt_from_rows("acme", "2025-03-01", "2025-03-31", &rows2, "admin")
            .await
            .unwrap();
        assert_ne!(r1, r2);
        assert_eq!(total2, 700);
        assert_eq!(inserted2, 1);

        let billed = store.billed_job_ids().await.unwrap();
        assert_eq!(billed.len(), 3);
        assert!(billed.contains("j3"));
    }

    #[tokio::test]
    async fn mark_paid_is_idempotent_and_void_refuses() {
        let store = test_store().await;
        let (id, _, _) = store
            .create_receipt_from_rows(
                "acme",
                "2025-03-01",
                "2025-03-31",
                &[priced("acme", "j1", 1000)],
                "admin",
            )
            .await
            .unwrap();

        assert!(store.mark_receipt_paid(id, "admin").await.unwrap());
        // Second call is a noop success, not a double settlement.
        assert!(store.mark_receipt_paid(id, "admin").await.unwrap());
        let receipt = store.require_receipt(id).await.unwrap();
        assert_eq!(receipt.status, "paid");
        assert_eq!(receipt.method.as_deref(), Some("admin"));
        assert!(receipt.tx_ref.is_none());

        // Paid receipts cannot be voided.
        assert!(!store.void_receipt(id, "admin").await.unwrap());
    }

    #[tokio::test]
    async fn voiding_frees_job_keys() {
        let store = test_store().await;
        let (id, _, _) = store
            .create_receipt_from_rows(
                "acme",
                "2025-03-01",
                "2025-03-31",
                &[priced("acme", "j1", 1000)],
                "admin",
            )
            .await
            .unwrap();
        assert!(store.void_receipt(id, "admin").await.unwrap());

        let (_, total, inserted) = store
            .create_receipt_from_rows(
                "acme",
                "2025-03-01",
                "2025-03-31",
                &[priced("acme", "j1", 1000)],
                "admin",
            )
            .await
            .unwrap();
        assert_eq!(total, 1000);
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn revert_clears_settlement_fields() {
        let store = test_store().await;
        let (id, _, _) = store
            .create_receipt_from_rows(
                "acme",
                "2025-03-01",
                "2025-03-31",
                &[priced("acme", "j1", 1000)],
                "admin",
            )
            .await
            .unwrap();
        store.mark_receipt_paid(id, "admin").await.unwrap();
        assert!(store.revert_receipt_to_pending(id, "admin").await.unwrap());

        let receipt = store.require_receipt(id).await.unwrap();
        assert_eq!(receipt.status, "pending");
        assert!(receipt.paid_at.is_none());
        assert!(receipt.method.is_none());
    }

    #[tokio::test]
    async fn bulk_void_spares_paid_and_other_months() {
        let store = test_store().await;
        let (pending, _, _) = store
            .create_receipt_from_rows(
                "acme",
                "2025-03-01",
                "2025-03-31T23:59:59Z",
                &[priced("acme", "j1", 1000)],
                "admin",
            )
            .await
            .unwrap();
        let (paid, _, _) = store
            .create_receipt_from_rows(
                "acme",
                "2025-03-01",
                "2025-03-31T23:59:59Z",
                &[priced("acme", "j2", 2000)],
                "admin",
            )
            .await
            .unwrap();
        store.mark_receipt_paid(paid, "admin").await.unwrap();
        let (other_month, _, _) = store
            .create_receipt_from_rows(
                "acme",
                "2025-04-01",
                "2025-04-30T23:59:59Z",
                &[priced("acme", "j3", 3000)],
                "admin",
            )
            .await
            .unwrap();

        let (voided, skipped, ids) = store
            .bulk_void_pending_for_month(2025, 3, "admin", "reprice")
            .await
            .unwrap();
        assert_eq!(voided, 1);
        assert_eq!(skipped, 1);
        assert_eq!(ids, vec![pending]);
        assert_eq!(
            store.require_receipt(other_month).await.unwrap().status,
            "pending"
        );
    }
}
