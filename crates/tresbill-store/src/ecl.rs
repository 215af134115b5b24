//! Expected-credit-loss provisioning.
//!
//! At a month end, outstanding receivables and contract assets are aged
//! into buckets, a required allowance is computed from per-bucket rates,
//! and one impairment batch moves the allowance account to that level.
//! Because the batch is sized by the delta against the existing allowance,
//! rerunning on unchanged data is naturally a noop.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::Row;

use tresbill_core::ledger::codes;
use tresbill_core::BatchKind;

use crate::audit::AuditEvent;
use crate::error::Result;
use crate::gl::LineSpec;
use crate::{month_end, parse_iso, to_iso, Store};

/// Loss rates per aging bucket, as fractions of the outstanding amount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EclRates {
    /// Not yet due.
    pub current: f64,
    /// 1-30 days past due.
    pub days_1_30: f64,
    /// 31-60 days past due.
    pub days_31_60: f64,
    /// 61-90 days past due.
    pub days_61_90: f64,
    /// More than 90 days past due.
    pub days_over_90: f64,
}

impl Default for EclRates {
    fn default() -> Self {
        Self {
            current: 0.005,
            days_1_30: 0.01,
            days_31_60: 0.02,
            days_61_90: 0.05,
            days_over_90: 0.20,
        }
    }
}

impl EclRates {
    /// Rate for an age in days past due.
    #[must_use]
    pub fn rate_for_days(&self, days: i64) -> f64 {
        if days <= 0 {
            self.current
        } else if days <= 30 {
            self.days_1_30
        } else if days <= 60 {
            self.days_31_60
        } else if days <= 90 {
            self.days_61_90
        } else {
            self.days_over_90
        }
    }
}

impl Store {
    /// Post the ECL provision movement for a month.
    ///
    /// Returns `true` when the allowance is at the required level after
    /// the call (posted, or already there); `false` when the period is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the computation or posting fails.
    pub async fn post_ecl_provision(
        &self,
        year: i32,
        month: u32,
        actor: &str,
        rates: Option<EclRates>,
        ar_due_days: i64,
    ) -> Result<bool> {
        let target = format!("period:{year}-{month:02}");
        if self.period_is_closed(year, month).await? {
            self.record_audit(
                AuditEvent::new(actor, "gl.ecl.blocked")
                    .target(target)
                    .blocked("period_closed"),
            )
            .await?;
            return Ok(false);
        }
        let Some(asof) = month_end(year, month) else {
            self.record_audit(
                AuditEvent::new(actor, "gl.ecl.blocked")
                    .target(target)
                    .blocked("bad_period"),
            )
            .await?;
            return Ok(false);
        };
        let asof_iso = to_iso(asof);
        let rates = rates.unwrap_or_default();

        let mut required: i64 = 0;

        // Receivables age from their due date.
        for (receipt_id, outstanding) in self
            .outstanding_by_receipt(codes::AR, &asof_iso)
            .await?
        {
            let receipt = self.require_receipt(receipt_id).await?;
            let due = parse_iso(&receipt.created_at)
                .map(|c| c + chrono::Duration::days(ar_due_days));
            let days = due.map_or(0, |d| (asof - d).num_days());
            required += loss_cents(outstanding, rates.rate_for_days(days));
        }

        // Contract assets age from the end of the service they represent.
        for (receipt_id, outstanding) in self
            .outstanding_by_receipt(codes::CONTRACT_ASSET, &asof_iso)
            .await?
        {
            let receipt = self.require_receipt(receipt_id).await?;
            let since = parse_iso(&receipt.end_ts).or_else(|| parse_iso(&receipt.created_at));
            let days = since.map_or(0, |s| (asof - s).num_days());
            required += loss_cents(outstanding, rates.rate_for_days(days));
        }

        let existing: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(e.credit_cents - e.debit_cents), 0) \
             FROM gl_entries e JOIN gl_batches b ON b.id = e.batch_id \
             WHERE e.account_code = ? AND b.effective_date <= ?",
        )
        .bind(codes::ALLOWANCE_ECL)
        .bind(&asof_iso)
        .fetch_one(self.pool())
        .await?;

        let delta = required - existing;
        if delta == 0 {
            self.record_audit(
                AuditEvent::new(actor, "gl.ecl.noop")
                    .target(target)
                    .outcome("noop")
                    .extra(json!({"required_cents": required, "existing_cents": existing})),
            )
            .await?;
            return Ok(true);
        }

        let lines = if delta > 0 {
            [
                LineSpec::debit(codes::IMPAIRMENT, delta, None),
                LineSpec::credit(codes::ALLOWANCE_ECL, delta, None),
            ]
        } else {
            [
                LineSpec::debit(codes::ALLOWANCE_ECL, -delta, None),
                LineSpec::credit(codes::IMPAIRMENT, -delta, None),
            ]
        };
        let source_ref = self
            .next_impairment_ref(&format!("ECL-{year}-{month:02}"))
            .await?;
        let outcome = self
            .insert_batch(
                &source_ref,
                BatchKind::Impairment,
                &format!("ECL provision movement for {year}-{month:02}"),
                asof,
                actor,
                &lines,
            )
            .await?;

        match outcome {
            crate::gl::PostOutcome::Posted(id) => {
                self.record_audit(
                    AuditEvent::new(actor, "gl.ecl.posted")
                        .target(target)
                        .extra(json!({
                            "batch_id": id,
                            "required_cents": required,
                            "existing_cents": existing,
                            "delta_cents": delta,
                        })),
                )
                .await?;
                Ok(true)
            }
            crate::gl::PostOutcome::AlreadyPosted => {
                self.record_audit(
                    AuditEvent::new(actor, "gl.ecl.noop")
                        .target(target)
                        .outcome("noop"),
                )
                .await?;
                Ok(true)
            }
            crate::gl::PostOutcome::PeriodClosed => {
                self.record_audit(
                    AuditEvent::new(actor, "gl.ecl.blocked")
                        .target(target)
                        .blocked("period_closed"),
                )
                .await?;
                Ok(false)
            }
        }
    }

    /// Positive per-receipt balances on one account as of a date,
    /// excluding closing batches.
    async fn outstanding_by_receipt(
        &self,
        account_code: &str,
        asof_iso: &str,
    ) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            "SELECT e.receipt_id, SUM(e.debit_cents - e.credit_cents) AS balance \
             FROM gl_entries e JOIN gl_batches b ON b.id = e.batch_id \
             WHERE e.account_code = ? AND e.receipt_id IS NOT NULL \
               AND b.kind != 'closing' AND b.effective_date <= ? \
             GROUP BY e.receipt_id HAVING balance > 0 \
             ORDER BY e.receipt_id",
        )
        .bind(account_code)
        .bind(asof_iso)
        .fetch_all(self.pool())
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push((row.try_get("receipt_id")?, row.try_get("balance")?));
        }
        Ok(out)
    }

    async fn next_impairment_ref(&self, base: &str) -> Result<String> {
        let mut candidate = base.to_string();
        let mut n = 1;
        while self
            .find_batch(&candidate, BatchKind::Impairment)
            .await?
            .is_some()
        {
            n += 1;
            candidate = format!("{base}-{n}");
        }
        Ok(candidate)
    }
}

/// Expected loss on an outstanding amount, rounded to whole cents.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn loss_cents(outstanding_cents: i64, rate: f64) -> i64 {
    (outstanding_cents as f64 * rate).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;
    use chrono::{Datelike, Utc};
    use tresbill_core::{PricedJob, Tier};

    fn this_period() -> (i32, u32) {
        let now = Utc::now();
        (now.year(), now.month())
    }

    async fn issued_receipt(store: &Store, job_key: &str, cents: i64) -> i64 {
        let row = PricedJob {
            username: "acme".into(),
            job_key: job_key.into(),
            cpu_core_hours: 1.0,
            gpu_hours: 0.0,
            mem_gb_hours: 0.0,
            tier: Tier::Private,
            cost_cents: cents,
            state: "COMPLETED".into(),
            end: "2025-03-10T12:00:00Z".into(),
        };
        let (id, _, _) = store
            .create_receipt_from_rows("acme", "2025-03-01", "2025-03-31", &[row], "admin")
            .await
            .unwrap();
        store.post_receipt_issued(id, "admin").await.unwrap();
        id
    }

    #[tokio::test]
    async fn provision_sizes_to_the_bucket_rate() {
        let store = test_store().await;
        // 107.00 gross receivable; due date lands after month end, so the
        // whole balance sits in the not-yet-due bucket.
        issued_receipt(&store, "j1", 10_700).await;
        let (y, m) = this_period();

        let rates = EclRates {
            current: 0.10,
            ..EclRates::default()
        };
        assert!(store
            .post_ecl_provision(y, m, "admin", Some(rates), 30)
            .await
            .unwrap());

        let batch = store
            .find_batch(&format!("ECL-{y}-{m:02}"), BatchKind::Impairment)
            .await
            .unwrap()
            .unwrap();
        let entries = store.batch_entries(batch.id).await.unwrap();
        assert_eq!(entries[0].account_code, codes::IMPAIRMENT);
        assert_eq!(entries[0].debit_cents, 1070);
        assert_eq!(entries[1].account_code, codes::ALLOWANCE_ECL);
        assert_eq!(entries[1].credit_cents, 1070);
    }

    #[tokio::test]
    async fn rerun_without_changes_is_a_noop() {
        let store = test_store().await;
        issued_receipt(&store, "j1", 10_700).await;
        let (y, m) = this_period();

        assert!(store
            .post_ecl_provision(y, m, "admin", None, 30)
            .await
            .unwrap());
        assert!(store
            .post_ecl_provision(y, m, "admin", None, 30)
            .await
            .unwrap());

        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM gl_batches WHERE kind = 'impairment'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn settled_receivable_releases_the_allowance() {
        let store = test_store().await;
        let id = issued_receipt(&store, "j1", 10_700).await;
        let (y, m) = this_period();

        let rates = EclRates {
            current: 0.10,
            ..EclRates::default()
        };
        store
            .post_ecl_provision(y, m, "admin", Some(rates), 30)
            .await
            .unwrap();

        // Settle the receipt; the AR balance drops to zero.
        store.mark_receipt_paid(id, "admin").await.unwrap();
        store.post_receipt_paid(id, "admin").await.unwrap();
        store
            .post_ecl_provision(y, m, "admin", Some(rates), 30)
            .await
            .unwrap();

        // Second impairment batch reverses the first in full.
        let release = store
            .find_batch(&format!("ECL-{y}-{m:02}-2"), BatchKind::Impairment)
            .await
            .unwrap()
            .unwrap();
        let entries = store.batch_entries(release.id).await.unwrap();
        assert_eq!(entries[0].account_code, codes::ALLOWANCE_ECL);
        assert_eq!(entries[0].debit_cents, 1070);
        assert_eq!(entries[1].account_code, codes::IMPAIRMENT);
        assert_eq!(entries[1].credit_cents, 1070);
    }

    #[tokio::test]
    async fn closed_period_blocks_provisioning() {
        let store = test_store().await;
        issued_receipt(&store, "j1", 10_700).await;
        let (y, m) = this_period();
        store.close_period(y, m, "admin").await.unwrap();

        assert!(!store
            .post_ecl_provision(y, m, "admin", None, 30)
            .await
            .unwrap());
    }

    #[test]
    fn bucket_boundaries() {
        let rates = EclRates::default();
        assert_eq!(rates.rate_for_days(-5), 0.005);
        assert_eq!(rates.rate_for_days(0), 0.005);
        assert_eq!(rates.rate_for_days(1), 0.01);
        assert_eq!(rates.rate_for_days(30), 0.01);
        assert_eq!(rates.rate_for_days(31), 0.02);
        assert_eq!(rates.rate_for_days(60), 0.02);
        assert_eq!(rates.rate_for_days(61), 0.05);
        assert_eq!(rates.rate_for_days(90), 0.05);
        assert_eq!(rates.rate_for_days(91), 0.20);
    }
}
