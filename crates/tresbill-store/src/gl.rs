//! Double-entry general ledger: posting, reversals, close, reopen.
//!
//! Every batch is idempotent on `(source, source_ref, kind)`, balances to
//! the cent, and lands atomically with all its lines. Posted lines are
//! immutable; corrections are mirror-image reversal batches in the current
//! open period.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, Row};

use tresbill_core::ledger::{account, codes, AccountType};
use tresbill_core::{split_vat, BatchKind, BillingError};

use crate::audit::AuditEvent;
use crate::error::{Result, StoreError};
use crate::{month_end, now_iso, parse_iso, period_of, to_iso, Store};

/// Posting source for everything this system writes.
const SOURCE: &str = "billing";

/// A posted batch.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GlBatch {
    /// Row id.
    pub id: i64,
    /// Originating system, always `billing` here.
    pub source: String,
    /// Idempotency reference within the source, e.g. `R42`.
    pub source_ref: String,
    /// Batch kind.
    pub kind: String,
    /// Human-readable description.
    pub memo: Option<String>,
    /// Economic effective date.
    pub effective_date: String,
    /// Accounting period year.
    pub period_year: i64,
    /// Accounting period month.
    pub period_month: i64,
    /// When the batch was written.
    pub posted_at: String,
    /// Who posted it.
    pub posted_by: Option<String>,
    /// When a formal export picked it up.
    pub exported_at: Option<String>,
    /// The export run that picked it up.
    pub export_run_id: Option<i64>,
}

/// A posted line.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GlEntry {
    /// Row id.
    pub id: i64,
    /// Owning batch.
    pub batch_id: i64,
    /// 1-based position within the batch.
    pub seq_in_batch: i64,
    /// Chart account code.
    pub account_code: String,
    /// Debit amount in cents (zero when crediting).
    pub debit_cents: i64,
    /// Credit amount in cents (zero when debiting).
    pub credit_cents: i64,
    /// Line memo.
    pub memo: Option<String>,
    /// Related receipt, when applicable.
    pub receipt_id: Option<i64>,
    /// Stable export identifier, `B{batch:08}-L{seq:05}`.
    pub external_txn_id: String,
}

/// One line of a batch about to be posted.
#[derive(Debug, Clone)]
pub(crate) struct LineSpec {
    pub account_code: String,
    pub debit_cents: i64,
    pub credit_cents: i64,
    pub memo: Option<String>,
    pub receipt_id: Option<i64>,
}

impl LineSpec {
    pub(crate) fn debit(code: &str, cents: i64, receipt_id: Option<i64>) -> Self {
        Self {
            account_code: code.to_string(),
            debit_cents: cents,
            credit_cents: 0,
            memo: None,
            receipt_id,
        }
    }

    pub(crate) fn credit(code: &str, cents: i64, receipt_id: Option<i64>) -> Self {
        Self {
            account_code: code.to_string(),
            debit_cents: 0,
            credit_cents: cents,
            memo: None,
            receipt_id,
        }
    }
}

/// What happened when a batch was offered to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PostOutcome {
    /// A new batch with this id was written.
    Posted(i64),
    /// The same `(source_ref, kind)` was posted earlier.
    AlreadyPosted,
    /// The target period is closed.
    PeriodClosed,
}

impl Store {
    /// Offer one balanced batch to the ledger.
    pub(crate) async fn insert_batch(
        &self,
        source_ref: &str,
        kind: BatchKind,
        memo: &str,
        effective: DateTime<Utc>,
        actor: &str,
        lines: &[LineSpec],
    ) -> Result<PostOutcome> {
        let debits: i64 = lines.iter().map(|l| l.debit_cents).sum();
        let credits: i64 = lines.iter().map(|l| l.credit_cents).sum();
        if debits != credits
            || lines
                .iter()
                .any(|l| l.debit_cents < 0 || l.credit_cents < 0)
        {
            return Err(StoreError::Core(BillingError::Unbalanced { debits, credits }));
        }

        let (year, month) = period_of(effective);
        let mut tx = self.pool().begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM gl_batches WHERE source = ? AND source_ref = ? AND kind = ?",
        )
        .bind(SOURCE)
        .bind(source_ref)
        .bind(kind.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Ok(PostOutcome::AlreadyPosted);
        }

        sqlx::query(
            "INSERT OR IGNORE INTO accounting_periods (year, month, status) VALUES (?, ?, 'open')",
        )
        .bind(year)
        .bind(month)
        .execute(&mut *tx)
        .await?;
        let status: String = sqlx::query_scalar(
            "SELECT status FROM accounting_periods WHERE year = ? AND month = ?",
        )
        .bind(year)
        .bind(month)
        .fetch_one(&mut *tx)
        .await?;
        if status == "closed" {
            return Ok(PostOutcome::PeriodClosed);
        }

        let batch_id = sqlx::query(
            "INSERT INTO gl_batches \
             (source, source_ref, kind, memo, effective_date, period_year, period_month, \
              posted_at, posted_by) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(SOURCE)
        .bind(source_ref)
        .bind(kind.as_str())
        .bind(memo)
        .bind(to_iso(effective))
        .bind(year)
        .bind(month)
        .bind(now_iso())
        .bind(actor)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (i, line) in lines.iter().enumerate() {
            let seq = i64::try_from(i).unwrap_or(i64::MAX) + 1;
            sqlx::query(
                "INSERT INTO gl_entries \
                 (batch_id, seq_in_batch, account_code, debit_cents, credit_cents, \
                  memo, receipt_id, external_txn_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(batch_id)
            .bind(seq)
            .bind(&line.account_code)
            .bind(line.debit_cents)
            .bind(line.credit_cents)
            .bind(&line.memo)
            .bind(line.receipt_id)
            .bind(format!("B{batch_id:08}-L{seq:05}"))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(
            batch_id,
            source_ref = %source_ref,
            kind = %kind,
            lines = lines.len(),
            "gl batch posted"
        );
        Ok(PostOutcome::Posted(batch_id))
    }

    /// Accrue revenue for a receipt's service period: Dr contract asset,
    /// Cr revenue, both at the VAT-exclusive net.
    ///
    /// Returns whether a new batch was created.
    ///
    /// # Errors
    ///
    /// Returns a database error if the posting fails.
    pub async fn post_service_accrual_for_receipt(
        &self,
        receipt_id: i64,
        actor: &str,
    ) -> Result<bool> {
        let receipt = self.require_receipt(receipt_id).await?;
        let (net, _) = split_vat(receipt.total_cents, self.vat());
        let target = format!("receipt:{receipt_id}");

        if net <= 0 {
            self.record_audit(
                AuditEvent::new(actor, "gl.accrual.noop")
                    .target(target)
                    .outcome("noop")
                    .extra(json!({"net_cents": net})),
            )
            .await?;
            return Ok(false);
        }

        let effective = first_parseable(&[
            Some(&receipt.end_ts),
            Some(&receipt.created_at),
            Some(&receipt.start_ts),
        ])
        .unwrap_or_else(Utc::now);

        let lines = [
            LineSpec::debit(codes::CONTRACT_ASSET, net, Some(receipt_id)),
            LineSpec::credit(codes::REVENUE, net, Some(receipt_id)),
        ];
        let outcome = self
            .insert_batch(
                &format!("R{receipt_id}"),
                BatchKind::Accrual,
                &format!("Service accrual for receipt {receipt_id}"),
                effective,
                actor,
                &lines,
            )
            .await?;
        self.audit_posting(actor, "gl.accrual", &target, net, outcome)
            .await?;
        Ok(matches!(outcome, PostOutcome::Posted(_)))
    }

    /// Post the issue of a receipt: Dr AR gross, Cr contract asset net,
    /// Cr VAT output for the tax portion.
    ///
    /// # Errors
    ///
    /// Returns a database error if the posting fails.
    pub async fn post_receipt_issued(&self, receipt_id: i64, actor: &str) -> Result<bool> {
        let receipt = self.require_receipt(receipt_id).await?;
        let gross = receipt.total_cents;
        let (net, vat) = split_vat(gross, self.vat());
        let target = format!("receipt:{receipt_id}");

        if gross <= 0 {
            self.record_audit(
                AuditEvent::new(actor, "gl.issue.noop")
                    .target(target)
                    .outcome("noop")
                    .extra(json!({"gross_cents": gross})),
            )
            .await?;
            return Ok(false);
        }

        let effective = first_parseable(&[
            Some(&receipt.created_at),
            Some(&receipt.start_ts),
            Some(&receipt.end_ts),
        ])
        .unwrap_or_else(Utc::now);

        let mut lines = vec![
            LineSpec::debit(codes::AR, gross, Some(receipt_id)),
            LineSpec::credit(codes::CONTRACT_ASSET, net, Some(receipt_id)),
        ];
        if vat > 0 {
            lines.push(LineSpec::credit(codes::VAT_OUTPUT, vat, Some(receipt_id)));
        }
        let outcome = self
            .insert_batch(
                &format!("R{receipt_id}"),
                BatchKind::Issue,
                &format!("Receipt {receipt_id} issued"),
                effective,
                actor,
                &lines,
            )
            .await?;
        self.audit_posting(actor, "gl.issue", &target, gross, outcome)
            .await?;
        Ok(matches!(outcome, PostOutcome::Posted(_)))
    }

    /// Post the settlement of a paid receipt: Dr cash, Cr AR, at the gross.
    ///
    /// Refuses unless the receipt is paid with a settlement timestamp.
    ///
    /// # Errors
    ///
    /// Returns a database error if the posting fails.
    pub async fn post_receipt_paid(&self, receipt_id: i64, actor: &str) -> Result<bool> {
        let receipt = self.require_receipt(receipt_id).await?;
        let target = format!("receipt:{receipt_id}");

        let Some(paid_at) = receipt.paid_at.as_deref().and_then(parse_iso) else {
            self.record_audit(
                AuditEvent::new(actor, "gl.payment.blocked")
                    .target(target)
                    .blocked("not_paid")
                    .extra(json!({"status": receipt.status})),
            )
            .await?;
            return Ok(false);
        };
        if receipt.status != "paid" || receipt.total_cents <= 0 {
            self.record_audit(
                AuditEvent::new(actor, "gl.payment.blocked")
                    .target(target)
                    .blocked("not_paid")
                    .extra(json!({"status": receipt.status})),
            )
            .await?;
            return Ok(false);
        }

        let lines = [
            LineSpec::debit(codes::CASH, receipt.total_cents, Some(receipt_id)),
            LineSpec::credit(codes::AR, receipt.total_cents, Some(receipt_id)),
        ];
        let outcome = self
            .insert_batch(
                &format!("R{receipt_id}"),
                BatchKind::Payment,
                &format!("Receipt {receipt_id} paid"),
                paid_at,
                actor,
                &lines,
            )
            .await?;
        self.audit_posting(actor, "gl.payment", &target, receipt.total_cents, outcome)
            .await?;
        Ok(matches!(outcome, PostOutcome::Posted(_)))
    }

    /// Accrue every receipt whose service window ends in the month.
    ///
    /// Returns the number of new accrual batches.
    ///
    /// # Errors
    ///
    /// Returns a database error if a posting fails.
    pub async fn post_service_accruals_for_period(
        &self,
        year: i32,
        month: u32,
        actor: &str,
    ) -> Result<usize> {
        let target = format!("period:{year}-{month:02}");
        if self.period_is_closed(year, month).await? {
            self.record_audit(
                AuditEvent::new(actor, "gl.accruals.blocked")
                    .target(target)
                    .blocked("period_closed"),
            )
            .await?;
            return Ok(0);
        }

        let receipts = self.admin_list_receipts(None).await?;
        let mut created = 0usize;
        let mut considered = 0usize;
        for receipt in receipts {
            if receipt.status == "void" {
                continue;
            }
            let in_month = parse_iso(&receipt.end_ts)
                .map(period_of)
                .is_some_and(|(y, m)| y == year && m == month);
            if !in_month {
                continue;
            }
            considered += 1;
            if self
                .post_service_accrual_for_receipt(receipt.id, actor)
                .await?
            {
                created += 1;
            }
        }

        let outcome = if created == considered { "success" } else { "partial" };
        self.record_audit(
            AuditEvent::new(actor, "gl.accruals.posted")
                .target(target)
                .outcome(outcome)
                .extra(json!({"created": created, "considered": considered})),
        )
        .await?;
        Ok(created)
    }

    /// Reverse this receipt's batches of the given kinds into the current
    /// open period. Originals are never touched; each reversal is itself
    /// idempotent.
    ///
    /// Returns the number of reversal batches created.
    ///
    /// # Errors
    ///
    /// Returns a database error if a posting fails.
    pub async fn reverse_receipt_postings(
        &self,
        receipt_id: i64,
        actor: &str,
        kinds: &[BatchKind],
    ) -> Result<usize> {
        let mut created = 0usize;
        for kind in kinds {
            let batch: Option<GlBatch> = sqlx::query_as(
                "SELECT * FROM gl_batches WHERE source = ? AND source_ref = ? AND kind = ?",
            )
            .bind(SOURCE)
            .bind(format!("R{receipt_id}"))
            .bind(kind.as_str())
            .fetch_optional(self.pool())
            .await?;
            let Some(batch) = batch else { continue };

            let entries = self.batch_entries(batch.id).await?;
            let lines: Vec<LineSpec> = entries
                .iter()
                .map(|e| LineSpec {
                    account_code: e.account_code.clone(),
                    debit_cents: e.credit_cents,
                    credit_cents: e.debit_cents,
                    memo: e.memo.clone(),
                    receipt_id: e.receipt_id,
                })
                .collect();

            let outcome = self
                .insert_batch(
                    &format!("R{receipt_id}-REV-{kind}"),
                    BatchKind::Reversal,
                    &format!("Reversal of {kind} batch {} for receipt {receipt_id}", batch.id),
                    Utc::now(),
                    actor,
                    &lines,
                )
                .await?;
            if let PostOutcome::Posted(id) = outcome {
                created += 1;
                self.record_audit(
                    AuditEvent::new(actor, "gl.reversal.posted")
                        .target(format!("receipt:{receipt_id}"))
                        .extra(json!({"batch_id": id, "reversed_kind": kind.as_str()})),
                )
                .await?;
            }
        }
        Ok(created)
    }

    /// Create period rows for every month any receipt touches.
    ///
    /// # Errors
    ///
    /// Returns a database error if an insert fails.
    pub async fn bootstrap_periods(&self, actor: &str) -> Result<usize> {
        let receipts = self.admin_list_receipts(None).await?;
        let mut created = 0usize;
        for receipt in receipts {
            for ts in [
                Some(receipt.end_ts.as_str()),
                Some(receipt.created_at.as_str()),
                receipt.paid_at.as_deref(),
            ] {
                let Some((year, month)) = ts.and_then(parse_iso).map(period_of) else {
                    continue;
                };
                let done = sqlx::query(
                    "INSERT OR IGNORE INTO accounting_periods (year, month, status) \
                     VALUES (?, ?, 'open')",
                )
                .bind(year)
                .bind(month)
                .execute(self.pool())
                .await?;
                created += usize::try_from(done.rows_affected()).unwrap_or(0);
            }
        }
        self.record_audit(
            AuditEvent::new(actor, "gl.periods.bootstrapped")
                .extra(json!({"created": created})),
        )
        .await?;
        Ok(created)
    }

    /// Whether the period containing `dt` is closed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup fails.
    pub async fn is_period_closed(&self, dt: DateTime<Utc>) -> Result<bool> {
        let (year, month) = period_of(dt);
        self.period_is_closed(year, month).await
    }

    pub(crate) async fn period_is_closed(&self, year: i32, month: u32) -> Result<bool> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM accounting_periods WHERE year = ? AND month = ?",
        )
        .bind(year)
        .bind(month)
        .fetch_optional(self.pool())
        .await?;
        Ok(status.as_deref() == Some("closed"))
    }

    /// Close a period: zero income and expense balances into retained
    /// earnings with one closing batch, then flip the period closed.
    ///
    /// Already-closed periods are a `true` noop; an empty period closes
    /// without a batch.
    ///
    /// # Errors
    ///
    /// Returns a database error if the close fails.
    pub async fn close_period(&self, year: i32, month: u32, actor: &str) -> Result<bool> {
        let target = format!("period:{year}-{month:02}");
        sqlx::query(
            "INSERT OR IGNORE INTO accounting_periods (year, month, status) VALUES (?, ?, 'open')",
        )
        .bind(year)
        .bind(month)
        .execute(self.pool())
        .await?;
        if self.period_is_closed(year, month).await? {
            self.record_audit(
                AuditEvent::new(actor, "gl.close.noop")
                    .target(target)
                    .outcome("noop"),
            )
            .await?;
            return Ok(true);
        }

        let balances = self.period_account_balances(year, month).await?;
        let mut lines = Vec::new();
        let mut net: i64 = 0;
        for (code, debits, credits) in &balances {
            let Some(acct) = account(code) else { continue };
            match acct.account_type {
                AccountType::Income => {
                    let bal = credits - debits;
                    if bal > 0 {
                        lines.push(LineSpec::debit(code, bal, None));
                        net += bal;
                    }
                }
                AccountType::Expense => {
                    let bal = debits - credits;
                    if bal > 0 {
                        lines.push(LineSpec::credit(code, bal, None));
                        net -= bal;
                    }
                }
                _ => {}
            }
        }
        if net > 0 {
            lines.push(LineSpec::credit(codes::RETAINED_EARNINGS, net, None));
        } else if net < 0 {
            lines.push(LineSpec::debit(codes::RETAINED_EARNINGS, -net, None));
        }

        let mut batch_id = None;
        if !lines.is_empty() {
            let effective = month_end(year, month).unwrap_or_else(Utc::now);
            let source_ref = self
                .next_source_ref(&format!("CLOSE-{year}-{month:02}"), BatchKind::Closing)
                .await?;
            let outcome = self
                .insert_batch(
                    &source_ref,
                    BatchKind::Closing,
                    &format!("Close {year}-{month:02} into retained earnings"),
                    effective,
                    actor,
                    &lines,
                )
                .await?;
            if let PostOutcome::Posted(id) = outcome {
                batch_id = Some(id);
            }
        }

        sqlx::query(
            "UPDATE accounting_periods SET status = 'closed', closed_at = ?, closed_by = ? \
             WHERE year = ? AND month = ?",
        )
        .bind(now_iso())
        .bind(actor)
        .bind(year)
        .bind(month)
        .execute(self.pool())
        .await?;

        self.record_audit(
            AuditEvent::new(actor, "gl.close.posted")
                .target(target)
                .extra(json!({"batch_id": batch_id, "net_income_cents": net})),
        )
        .await?;
        Ok(true)
    }

    /// Reopen a closed period: reverse its closing batch into the current
    /// month and flip the period open. Refuses unless closed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the reopen fails.
    pub async fn reopen_period(&self, year: i32, month: u32, actor: &str) -> Result<bool> {
        let target = format!("period:{year}-{month:02}");
        if !self.period_is_closed(year, month).await? {
            self.record_audit(
                AuditEvent::new(actor, "gl.reopen.blocked")
                    .target(target)
                    .blocked("not_closed"),
            )
            .await?;
            return Ok(false);
        }

        // The latest closing batch for this period, if any.
        let batch: Option<GlBatch> = sqlx::query_as(
            "SELECT * FROM gl_batches \
             WHERE source = ? AND kind = 'closing' AND period_year = ? AND period_month = ? \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(SOURCE)
        .bind(year)
        .bind(month)
        .fetch_optional(self.pool())
        .await?;

        let mut reversal_id = None;
        if let Some(batch) = batch {
            let entries = self.batch_entries(batch.id).await?;
            let lines: Vec<LineSpec> = entries
                .iter()
                .map(|e| LineSpec {
                    account_code: e.account_code.clone(),
                    debit_cents: e.credit_cents,
                    credit_cents: e.debit_cents,
                    memo: e.memo.clone(),
                    receipt_id: e.receipt_id,
                })
                .collect();
            let source_ref = self
                .next_source_ref(&format!("UNCL-{year}-{month:02}"), BatchKind::Reversal)
                .await?;
            let outcome = self
                .insert_batch(
                    &source_ref,
                    BatchKind::Reversal,
                    &format!("Reopen {year}-{month:02}: reverse closing batch {}", batch.id),
                    Utc::now(),
                    actor,
                    &lines,
                )
                .await?;
            if let PostOutcome::Posted(id) = outcome {
                reversal_id = Some(id);
            }
        }

        sqlx::query(
            "UPDATE accounting_periods SET status = 'open', closed_at = NULL, closed_by = NULL \
             WHERE year = ? AND month = ?",
        )
        .bind(year)
        .bind(month)
        .execute(self.pool())
        .await?;

        self.record_audit(
            AuditEvent::new(actor, "gl.reopen.posted")
                .target(target)
                .extra(json!({"reversal_batch_id": reversal_id})),
        )
        .await?;
        Ok(true)
    }

    /// Entries of one batch in posting order.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn batch_entries(&self, batch_id: i64) -> Result<Vec<GlEntry>> {
        let entries = sqlx::query_as::<_, GlEntry>(
            "SELECT * FROM gl_entries WHERE batch_id = ? ORDER BY seq_in_batch",
        )
        .bind(batch_id)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    /// A batch by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn find_batch(&self, source_ref: &str, kind: BatchKind) -> Result<Option<GlBatch>> {
        let batch = sqlx::query_as::<_, GlBatch>(
            "SELECT * FROM gl_batches WHERE source = ? AND source_ref = ? AND kind = ?",
        )
        .bind(SOURCE)
        .bind(source_ref)
        .bind(kind.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(batch)
    }

    /// Per-account debit/credit totals posted into a period, excluding
    /// closing batches.
    pub(crate) async fn period_account_balances(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<(String, i64, i64)>> {
        let rows = sqlx::query(
            "SELECT e.account_code, \
                    COALESCE(SUM(e.debit_cents), 0) AS debits, \
                    COALESCE(SUM(e.credit_cents), 0) AS credits \
             FROM gl_entries e \
             JOIN gl_batches b ON b.id = e.batch_id \
             WHERE b.period_year = ? AND b.period_month = ? AND b.kind != 'closing' \
             GROUP BY e.account_code \
             ORDER BY e.account_code",
        )
        .bind(year)
        .bind(month)
        .fetch_all(self.pool())
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push((
                row.try_get("account_code")?,
                row.try_get("debits")?,
                row.try_get("credits")?,
            ));
        }
        Ok(out)
    }

    /// First free `base`, `base-2`, `base-3`, ... for a kind. Repeat
    /// closes after a reopen get distinct refs instead of silent noops.
    async fn next_source_ref(&self, base: &str, kind: BatchKind) -> Result<String> {
        let mut candidate = base.to_string();
        let mut n = 1;
        while self.find_batch(&candidate, kind).await?.is_some() {
            n += 1;
            candidate = format!("{base}-{n}");
        }
        Ok(candidate)
    }

    async fn audit_posting(
        &self,
        actor: &str,
        action_base: &str,
        target: &str,
        amount_cents: i64,
        outcome: PostOutcome,
    ) -> Result<()> {
        let event = match outcome {
            PostOutcome::Posted(id) => AuditEvent::new(actor, format!("{action_base}.posted"))
                .target(target)
                .extra(json!({"batch_id": id, "amount_cents": amount_cents})),
            PostOutcome::AlreadyPosted => AuditEvent::new(actor, format!("{action_base}.noop"))
                .target(target)
                .outcome("noop")
                .extra(json!({"amount_cents": amount_cents})),
            PostOutcome::PeriodClosed => AuditEvent::new(actor, format!("{action_base}.blocked"))
                .target(target)
                .blocked("period_closed")
                .extra(json!({"amount_cents": amount_cents})),
        };
        self.record_audit(event).await?;
        Ok(())
    }
}

/// First timestamp in the list that parses.
fn first_parseable(candidates: &[Option<&str>]) -> Option<DateTime<Utc>> {
    candidates
        .iter()
        .flatten()
        .find_map(|text| parse_iso(text))
}
