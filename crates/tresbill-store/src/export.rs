//! Formal GL export and report CSVs.
//!
//! The formal export picks every not-yet-exported economic batch in a
//! window, writes a CSV plus a manifest plus an HMAC signature, zips the
//! three, and records the run with enough evidence to re-verify the file
//! later. Batches are stamped with the run that took them, so repeating
//! a window exports nothing until new postings arrive.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Write as _;

use tresbill_core::audit::sign_hash;
use tresbill_core::ledger::{account, codes};
use tresbill_core::{canonical_json, format_cents, split_vat};

use crate::audit::AuditEvent;
use crate::error::{Result, StoreError};
use crate::gl::GlBatch;
use crate::{now_iso, Store};

/// Batch kinds with economic meaning outside this system. Reversals and
/// closings stay internal.
const EXPORTABLE_KINDS: &[&str] = &["accrual", "issue", "payment", "impairment"];

/// A finished formal export.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    /// The recorded run id.
    pub run_id: i64,
    /// Suggested download file name.
    pub file_name: String,
    /// Zip archive bytes.
    pub bytes: Vec<u8>,
}

impl Store {
    /// Run a formal GL export over a window (inclusive ISO bounds, either
    /// side open when `None`).
    ///
    /// Returns `None` when no unexported batches fall in the window; the
    /// noop run is still recorded.
    ///
    /// # Errors
    ///
    /// Returns a database error or [`StoreError::Export`] if the archive
    /// cannot be assembled.
    pub async fn run_formal_gl_export(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        actor: &str,
    ) -> Result<Option<ExportBundle>> {
        let batches = self.unexported_batches(start, end).await?;
        if batches.is_empty() {
            sqlx::query(
                "INSERT INTO gl_export_runs \
                 (kind, window_start, window_end, status, created_at, created_by) \
                 VALUES ('posted_gl_csv', ?, ?, 'noop', ?, ?)",
            )
            .bind(start)
            .bind(end)
            .bind(now_iso())
            .bind(actor)
            .execute(self.pool())
            .await?;
            self.record_audit(
                AuditEvent::new(actor, "gl.export.noop")
                    .outcome("noop")
                    .extra(json!({"start": start, "end": end})),
            )
            .await?;
            return Ok(None);
        }

        let mut tx = self.pool().begin().await?;
        let run_id = sqlx::query(
            "INSERT INTO gl_export_runs \
             (kind, window_start, window_end, status, created_at, created_by) \
             VALUES ('posted_gl_csv', ?, ?, 'completed', ?, ?)",
        )
        .bind(start)
        .bind(end)
        .bind(now_iso())
        .bind(actor)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        // CSV body, lines ordered by (batch_id, seq_in_batch).
        let mut csv = String::from(
            "external_txn_id,batch_id,seq_in_batch,kind,source_ref,effective_date,\
             account_code,account_name,debit,credit,memo,receipt_id\n",
        );
        let mut line_count: i64 = 0;
        for batch in &batches {
            for entry in self.batch_entries(batch.id).await? {
                let account_name = account(&entry.account_code)
                    .map(|a| a.name)
                    .unwrap_or_default();
                csv.push_str(&csv_row(&[
                    entry.external_txn_id,
                    batch.id.to_string(),
                    entry.seq_in_batch.to_string(),
                    batch.kind.clone(),
                    batch.source_ref.clone(),
                    batch.effective_date.clone(),
                    entry.account_code,
                    account_name.to_string(),
                    format_cents(entry.debit_cents),
                    format_cents(entry.credit_cents),
                    entry.memo.unwrap_or_default(),
                    entry
                        .receipt_id
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                ]));
                line_count += 1;
            }
        }

        let csv_name = format!("posted_gl_run_{run_id}.csv");
        let file_sha256 = hex::encode(Sha256::digest(csv.as_bytes()));
        let signature = self.audit_secret().map(|s| sign_hash(s, &file_sha256));
        let key_id = self.audit_key_id().to_string();

        let manifest = canonical_json(&json!({
            "run_id": run_id,
            "kind": "posted_gl_csv",
            "generated_at": now_iso(),
            "criteria": {"start": start, "end": end},
            "batch_count": batches.len(),
            "line_count": line_count,
            "file_name": csv_name,
            "file_sha256": file_sha256,
            "key_id": key_id,
            "schema_version": 1,
        }));
        let signature_text = format!(
            "sha256:{file_sha256}\nsignature:{}\nkey_id:{key_id}\n",
            signature.as_deref().unwrap_or("")
        );

        let file_name = format!("formal_gl_export_run_{run_id}.zip");
        let bytes = build_zip(&[
            (&csv_name, csv.as_bytes()),
            (&format!("manifest_run_{run_id}.json"), manifest.as_bytes()),
            (
                &format!("signature_run_{run_id}.txt"),
                signature_text.as_bytes(),
            ),
        ])?;

        let batch_count = i64::try_from(batches.len()).unwrap_or(i64::MAX);
        sqlx::query(
            "UPDATE gl_export_runs SET batch_count = ?, line_count = ?, file_name = ?, \
             file_sha256 = ?, signature = ?, key_id = ? WHERE id = ?",
        )
        .bind(batch_count)
        .bind(line_count)
        .bind(&file_name)
        .bind(&file_sha256)
        .bind(&signature)
        .bind(&key_id)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        let exported_at = now_iso();
        for batch in &batches {
            sqlx::query("INSERT INTO gl_export_run_batches (run_id, batch_id) VALUES (?, ?)")
                .bind(run_id)
                .bind(batch.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "UPDATE gl_batches SET exported_at = ?, export_run_id = ? WHERE id = ?",
            )
            .bind(&exported_at)
            .bind(run_id)
            .bind(batch.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.record_audit(
            AuditEvent::new(actor, "gl.export.completed")
                .target(format!("export_run:{run_id}"))
                .extra(json!({
                    "batch_count": batch_count,
                    "line_count": line_count,
                    "file_sha256": file_sha256,
                })),
        )
        .await?;
        tracing::info!(run_id, batch_count, line_count, "formal gl export completed");

        Ok(Some(ExportBundle {
            run_id,
            file_name,
            bytes,
        }))
    }

    async fn unexported_batches(
        &self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<GlBatch>> {
        let mut batches = sqlx::query_as::<_, GlBatch>(
            "SELECT * FROM gl_batches \
             WHERE exported_at IS NULL \
               AND kind IN ('accrual', 'issue', 'payment', 'impairment') \
             ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        debug_assert!(EXPORTABLE_KINDS.len() == 4);
        batches.retain(|b| {
            start.map_or(true, |s| b.effective_date.as_str() >= s)
                && end.map_or(true, |e| b.effective_date.as_str() <= e)
        });
        Ok(batches)
    }

    /// Derived general-ledger report over receipts, as CSV.
    ///
    /// One accrual, issue, and (when settled) payment row set per
    /// receipt, window-filtered by each row's own date.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn build_general_ledger_csv(
        &self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<String> {
        let receipts = self.admin_list_receipts(None).await?;
        let mut out = String::from(
            "date,receipt_id,username,account_code,account_name,debit,credit,memo\n",
        );
        let mut rows: Vec<[String; 8]> = Vec::new();
        for r in receipts.iter().rev() {
            if r.status == "void" {
                continue;
            }
            let (net, vat) = split_vat(r.total_cents, self.vat());
            let gross = r.total_cents;
            if net > 0 {
                push_pair(
                    &mut rows,
                    &r.end_ts,
                    r.id,
                    &r.username,
                    &[
                        (codes::CONTRACT_ASSET, net, 0),
                        (codes::REVENUE, 0, net),
                    ],
                    "service accrual",
                );
            }
            if gross > 0 {
                let mut issue = vec![(codes::AR, gross, 0), (codes::CONTRACT_ASSET, 0, net)];
                if vat > 0 {
                    issue.push((codes::VAT_OUTPUT, 0, vat));
                }
                push_pair(&mut rows, &r.created_at, r.id, &r.username, &issue, "issued");
            }
            if r.status == "paid" {
                if let Some(paid_at) = &r.paid_at {
                    push_pair(
                        &mut rows,
                        paid_at,
                        r.id,
                        &r.username,
                        &[(codes::CASH, gross, 0), (codes::AR, 0, gross)],
                        "payment",
                    );
                }
            }
        }
        rows.retain(|row| {
            start.map_or(true, |s| row[0].as_str() >= s)
                && end.map_or(true, |e| row[0].as_str() <= e)
        });
        rows.sort_by(|a, b| a[0].cmp(&b[0]).then_with(|| a[1].cmp(&b[1])));
        for row in rows {
            out.push_str(&csv_row(&row));
        }
        Ok(out)
    }

    /// Paid receipts as a Xero bank-statement import.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn build_xero_bank_csv(&self) -> Result<String> {
        let receipts = self.admin_list_receipts(Some("paid")).await?;
        let mut out = String::from("Date,Amount,Payee,Description,Reference\n");
        for r in receipts.iter().rev() {
            out.push_str(&csv_row(&[
                date_part(r.paid_at.as_deref().unwrap_or(&r.created_at)),
                format_cents(r.total_cents),
                r.username.clone(),
                format!("Compute service {} to {}", date_part(&r.start_ts), date_part(&r.end_ts)),
                format!("R{}", r.id),
            ]));
        }
        Ok(out)
    }

    /// Receipts as a Xero sales-invoice import. Unit amounts are
    /// VAT-exclusive; the tax type tells Xero to add the output VAT back.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn build_xero_sales_csv(&self, due_days: i64) -> Result<String> {
        let receipts = self.admin_list_receipts(None).await?;
        let mut out = String::from(
            "ContactName,InvoiceNumber,InvoiceDate,DueDate,Description,Quantity,\
             UnitAmount,AccountCode,TaxType\n",
        );
        for r in receipts.iter().rev() {
            if r.status == "void" || r.total_cents <= 0 {
                continue;
            }
            let (net, vat) = split_vat(r.total_cents, self.vat());
            let invoice_date = date_part(&r.created_at);
            let due_date = crate::parse_iso(&r.created_at)
                .map(|c| crate::to_iso(c + chrono::Duration::days(due_days)))
                .map_or_else(|| invoice_date.clone(), |d| date_part(&d));
            out.push_str(&csv_row(&[
                r.username.clone(),
                format!("R{}", r.id),
                invoice_date,
                due_date,
                format!("Compute service {} to {}", date_part(&r.start_ts), date_part(&r.end_ts)),
                "1".to_string(),
                format_cents(net),
                codes::REVENUE.to_string(),
                if vat > 0 { "OUTPUT" } else { "NONE" }.to_string(),
            ]));
        }
        Ok(out)
    }
}

fn push_pair(
    rows: &mut Vec<[String; 8]>,
    date: &str,
    receipt_id: i64,
    username: &str,
    lines: &[(&str, i64, i64)],
    memo: &str,
) {
    for (code, debit, credit) in lines {
        let name = account(code).map(|a| a.name).unwrap_or_default();
        rows.push([
            date.to_string(),
            receipt_id.to_string(),
            username.to_string(),
            (*code).to_string(),
            name.to_string(),
            format_cents(*debit),
            format_cents(*credit),
            memo.to_string(),
        ]);
    }
}

/// Date part of a stored timestamp.
fn date_part(ts: &str) -> String {
    ts.chars().take(10).collect()
}

/// One CSV row with RFC4180 quoting, newline included.
pub(crate) fn csv_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let f = field.as_ref();
        if f.contains(',') || f.contains('"') || f.contains('\n') {
            out.push('"');
            out.push_str(&f.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(f);
        }
    }
    out.push('\n');
    out
}

fn build_zip(files: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let cursor = std::io::Cursor::new(Vec::new());
    let mut zip = zip::ZipWriter::new(cursor);
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in files {
        zip.start_file(*name, options)
            .map_err(|e| StoreError::Export(e.to_string()))?;
        zip.write_all(bytes)
            .map_err(|e| StoreError::Export(e.to_string()))?;
    }
    let cursor = zip
        .finish()
        .map_err(|e| StoreError::Export(e.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;
    use tresbill_core::{PricedJob, Tier};

    async fn settled_receipt(store: &Store, job_key: &str, cents: i64) -> i64 {
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
        store.post_service_accrual_for_receipt(id, "admin").await.unwrap();
        store.post_receipt_issued(id, "admin").await.unwrap();
        store.mark_receipt_paid(id, "admin").await.unwrap();
        store.post_receipt_paid(id, "admin").await.unwrap();
        id
    }

    #[tokio::test]
    async fn export_bundles_batches_then_goes_quiet() {
        let store = test_store().await;
        settled_receipt(&store, "j1", 10_700).await;

        let bundle = store
            .run_formal_gl_export(None, None, "admin")
            .await
            .unwrap()
            .expect("first export has content");
        assert!(bundle.file_name.ends_with(".zip"));
        assert!(!bundle.bytes.is_empty());

        // Evidence persisted.
        let (batch_count, sha): (i64, Option<String>) = sqlx::query_as(
            "SELECT batch_count, file_sha256 FROM gl_export_runs WHERE id = ?",
        )
        .bind(bundle.run_id)
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(batch_count, 3); // accrual + issue + payment
        assert!(sha.is_some());

        // Every batch is stamped, so the same window exports nothing.
        let again = store.run_formal_gl_export(None, None, "admin").await.unwrap();
        assert!(again.is_none());

        // New activity makes the next run non-empty again.
        settled_receipt(&store, "j2", 5_350).await;
        let third = store.run_formal_gl_export(None, None, "admin").await.unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn window_excludes_out_of_range_batches() {
        let store = test_store().await;
        settled_receipt(&store, "j1", 10_700).await;

        // Only the accrual carries a 2025 effective date; issue and
        // payment are dated at creation/settlement time.
        let bundle = store
            .run_formal_gl_export(Some("2025-01-01"), Some("2025-12-31T23:59:59Z"), "admin")
            .await
            .unwrap()
            .expect("in-window export");
        let (batch_count,): (i64,) =
            sqlx::query_as("SELECT batch_count FROM gl_export_runs WHERE id = ?")
                .bind(bundle.run_id)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(batch_count, 1);
    }

    #[tokio::test]
    async fn report_csvs_have_expected_shape() {
        let store = test_store().await;
        settled_receipt(&store, "j1", 10_700).await;

        let gl = store.build_general_ledger_csv(None, None).await.unwrap();
        assert!(gl.contains("Service Revenue"));
        assert!(gl.contains("100.00"));
        assert!(gl.contains("107.00"));

        let bank = store.build_xero_bank_csv().await.unwrap();
        assert!(bank.starts_with("Date,Amount,Payee"));
        assert!(bank.contains("acme"));
        assert!(bank.contains("R1"));

        let sales = store.build_xero_sales_csv(30).await.unwrap();
        assert!(sales.contains("OUTPUT"));
        assert!(sales.contains("100.00")); // net unit amount
    }

    #[test]
    fn csv_quoting() {
        assert_eq!(csv_row(&["a", "b"]), "a,b\n");
        assert_eq!(csv_row(&["a,b", "c\"d"]), "\"a,b\",\"c\"\"d\"\n");
    }
}
