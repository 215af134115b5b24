//! Hash-chained audit log.
//!
//! Every security- or money-relevant operation appends one entry. Each
//! entry's hash covers the previous entry's hash, so edits or deletions
//! anywhere in history break verification from that point on.

use serde_json::Value;
use sqlx::{FromRow, Row};

use tresbill_core::audit::{chain_hash, sign_hash, AuditPayload, AUDIT_SCHEMA_VERSION};

use crate::error::Result;
use crate::{now_iso, Store};

/// An auditable event, before chaining.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Acting principal (username or `system`).
    pub actor: String,
    /// Dotted action name, e.g. `gl.accrual.posted`.
    pub action: String,
    /// Acted-on entity, e.g. `receipt:42`.
    pub target: Option<String>,
    /// One of `success`, `blocked`, `noop`, `partial`, `failure`.
    pub outcome: &'static str,
    /// Machine-readable failure reason, when blocked or failed.
    pub error_code: Option<String>,
    /// Free-form structured detail.
    pub extra: Value,
    /// Client IP, for request-scoped events.
    pub ip: Option<String>,
    /// Client user-agent, for request-scoped events.
    pub ua: Option<String>,
    /// HTTP method, for request-scoped events.
    pub method: Option<String>,
    /// Request path, for request-scoped events.
    pub path: Option<String>,
    /// HTTP response status, for request-scoped events.
    pub status: Option<i64>,
}

impl AuditEvent {
    /// A successful system-actor event with no request context.
    #[must_use]
    pub fn new(actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            target: None,
            outcome: "success",
            error_code: None,
            extra: Value::Null,
            ip: None,
            ua: None,
            method: None,
            path: None,
            status: None,
        }
    }

    /// Set the target entity.
    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the outcome.
    #[must_use]
    pub fn outcome(mut self, outcome: &'static str) -> Self {
        self.outcome = outcome;
        self
    }

    /// Set the error code and mark the outcome accordingly.
    #[must_use]
    pub fn blocked(mut self, error_code: impl Into<String>) -> Self {
        self.outcome = "blocked";
        self.error_code = Some(error_code.into());
        self
    }

    /// Attach structured detail.
    #[must_use]
    pub fn extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }

    /// Attach HTTP request context.
    #[must_use]
    pub fn http(
        mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        ip: Option<String>,
        ua: Option<String>,
    ) -> Self {
        self.method = Some(method.into());
        self.path = Some(path.into());
        self.ip = ip;
        self.ua = ua;
        self
    }
}

/// One persisted audit entry.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct AuditEntry {
    /// Row id; ids ascend in chain order.
    pub id: i64,
    /// Event timestamp.
    pub ts: String,
    /// Acting principal.
    pub actor: String,
    /// Client IP.
    pub ip: Option<String>,
    /// Client user-agent.
    pub ua: Option<String>,
    /// HTTP method.
    pub method: Option<String>,
    /// Request path.
    pub path: Option<String>,
    /// Dotted action name.
    pub action: String,
    /// Acted-on entity.
    pub target: Option<String>,
    /// HTTP response status.
    pub status: Option<i64>,
    /// Outcome label.
    pub outcome: Option<String>,
    /// Machine-readable failure reason.
    pub error_code: Option<String>,
    /// Structured detail, canonical JSON text.
    pub extra: Option<String>,
    /// Previous entry's hash (empty for the first entry).
    pub prev_hash: String,
    /// This entry's chain hash.
    pub hash: String,
    /// HMAC signature over the hash, when signing is configured.
    pub signature: Option<String>,
    /// Key id the signature was made with.
    pub key_id: Option<String>,
    /// Payload schema version.
    pub schema_version: i64,
}

/// Chain verification report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChainReport {
    /// Whether every checked entry verified.
    pub ok: bool,
    /// Number of entries checked.
    pub checked: i64,
    /// Highest id that verified, if any.
    pub last_ok_id: Option<i64>,
    /// First id that failed, if any.
    pub first_bad_id: Option<i64>,
    /// Failure reason (`hash_mismatch`, `broken_link`, `bad_signature`).
    pub reason: Option<String>,
}

impl Store {
    /// Append one entry to the audit chain.
    ///
    /// # Errors
    ///
    /// Returns a database error if the append fails; audit writes are
    /// never silently dropped.
    pub async fn record_audit(&self, event: AuditEvent) -> Result<i64> {
        let mut tx = self.pool().begin().await?;

        let prev_hash: String =
            sqlx::query_scalar("SELECT hash FROM audit_log ORDER BY id DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?
                .unwrap_or_default();

        let ts = now_iso();
        let payload = AuditPayload {
            ts: ts.clone(),
            actor: event.actor.clone(),
            ip: event.ip.clone(),
            ua: event.ua.clone(),
            method: event.method.clone(),
            path: event.path.clone(),
            action: event.action.clone(),
            target: event.target.clone(),
            status: event.status,
            extra: event.extra.clone(),
        };
        let hash = chain_hash(&prev_hash, &payload)?;
        let (signature, key_id) = match self.audit_secret() {
            Some(secret) => (
                Some(sign_hash(secret, &hash)),
                Some(self.audit_key_id().to_string()),
            ),
            None => (None, None),
        };
        let extra_text = if event.extra.is_null() {
            None
        } else {
            Some(tresbill_core::canonical_json(&event.extra))
        };

        let result = sqlx::query(
            "INSERT INTO audit_log \
             (ts, actor, ip, ua, method, path, action, target, status, outcome, \
              error_code, extra, prev_hash, hash, signature, key_id, schema_version) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ts)
        .bind(&event.actor)
        .bind(&event.ip)
        .bind(&event.ua)
        .bind(&event.method)
        .bind(&event.path)
        .bind(&event.action)
        .bind(&event.target)
        .bind(event.status)
        .bind(event.outcome)
        .bind(&event.error_code)
        .bind(&extra_text)
        .bind(&prev_hash)
        .bind(&hash)
        .bind(&signature)
        .bind(&key_id)
        .bind(AUDIT_SCHEMA_VERSION)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(action = %event.action, outcome = %event.outcome, "audit recorded");
        Ok(result.last_insert_rowid())
    }

    /// Walk the chain from the start, recomputing every hash and signature.
    ///
    /// # Errors
    ///
    /// Returns a database error if entries cannot be read.
    pub async fn verify_chain(&self, limit: Option<i64>) -> Result<ChainReport> {
        let rows = match limit {
            Some(n) => {
                sqlx::query_as::<_, AuditEntry>(
                    "SELECT * FROM audit_log ORDER BY id ASC LIMIT ?",
                )
                .bind(n)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, AuditEntry>("SELECT * FROM audit_log ORDER BY id ASC")
                    .fetch_all(self.pool())
                    .await?
            }
        };

        let mut report = ChainReport {
            ok: true,
            checked: 0,
            last_ok_id: None,
            first_bad_id: None,
            reason: None,
        };
        let mut expected_prev = String::new();

        for entry in rows {
            report.checked += 1;
            if entry.prev_hash != expected_prev {
                return Ok(fail(report, entry.id, "broken_link"));
            }
            let extra = match &entry.extra {
                Some(text) => serde_json::from_str(text)?,
                None => Value::Null,
            };
            let payload = AuditPayload {
                ts: entry.ts.clone(),
                actor: entry.actor.clone(),
                ip: entry.ip.clone(),
                ua: entry.ua.clone(),
                method: entry.method.clone(),
                path: entry.path.clone(),
                action: entry.action.clone(),
                target: entry.target.clone(),
                status: entry.status,
                extra,
            };
            let recomputed = chain_hash(&entry.prev_hash, &payload)?;
            if recomputed != entry.hash {
                return Ok(fail(report, entry.id, "hash_mismatch"));
            }
            if let (Some(secret), Some(signature)) = (self.audit_secret(), &entry.signature) {
                if sign_hash(secret, &entry.hash) != *signature {
                    return Ok(fail(report, entry.id, "bad_signature"));
                }
            }
            report.last_ok_id = Some(entry.id);
            expected_prev = entry.hash;
        }
        Ok(report)
    }

    /// Most recent audit entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns a database error if entries cannot be read.
    pub async fn list_audit(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditEntry>(
            "SELECT * FROM audit_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// The full audit log as CSV, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error if entries cannot be read.
    pub async fn audit_csv(&self) -> Result<String> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY id ASC")
            .fetch_all(self.pool())
            .await?;
        let mut out = String::from(
            "id,ts,actor,action,target,outcome,status,error_code,ip,hash,signature,key_id\n",
        );
        for row in rows {
            let fields = [
                row.try_get::<i64, _>("id")?.to_string(),
                row.try_get::<String, _>("ts")?,
                row.try_get::<String, _>("actor")?,
                row.try_get::<String, _>("action")?,
                row.try_get::<Option<String>, _>("target")?.unwrap_or_default(),
                row.try_get::<Option<String>, _>("outcome")?.unwrap_or_default(),
                row.try_get::<Option<i64>, _>("status")?
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
                row.try_get::<Option<String>, _>("error_code")?
                    .unwrap_or_default(),
                row.try_get::<Option<String>, _>("ip")?.unwrap_or_default(),
                row.try_get::<String, _>("hash")?,
                row.try_get::<Option<String>, _>("signature")?
                    .unwrap_or_default(),
                row.try_get::<Option<String>, _>("key_id")?.unwrap_or_default(),
            ];
            out.push_str(&crate::export::csv_row(&fields));
        }
        Ok(out)
    }
}

fn fail(mut report: ChainReport, id: i64, reason: &str) -> ChainReport {
    report.ok = false;
    report.first_bad_id = Some(id);
    report.reason = Some(reason.to_string());
    report
}
