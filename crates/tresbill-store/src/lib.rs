//! SQLite persistence for the TresBill chargeback platform.
//!
//! One [`Store`] owns the connection pool and exposes every persistent
//! operation: users and throttling, rate cards, receipts, payments, the
//! double-entry general ledger, ECL provisioning, the audit chain, and
//! formal exports. Each public operation is a single transactional scope.
//!
//! Timestamps are stored as RFC3339 UTC text with second precision
//! (`2025-03-01T10:00:00Z`); amounts are integer cents.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use tresbill_core::VatConfig;

pub mod audit;
pub mod billing;
pub mod ecl;
pub mod error;
pub mod export;
pub mod gl;
pub mod payments;
pub mod rates;
pub mod users;

pub use audit::{AuditEntry, AuditEvent, ChainReport};
pub use billing::{Receipt, ReceiptItem};
pub use ecl::EclRates;
pub use error::{Result, StoreError};
pub use export::ExportBundle;
pub use gl::{GlBatch, GlEntry};
pub use payments::{Payment, PaymentEvent};

/// The storage backend.
///
/// Cheap to clone; the pool is internally reference-counted.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    vat: VatConfig,
    audit_secret: Option<String>,
    audit_key_id: String,
}

impl Store {
    /// Open (creating if missing) and migrate a database.
    ///
    /// In-memory URLs are pinned to a single connection so every handle
    /// sees the same database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(url = %url, "database ready");
        Ok(Self {
            pool,
            vat: VatConfig::default(),
            audit_secret: None,
            audit_key_id: "k1".into(),
        })
    }

    /// Set the VAT configuration used when splitting receipt totals.
    #[must_use]
    pub fn with_vat(mut self, vat: VatConfig) -> Self {
        self.vat = vat;
        self
    }

    /// Set the HMAC key used to sign audit entries and export evidence.
    #[must_use]
    pub fn with_audit_signing(
        mut self,
        secret: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        self.audit_secret = Some(secret.into());
        self.audit_key_id = key_id.into();
        self
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The VAT configuration.
    #[must_use]
    pub fn vat(&self) -> &VatConfig {
        &self.vat
    }

    pub(crate) fn audit_secret(&self) -> Option<&str> {
        self.audit_secret.as_deref()
    }

    pub(crate) fn audit_key_id(&self) -> &str {
        &self.audit_key_id
    }
}

/// Current time as stored text.
pub(crate) fn now_iso() -> String {
    to_iso(Utc::now())
}

/// Format a timestamp as stored text.
pub(crate) fn to_iso(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse stored or scheduler-reported timestamp text.
///
/// Accepts RFC3339 (with or without `Z`/offset), `T` or space separators,
/// optional fractional seconds, and bare dates.
pub(crate) fn parse_iso(text: &str) -> Option<DateTime<Utc>> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = t.trim_end_matches('Z').replace(' ', "T");
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&naive, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(&naive, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    None
}

/// Last second of a month, the effective date for closings and provisions.
pub(crate) fn month_end(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_next = NaiveDate::from_ymd_opt(ny, nm, 1)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&first_next) - chrono::Duration::seconds(1))
}

/// `(year, month)` of a timestamp.
pub(crate) fn period_of(dt: DateTime<Utc>) -> (i32, u32) {
    (dt.year(), dt.month())
}

#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    Store::connect("sqlite::memory:")
        .await
        .expect("in-memory store")
        .with_audit_signing("test-audit-secret", "k-test")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_iso_accepts_common_shapes() {
        for text in [
            "2025-03-01T10:00:00Z",
            "2025-03-01T10:00:00",
            "2025-03-01 10:00:00",
            "2025-03-01T10:00:00.250",
            "2025-03-01",
        ] {
            assert!(parse_iso(text).is_some(), "failed on {text}");
        }
        assert!(parse_iso("").is_none());
        assert!(parse_iso("Unknown").is_none());
    }

    #[test]
    fn iso_round_trip_is_second_precision() {
        let dt = parse_iso("2025-03-01T10:00:00Z").unwrap();
        assert_eq!(to_iso(dt), "2025-03-01T10:00:00Z");
    }

    #[test]
    fn month_end_is_last_second() {
        assert_eq!(
            to_iso(month_end(2025, 2).unwrap()),
            "2025-02-28T23:59:59Z"
        );
        assert_eq!(
            to_iso(month_end(2024, 12).unwrap()),
            "2024-12-31T23:59:59Z"
        );
    }

    #[tokio::test]
    async fn connect_runs_migrations() {
        let store = test_store().await;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gl_batches")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(n, 0);
    }
}
