//! Core types and pure logic for the TresBill chargeback platform.
//!
//! This crate provides the foundational pieces used throughout TresBill:
//!
//! - **Money**: integer-cent amounts and VAT splitting
//! - **Tiers**: customer classification (`mu`, `gov`, `private`)
//! - **Rates**: per-resource-hour rate cards
//! - **Jobs**: cluster accounting rows, parsers, and the pricing engine
//! - **Ledger**: the chart of accounts and batch kinds
//! - **Audit**: hash-chain primitives for the tamper-evident audit log
//!
//! # Money
//!
//! All persisted amounts are `i64` integer cents. Pricing math happens in
//! `f64` and converts at the boundary with half-up rounding, so two amounts
//! are "equal at 2-decimal precision" exactly when their cent values match.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod money;
pub mod rates;
pub mod tier;

pub use audit::{canonical_json, chain_hash, sign_hash, AuditPayload, AUDIT_SCHEMA_VERSION};
pub use error::{BillingError, Result};
pub use jobs::{
    canonical_job_id, compute_job_costs, extract_cpu_count, extract_gpu_count, extract_mem_gb,
    hms_to_hours, JobFetch, JobRecord, JobSource, PricedJob,
};
pub use ledger::{Account, AccountSide, AccountType, BatchKind, CHART_OF_ACCOUNTS};
pub use money::{format_cents, from_cents, split_vat, to_cents, VatConfig};
pub use rates::{RateCard, RateTable};
pub use tier::{classify_username, Tier};
