//! Receipt handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tresbill_core::{classify_username, compute_job_costs, format_cents, JobRecord};
use tresbill_store::{Receipt, ReceiptItem};

use crate::auth::{AdminUser, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;

/// A receipt with its line items.
#[derive(Debug, Serialize)]
pub struct ReceiptDetail {
    /// The receipt row.
    #[serde(flatten)]
    pub receipt: Receipt,
    /// Total formatted at 2 decimals.
    pub total_formatted: String,
    /// Line items.
    pub items: Vec<ReceiptItem>,
}

/// List the caller's own receipts.
pub async fn list_own(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Receipt>>, ApiError> {
    Ok(Json(state.store.list_receipts(&user.username).await?))
}

/// Fetch one receipt with items. Owners and admins only.
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ReceiptDetail>, ApiError> {
    let receipt = state.store.require_receipt(id).await?;
    if receipt.username != user.username && !user.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let items = state.store.get_receipt_items(id).await?;

    Ok(Json(ReceiptDetail {
        total_formatted: format_cents(receipt.total_cents),
        receipt,
        items,
    }))
}

/// Admin list query.
#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    /// Optional status filter.
    pub status: Option<String>,
}

/// List all receipts, optionally by status (admin).
pub async fn admin_list(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<Vec<Receipt>>, ApiError> {
    Ok(Json(
        state
            .store
            .admin_list_receipts(query.status.as_deref())
            .await?,
    ))
}

/// Create-receipt request: raw scheduler rows for one user's window.
#[derive(Debug, Deserialize)]
pub struct CreateReceiptRequest {
    /// Billed username.
    pub username: String,
    /// Service window start (ISO).
    pub start: String,
    /// Service window end (ISO).
    pub end: String,
    /// Raw accounting rows; step rows and foreign users are dropped.
    pub jobs: Vec<JobRecord>,
}

/// Create-receipt response.
#[derive(Debug, Serialize)]
pub struct CreateReceiptResponse {
    /// New receipt id.
    pub receipt_id: i64,
    /// VAT-inclusive total in cents.
    pub total_cents: i64,
    /// Line items inserted.
    pub inserted: usize,
    /// Rows dropped as already billed elsewhere.
    pub skipped: usize,
}

/// Price scheduler rows and issue a receipt (admin).
///
/// Pricing uses the stored rate table and per-user tier overrides. On
/// success the service accrual and issue batches are posted immediately.
pub async fn admin_create(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Json(body): Json<CreateReceiptRequest>,
) -> Result<Json<CreateReceiptResponse>, ApiError> {
    if body.jobs.is_empty() {
        return Err(ApiError::BadRequest("no jobs submitted".into()));
    }

    let rates = state.store.load_rates().await?;
    let overrides = state.store.load_tier_overrides().await?;
    let priced = compute_job_costs(&body.jobs, &rates, |username| {
        overrides
            .get(username)
            .copied()
            .unwrap_or_else(|| classify_username(username))
    })?;

    let (receipt_id, total_cents, inserted) = state
        .store
        .create_receipt_from_rows(
            &body.username,
            &body.start,
            &body.end,
            &priced,
            &admin.0.username,
        )
        .await?;
    let skipped = priced
        .iter()
        .filter(|p| p.username == body.username)
        .count()
        .saturating_sub(inserted);

    state
        .store
        .post_service_accrual_for_receipt(receipt_id, &admin.0.username)
        .await?;
    state
        .store
        .post_receipt_issued(receipt_id, &admin.0.username)
        .await?;

    Ok(Json(CreateReceiptResponse {
        receipt_id,
        total_cents,
        inserted,
        skipped,
    }))
}

/// Mark a receipt paid by hand (admin). Posts the payment batch.
pub async fn admin_mark_paid(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let changed = state.store.mark_receipt_paid(id, &admin.0.username).await?;
    if !changed {
        return Err(ApiError::Conflict(format!("receipt {id} is not pending")));
    }
    state.store.post_receipt_paid(id, &admin.0.username).await?;
    Ok(Json(json!({ "receipt_id": id, "status": "paid" })))
}

/// Void a pending receipt, freeing its job keys (admin).
pub async fn admin_void(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let voided = state.store.void_receipt(id, &admin.0.username).await?;
    if !voided {
        return Err(ApiError::Conflict(format!("receipt {id} is not pending")));
    }
    Ok(Json(json!({ "receipt_id": id, "status": "void" })))
}

/// Revert a manually-paid receipt back to pending (admin).
pub async fn admin_revert(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let reverted = state
        .store
        .revert_receipt_to_pending(id, &admin.0.username)
        .await?;
    if !reverted {
        return Err(ApiError::Conflict(format!(
            "receipt {id} cannot be reverted"
        )));
    }
    Ok(Json(json!({ "receipt_id": id, "status": "pending" })))
}

/// Bulk-void request body.
#[derive(Debug, Deserialize)]
pub struct VoidMonthRequest {
    /// Year of the service month.
    pub year: i32,
    /// Month of the service month.
    pub month: u32,
    /// Reason recorded in the audit log.
    pub reason: String,
}

/// Void every pending receipt in a service month (admin).
pub async fn admin_void_month(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Json(body): Json<VoidMonthRequest>,
) -> Result<Json<Value>, ApiError> {
    if !(1..=12).contains(&body.month) {
        return Err(ApiError::BadRequest(format!(
            "invalid month: {}",
            body.month
        )));
    }
    let (voided, skipped, ids) = state
        .store
        .bulk_void_pending_for_month(body.year, body.month, &admin.0.username, &body.reason)
        .await?;

    Ok(Json(json!({
        "voided": voided,
        "skipped": skipped,
        "receipt_ids": ids,
    })))
}

/// Paid receipts as CSV (admin).
pub async fn admin_paid_csv(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Response, ApiError> {
    let csv = state.store.paid_receipts_csv().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"paid_receipts.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}
