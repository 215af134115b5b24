//! GL administration handlers: accruals, close/reopen, ECL, exports, audit.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::state::AppState;

fn check_month(month: u32) -> Result<(), ApiError> {
    if (1..=12).contains(&month) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("invalid month: {month}")))
    }
}

/// Post service accruals for every billable receipt in a month (admin).
pub async fn post_accruals(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path((year, month)): Path<(i32, u32)>,
) -> Result<Json<Value>, ApiError> {
    check_month(month)?;
    let created = state
        .store
        .post_service_accruals_for_period(year, month, &admin.0.username)
        .await?;
    Ok(Json(json!({
        "period": format!("{year}-{month:02}"),
        "batches_created": created,
    })))
}

/// Close an accounting period (admin). Idempotent.
pub async fn close_period(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path((year, month)): Path<(i32, u32)>,
) -> Result<Json<Value>, ApiError> {
    check_month(month)?;
    let closed = state
        .store
        .close_period(year, month, &admin.0.username)
        .await?;
    Ok(Json(json!({
        "period": format!("{year}-{month:02}"),
        "closed": closed,
    })))
}

/// Reopen a closed period by reversing its closing batch (admin).
pub async fn reopen_period(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path((year, month)): Path<(i32, u32)>,
) -> Result<Json<Value>, ApiError> {
    check_month(month)?;
    let reopened = state
        .store
        .reopen_period(year, month, &admin.0.username)
        .await?;
    if !reopened {
        return Err(ApiError::Conflict(format!(
            "period {year}-{month:02} is not closed"
        )));
    }
    Ok(Json(json!({
        "period": format!("{year}-{month:02}"),
        "reopened": true,
    })))
}

/// Size the ECL allowance for a month-end (admin). Idempotent.
pub async fn post_ecl(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path((year, month)): Path<(i32, u32)>,
) -> Result<Json<Value>, ApiError> {
    check_month(month)?;
    let posted = state
        .store
        .post_ecl_provision(year, month, &admin.0.username, None, state.config.ar_due_days)
        .await?;
    Ok(Json(json!({
        "period": format!("{year}-{month:02}"),
        "posted": posted,
    })))
}

/// Date-window query for export endpoints.
#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    /// Inclusive ISO lower bound.
    pub start: Option<String>,
    /// Inclusive ISO upper bound.
    pub end: Option<String>,
}

fn csv_response(filename: &str, csv: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
        .into_response()
}

/// Derived general-ledger CSV over a window (admin).
pub async fn export_gl_csv(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<WindowQuery>,
) -> Result<Response, ApiError> {
    let csv = state
        .store
        .build_general_ledger_csv(query.start.as_deref(), query.end.as_deref())
        .await?;
    Ok(csv_response("general_ledger.csv", csv))
}

/// Formal signed export of unexported batches as a zip (admin).
///
/// 204 when the window holds nothing new.
pub async fn formal_export(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Query(query): Query<WindowQuery>,
) -> Result<Response, ApiError> {
    let bundle = state
        .store
        .run_formal_gl_export(
            query.start.as_deref(),
            query.end.as_deref(),
            &admin.0.username,
        )
        .await?;

    match bundle {
        Some(bundle) => Ok((
            [
                (
                    header::CONTENT_TYPE,
                    "application/zip".to_string(),
                ),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", bundle.file_name),
                ),
            ],
            bundle.bytes,
        )
            .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Paid receipts as a Xero bank-statement CSV (admin).
pub async fn xero_bank_csv(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Response, ApiError> {
    let csv = state.store.build_xero_bank_csv().await?;
    Ok(csv_response("xero_bank.csv", csv))
}

/// Receipts as a Xero sales-invoice CSV (admin).
pub async fn xero_sales_csv(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Response, ApiError> {
    let csv = state
        .store
        .build_xero_sales_csv(state.config.ar_due_days)
        .await?;
    Ok(csv_response("xero_sales.csv", csv))
}

/// Audit list query.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    /// Maximum rows, newest first.
    pub limit: Option<i64>,
}

/// Recent audit entries, newest first (admin).
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let entries = state.store.list_audit(limit).await?;
    Ok(Json(
        serde_json::to_value(&entries).map_err(|e| ApiError::Internal(e.to_string()))?,
    ))
}

/// Walk the audit chain; 409 when it does not verify (admin).
pub async fn verify_audit(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AuditQuery>,
) -> Result<Response, ApiError> {
    let report = state.store.verify_chain(query.limit).await?;
    let body = serde_json::to_value(&report).map_err(|e| ApiError::Internal(e.to_string()))?;

    let status = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(body)).into_response())
}

/// Full audit log as CSV (admin).
pub async fn audit_csv(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Response, ApiError> {
    let csv = state.store.audit_csv().await?;
    Ok(csv_response("audit_log.csv", csv))
}
