use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use chrono::Utc;

use crate::api::logs::parse_date;
use crate::api::{ApiError, AppState};
use crate::audit::entry::RecordId;
use crate::audit::stats::StatsWindow;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyParams {
    pub from_id: Option<u64>,
}

/// GET /audit/verify-integrity
pub async fn verify_integrity(
    State(state): State<AppState>,
    params: Result<Query<VerifyParams>, QueryRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Query(params) = params?;
    let run = state.service.verify(params.from_id.map(RecordId)).await?;
    let report = &run.report;

    info!(
        "Integrity verification complete: {}",
        if report.valid { "VALID" } else { "TAMPERED" }
    );

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "isValid": report.valid,
                "firstTamperedId": report.first_tampered_id,
                "failure": report.failure,
                "recordsChecked": report.records_checked,
                "verifiedAt": run.verified_at,
            }
        })),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// GET /audit/statistics
///
/// Defaults to the last 30 days.
pub async fn statistics(
    State(state): State<AppState>,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Query(params) = params?;
    let window = StatsWindow::resolve(
        params.start_date.as_deref().map(|d| parse_date(d, false)).transpose()?,
        params.end_date.as_deref().map(|d| parse_date(d, true)).transpose()?,
        Utc::now(),
    )?;

    let stats = state.service.statistics(window).await?;
    Ok((StatusCode::OK, Json(json!({ "success": true, "data": stats }))))
}
