use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AppState};
use crate::audit::action::{AuditAction, SeverityClass};
use crate::audit::entry::AuditEnvelope;
use crate::audit::query::{AuditFilter, AuditQuery};
use crate::error::{AuditError, AuditResult};

const DEFAULT_SOURCE_IP: &str = "0.0.0.0";
const OFFLINE_SYNC_AGENT: &str = "offline-sync";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub action: Option<String>,
    pub severity: Option<String>,
    pub phi_only: Option<bool>,
    pub search: Option<String>,
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl ListParams {
    fn into_query(self) -> AuditResult<AuditQuery> {
        let severity = self
            .severity
            .as_deref()
            .map(SeverityClass::from_str)
            .transpose()
            .map_err(AuditError::Validation)?;

        let filter = AuditFilter {
            action: self.action.map(AuditAction::from),
            severity,
            phi_accessed: self.phi_only.filter(|phi_only| *phi_only),
            search: self.search,
            actor_id: self.user_id,
            start: self.start_date.as_deref().map(|d| parse_date(d, false)).transpose()?,
            end: self.end_date.as_deref().map(|d| parse_date(d, true)).transpose()?,
        };

        Ok(AuditQuery {
            filter,
            cursor: self.cursor.filter(|c| !c.is_empty()),
            limit: self.limit,
        })
    }
}

/// Accept RFC 3339 instants or bare dates; a bare end date covers the whole day
pub(crate) fn parse_date(value: &str, end_of_day: bool) -> AuditResult<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| AuditError::Validation(format!("Invalid date: {}", value)))?;
    let time = if end_of_day {
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| AuditError::Validation(format!("Invalid date: {}", value)))?;

    Ok(date.and_time(time).and_utc())
}

/// GET /audit/logs
pub async fn list_logs(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Query(params) = params?;
    let query = params.into_query()?;
    let page = state.service.query(&query).await?;
    let data = state.service.views(&page.records).await;

    info!("Audit logs retrieved: {} records", data.len());

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": data,
            "nextCursor": page.next_cursor,
            "limit": page.limit,
        })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub action: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub resource: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub phi_accessed: bool,
    pub metadata: Option<Value>,
}

impl From<AppendRequest> for AuditEnvelope {
    fn from(request: AppendRequest) -> Self {
        AuditEnvelope {
            action: AuditAction::from(request.action),
            actor_id: request.user_id,
            actor_name: request.user_name,
            resource: request.resource,
            source_ip: request
                .ip_address
                .unwrap_or_else(|| DEFAULT_SOURCE_IP.to_string()),
            user_agent: request.user_agent,
            phi_accessed: request.phi_accessed,
            metadata: request.metadata,
        }
    }
}

/// POST /audit/logs
pub async fn append_log(
    State(state): State<AppState>,
    request: Result<Json<AppendRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(request) = request?;
    let record = state.service.append(request.into()).await?;
    debug!("Ingested audit record {}", record.id);

    let view = state.service.view(&record).await;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "data": view }))))
}

/// Event queued by a client while it was offline
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// Client-side time of the event; recorded, never trusted for ordering
    pub timestamp: Option<String>,
    pub user_id: Option<String>,
}

impl SyncRequest {
    fn into_envelope(self, headers: &HeaderMap) -> AuditEnvelope {
        let mut action = AuditAction::from(self.action);
        if !action.is_known() {
            warn!("Offline sync sent unknown action {}; recording as security event", action);
            action = AuditAction::SecurityEvent;
        }

        let resource = format!(
            "{}:{}",
            self.resource_type.as_deref().unwrap_or("client"),
            self.resource_id.as_deref().unwrap_or("unknown")
        );

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(OFFLINE_SYNC_AGENT);

        let mut envelope = AuditEnvelope::new(action, resource)
            .source(client_ip(headers), user_agent)
            .metadata(json!({
                "syncedAt": Utc::now(),
                "originalTimestamp": self.timestamp,
            }));
        envelope.actor_id = self.user_id;
        envelope
    }
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(DEFAULT_SOURCE_IP)
        .to_string()
}

/// POST /audit/sync
pub async fn sync_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(request) = request?;
    let record = state.service.append(request.into_envelope(&headers)).await?;
    info!("Synced offline audit record {} ({})", record.id, record.action);

    let view = state.service.view(&record).await;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "data": view }))))
}
