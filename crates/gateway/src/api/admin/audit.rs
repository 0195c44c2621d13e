//! Admin audit endpoints.
//!
//! - `GET /api/admin/audit`        — filtered query with pagination
//! - `GET /api/admin/audit/export` — JSON or CSV over the same filter

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use hb_domain::Error;
use hb_store::{AuditFilter, AuditStatus, ExportFormat};

use crate::api::admin::guard::AdminGuard;
use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub category: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Export only: `json` (default) or `csv`.
    pub format: Option<String>,
}

impl AuditQuery {
    fn to_filter(&self) -> ApiResult<AuditFilter> {
        let status = match &self.status {
            None => None,
            Some(raw) => Some(AuditStatus::parse(raw).ok_or_else(|| {
                ApiError(Error::InvalidParameter(format!(
                    "unknown audit status '{raw}'"
                )))
            })?),
        };
        Ok(AuditFilter {
            tool_category: self.category.clone(),
            tool_name: self.name.clone(),
            status,
            since: self.since,
            until: self.until,
            text: self.text.clone(),
            limit: self.limit,
            offset: self.offset,
        })
    }
}

pub async fn query(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Query(q): Query<AuditQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let entries = state.audit.query(&q.to_filter()?)?;
    Ok(Json(serde_json::json!({
        "count": entries.len(),
        "entries": entries,
    })))
}

pub async fn export(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Query(q): Query<AuditQuery>,
) -> ApiResult<Response> {
    let format = match q.format.as_deref() {
        None | Some("json") => ExportFormat::Json,
        Some("csv") => ExportFormat::Csv,
        Some(other) => {
            return Err(ApiError(Error::InvalidParameter(format!(
                "format must be 'json' or 'csv' (got '{other}')"
            ))));
        }
    };
    let body = state.audit.export(&q.to_filter()?, format)?;
    let content_type = match format {
        ExportFormat::Json => "application/json",
        ExportFormat::Csv => "text/csv",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}
