//! Admin HITL endpoints.
//!
//! - `GET  /api/admin/hitl`             — pending approval requests
//! - `POST /api/admin/hitl/:id/decide`  — approve or reject one

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use hb_domain::Error;

use crate::api::admin::guard::AdminGuard;
use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn list_pending(
    State(state): State<AppState>,
    _guard: AdminGuard,
) -> impl IntoResponse {
    let pending = state.hitl.list_pending();
    Json(serde_json::json!({
        "count": pending.len(),
        "pending": pending,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub decision: String,
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn decide(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(id): Path<Uuid>,
    Json(req): Json<DecideRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let approve = match req.decision.as_str() {
        "approve" => true,
        "reject" => false,
        other => {
            return Err(ApiError(Error::InvalidParameter(format!(
                "decision must be 'approve' or 'reject' (got '{other}')"
            ))));
        }
    };
    let reviewer = req.reviewer.or_else(|| Some("admin".to_owned()));
    let snapshot = state.hitl.decide(id, approve, reviewer, req.note)?;
    Ok(Json(serde_json::json!({ "request": snapshot })))
}
