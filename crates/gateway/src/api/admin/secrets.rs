//! Admin secrets endpoints. Key names only — values never cross an API
//! boundary.
//!
//! - `GET  /api/admin/secrets`        — list key names
//! - `POST /api/admin/secrets/reload` — re-read the secrets file

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::api::admin::guard::AdminGuard;
use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn list_keys(
    State(state): State<AppState>,
    _guard: AdminGuard,
) -> impl IntoResponse {
    let keys = state.secrets.keys();
    Json(serde_json::json!({
        "count": keys.len(),
        "keys": keys,
    }))
}

pub async fn reload(
    State(state): State<AppState>,
    _guard: AdminGuard,
) -> ApiResult<Json<serde_json::Value>> {
    let count = state.secrets.reload()?;
    tracing::info!(count, "secrets reloaded");
    Ok(Json(serde_json::json!({ "reloaded": true, "count": count })))
}
