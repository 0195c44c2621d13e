//! Tool invocation endpoint — `POST /api/tools/{category}/{name}`.
//!
//! The body is the tool's params object; the response is either the handler
//! result verbatim or the shared error envelope. Connection drop cancels
//! the invocation token.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use hb_domain::invocation::{CallerContext, Invocation, Protocol};

use crate::api::error::ApiError;
use crate::state::AppState;

pub async fn invoke(
    State(state): State<AppState>,
    Path((category, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Response {
    let params = body.map(|Json(v)| v).unwrap_or_else(|| {
        Value::Object(serde_json::Map::new())
    });

    let caller = CallerContext {
        client_id: header_string(&headers, "x-client-id"),
        user_agent: header_string(&headers, "user-agent"),
    };
    let inv = Invocation::new(category, name, params, Protocol::Rest).with_caller(caller);

    // Dropping the guard (connection gone, future dropped) cancels the
    // token and with it any spawned work.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.dispatcher.dispatch(inv, cancel).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}
