//! The MCP endpoint — JSON-RPC over streamable HTTP at `/mcp`.
//!
//! `initialize` mints a session returned in the `Mcp-Session-Id` header;
//! every later request must carry it. `DELETE /mcp` ends the session. The
//! server never opens a push stream, so `GET /mcp` is 405.
//!
//! Only tool endpoints are exposed — admin and health surfaces are REST
//! only. Tool names use the flat `{category}_{name}` form.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hb_domain::invocation::{CallerContext, Invocation, Protocol};
use hb_domain::Error;

use crate::mcp::protocol::{
    initialize_result, tool_call_result, JsonRpcRequest, JsonRpcResponse, McpToolDef,
    ToolCallParams, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::state::AppState;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";
const SESSION_IDLE_MAX: Duration = Duration::from_secs(3600);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct McpSession {
    last_seen: Instant,
}

pub struct McpSessionStore {
    sessions: Mutex<HashMap<String, McpSession>>,
}

impl Default for McpSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl McpSessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions.lock().insert(
            id.clone(),
            McpSession {
                last_seen: Instant::now(),
            },
        );
        tracing::info!(session_id = %id, "mcp session created");
        id
    }

    /// Touch a session, refreshing its idle clock. False if unknown.
    pub fn touch(&self, id: &str) -> bool {
        match self.sessions.lock().get_mut(id) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn end(&self, id: &str) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    pub fn sweep_idle(&self) {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen.elapsed() < SESSION_IDLE_MAX);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "idle mcp sessions swept");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POST /mcp — one JSON-RPC request or notification per call.
pub async fn post_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let req: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(e) => {
            return rpc_response(JsonRpcResponse::err(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {e}"),
                None,
            ));
        }
    };
    if req.jsonrpc != "2.0" {
        return rpc_response(JsonRpcResponse::err(
            req.id.unwrap_or(Value::Null),
            INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
            None,
        ));
    }

    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match req.method.as_str() {
        "initialize" => {
            let session_id = state.mcp_sessions.create();
            let response =
                JsonRpcResponse::ok(req.id.unwrap_or(Value::Null), initialize_result());
            let mut out = rpc_response(response);
            if let Ok(value) = session_id.parse() {
                out.headers_mut().insert(SESSION_HEADER, value);
            }
            out
        }
        "notifications/initialized" => match require_session(&state, session_id.as_deref()) {
            Ok(()) => StatusCode::ACCEPTED.into_response(),
            Err(resp) => resp,
        },
        "ping" => {
            if let Err(resp) = require_session(&state, session_id.as_deref()) {
                return resp;
            }
            rpc_response(JsonRpcResponse::ok(
                req.id.unwrap_or(Value::Null),
                serde_json::json!({}),
            ))
        }
        "tools/list" => {
            if let Err(resp) = require_session(&state, session_id.as_deref()) {
                return resp;
            }
            let tools: Vec<McpToolDef> = state
                .registry
                .list()
                .iter()
                .map(|desc| McpToolDef {
                    name: desc.mcp_name(),
                    description: desc.description.clone(),
                    input_schema: desc.input_schema.clone(),
                })
                .collect();
            rpc_response(JsonRpcResponse::ok(
                req.id.unwrap_or(Value::Null),
                serde_json::json!({ "tools": tools }),
            ))
        }
        "tools/call" => {
            if let Err(resp) = require_session(&state, session_id.as_deref()) {
                return resp;
            }
            let id = req.id.unwrap_or(Value::Null);
            let params: ToolCallParams = match req
                .params
                .ok_or(())
                .and_then(|p| serde_json::from_value(p).map_err(|_| ()))
            {
                Ok(p) => p,
                Err(()) => {
                    return rpc_response(JsonRpcResponse::err(
                        id,
                        INVALID_PARAMS,
                        "tools/call needs { name, arguments }",
                        None,
                    ));
                }
            };
            handle_tool_call(&state, id, params, session_id).await
        }
        other => rpc_response(JsonRpcResponse::err(
            req.id.unwrap_or(Value::Null),
            METHOD_NOT_FOUND,
            format!("unknown method '{other}'"),
            None,
        )),
    }
}

/// DELETE /mcp — end the session named in the header.
pub async fn delete_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.mcp_sessions.end(id) {
        tracing::info!(session_id = %id, "mcp session ended");
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// GET /mcp — no server-initiated stream on this endpoint.
pub async fn get_mcp() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

async fn handle_tool_call(
    state: &AppState,
    id: Value,
    params: ToolCallParams,
    session_id: Option<String>,
) -> Response {
    let Some(desc) = state.registry.get_mcp(&params.name) else {
        let err = Error::NotFound(format!("tool '{}' is not registered", params.name));
        return rpc_response(domain_error_response(id, &err));
    };

    let arguments = match params.arguments {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };

    let inv = Invocation::new(
        desc.category.clone(),
        desc.name.clone(),
        arguments,
        Protocol::Mcp,
    )
    .with_caller(CallerContext {
        client_id: session_id,
        user_agent: None,
    });

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    match state.dispatcher.dispatch(inv, cancel).await {
        Ok(output) => rpc_response(JsonRpcResponse::ok(id, tool_call_result(&output))),
        Err(e) => rpc_response(domain_error_response(id, &e)),
    }
}

/// Map a dispatch failure onto a JSON-RPC error carrying the taxonomy.
fn domain_error_response(id: Value, err: &Error) -> JsonRpcResponse {
    let mut data = serde_json::json!({ "error_type": err.kind() });
    if let Some(tool) = err.suggestion_tool() {
        data["suggestion_tool"] = Value::String(tool.into());
    }
    JsonRpcResponse::err(id, err.jsonrpc_code(), err.public_message(), Some(data))
}

fn require_session(state: &AppState, session_id: Option<&str>) -> Result<(), Response> {
    match session_id {
        Some(id) if state.mcp_sessions.touch(id) => Ok(()),
        Some(_) => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown mcp session" })),
        )
            .into_response()),
        None => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "missing Mcp-Session-Id header" })),
        )
            .into_response()),
    }
}

fn rpc_response(response: JsonRpcResponse) -> Response {
    Json(response).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle() {
        let store = McpSessionStore::new();
        let id = store.create();
        assert!(store.touch(&id));
        assert_eq!(store.len(), 1);
        assert!(store.end(&id));
        assert!(!store.touch(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn touch_unknown_session_is_false() {
        let store = McpSessionStore::new();
        assert!(!store.touch("ghost"));
    }

    #[test]
    fn domain_errors_map_to_taxonomy_codes() {
        let err = Error::Blocked("policy said no".into());
        let resp = domain_error_response(Value::Null, &err);
        let rpc_err = resp.error.unwrap();
        assert_eq!(rpc_err.code, -32002);
        assert_eq!(rpc_err.data.unwrap()["error_type"], "blocked");
    }

    #[test]
    fn internal_errors_are_redacted_in_rpc_message() {
        let err = Error::Internal("stack trace with secrets".into());
        let resp = domain_error_response(Value::Null, &err);
        let rpc_err = resp.error.unwrap();
        assert_eq!(rpc_err.message, "internal error");
    }
}
