//! WebSocket subscriber endpoints for the notification bus.
//!
//! Flow, both sockets:
//! 1. Client connects (admin-guarded) and is upgraded.
//! 2. The socket first receives a `snapshot` frame of current state.
//! 3. Incremental `{type, data}` frames follow in transition order.
//!
//! The HITL socket additionally accepts `hitl_decision` and
//! `request_pending` frames from the client. Delivery is best-effort: a
//! lagging subscriber gets a fresh snapshot instead of the missed events.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::admin::guard::AdminGuard;
use crate::runtime::notify::HitlEvent;
use crate::state::AppState;

fn frame(kind: &str, data: Value) -> Option<Message> {
    serde_json::to_string(&serde_json::json!({ "type": kind, "data": data }))
        .ok()
        .map(Message::Text)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HITL socket
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn hitl_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    _guard: AdminGuard,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_hitl_socket(socket, state))
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct DecisionFrame {
    id: Uuid,
    decision: String,
    #[serde(default)]
    reviewer: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

async fn handle_hitl_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);

    // Subscribe before snapshotting so no transition falls in the gap.
    let mut events = state.notifier.subscribe_hitl();
    if !send_snapshot(&out_tx, &state).await {
        return;
    }

    // Writer task: forwards the outbound channel to the sink.
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Event forwarder.
    let forward_tx = out_tx.clone();
    let forward_state = state.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let msg = match event {
                        HitlEvent::Created(req) => {
                            frame("hitl_request", serde_json::to_value(req).unwrap_or_default())
                        }
                        HitlEvent::Updated(req) => {
                            frame("hitl_update", serde_json::to_value(req).unwrap_or_default())
                        }
                        HitlEvent::Removed { id } => {
                            frame("hitl_removed", serde_json::json!({ "id": id }))
                        }
                    };
                    match msg {
                        Some(msg) => {
                            if forward_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => continue,
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "hitl subscriber lagged, re-snapshotting");
                    if !send_snapshot(&forward_tx, &forward_state).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Reader loop: decision and snapshot-request frames.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                let Ok(inbound) = serde_json::from_str::<InboundFrame>(&text) else {
                    tracing::debug!("ignoring unparseable hitl ws frame");
                    continue;
                };
                match inbound.kind.as_str() {
                    "hitl_decision" => {
                        let Ok(decision) =
                            serde_json::from_value::<DecisionFrame>(inbound.data)
                        else {
                            continue;
                        };
                        let approve = decision.decision == "approve";
                        let result = state.hitl.decide(
                            decision.id,
                            approve,
                            decision.reviewer.or_else(|| Some("admin".into())),
                            decision.note,
                        );
                        let ack = match result {
                            Ok(_) => frame(
                                "decision_ack",
                                serde_json::json!({ "id": decision.id, "ok": true }),
                            ),
                            Err(e) => frame(
                                "decision_ack",
                                serde_json::json!({
                                    "id": decision.id,
                                    "ok": false,
                                    "error": e.public_message(),
                                }),
                            ),
                        };
                        if let Some(ack) = ack {
                            if out_tx.send(ack).await.is_err() {
                                break;
                            }
                        }
                    }
                    "request_pending" => {
                        if !send_snapshot(&out_tx, &state).await {
                            break;
                        }
                    }
                    other => {
                        tracing::debug!(kind = other, "unexpected hitl ws frame type");
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    forwarder.abort();
    writer.abort();
}

async fn send_snapshot(tx: &mpsc::Sender<Message>, state: &AppState) -> bool {
    let pending = state.hitl.list_pending();
    let Some(msg) = frame("snapshot", serde_json::to_value(pending).unwrap_or_default()) else {
        return false;
    };
    tx.send(msg).await.is_ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit socket
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const AUDIT_SNAPSHOT_LIMIT: usize = 50;

pub async fn audit_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    _guard: AdminGuard,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_audit_socket(socket, state))
}

async fn handle_audit_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let mut events = state.notifier.subscribe_audit();

    // Snapshot: most recent entries, oldest first so appends read naturally.
    let mut recent = state
        .audit
        .query(&hb_store::AuditFilter {
            limit: Some(AUDIT_SNAPSHOT_LIMIT),
            ..Default::default()
        })
        .unwrap_or_default();
    recent.reverse();
    if let Some(msg) = frame("snapshot", serde_json::to_value(recent).unwrap_or_default()) {
        if ws_sink.send(msg).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(entry) => {
                    let Some(msg) = frame(
                        "audit_entry",
                        serde_json::to_value(entry).unwrap_or_default(),
                    ) else { continue };
                    if ws_sink.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "audit subscriber lagged");
                    if let Some(msg) = frame("lagged", serde_json::json!({ "skipped": skipped })) {
                        if ws_sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            },
            inbound = ws_stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // audit socket is read-only
                Some(Err(_)) => break,
            },
        }
    }
}
