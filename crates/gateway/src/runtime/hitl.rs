//! Human-in-the-loop approval workflow.
//!
//! A dispatch that needs approval deposits a request here and suspends on a
//! per-request oneshot channel until an admin decides, the TTL elapses, or
//! the caller goes away. Expiry is authoritative: once
//! `created_at + ttl <= now` the request is observed as `expired` and no
//! decision can change it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hb_domain::invocation::CallerContext;
use hb_domain::{Error, Result};

use crate::runtime::notify::{HitlEvent, Notifier};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// Serializable approval request (for admin APIs and WS events). Params are
/// the *pre-resolution* form, so reviewers see `{{secret:KEY}}` templates,
/// never secret values.
#[derive(Debug, Clone, Serialize)]
pub struct HitlRequest {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub tool_category: String,
    pub tool_name: String,
    /// Reason from the policy rule that triggered the approval.
    pub policy_rule_matched: String,
    pub request_params: Value,
    pub request_context: CallerContext,
    pub status: HitlStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_note: Option<String>,
}

impl HitlRequest {
    pub fn new(
        id: Uuid,
        tool_category: impl Into<String>,
        tool_name: impl Into<String>,
        reason: impl Into<String>,
        request_params: Value,
        request_context: CallerContext,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            ttl_seconds,
            tool_category: tool_category.into(),
            tool_name: tool_name.into(),
            policy_rule_matched: reason.into(),
            request_params,
            request_context,
            status: HitlStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            reviewer_note: None,
        }
    }

    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        let deadline = self.created_at + chrono::Duration::seconds(self.ttl_seconds as i64);
        now >= deadline
    }
}

/// What the suspended dispatch observes when its wait ends.
#[derive(Debug)]
pub enum WaitOutcome {
    Approved,
    Rejected { note: Option<String> },
    Expired,
    /// The caller's own token fired while waiting.
    Cancelled,
}

#[derive(Debug)]
enum Decision {
    Approved,
    Rejected { note: Option<String> },
    Expired,
}

struct PendingEntry {
    snapshot: HitlRequest,
    respond: oneshot::Sender<Decision>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe table of pending approvals. A request leaves `pending` at
/// most once — the transition removes the entry under the mutex, so a
/// racing decide/expire sees `not_found`.
pub struct HitlManager {
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
    notifier: Arc<Notifier>,
}

impl HitlManager {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            notifier,
        }
    }

    /// Insert a pending request, broadcast `created`, and return the waiter
    /// that suspends the caller.
    pub fn submit(self: &Arc<Self>, req: HitlRequest) -> HitlWaiter {
        let (tx, rx) = oneshot::channel();
        let id = req.id;
        let ttl = Duration::from_secs(req.ttl_seconds);
        let snapshot = req.clone();
        self.pending.lock().insert(
            id,
            PendingEntry {
                snapshot: req,
                respond: tx,
            },
        );
        self.notifier.publish_hitl(HitlEvent::Created(snapshot));
        tracing::info!(id = %id, "approval request created");
        HitlWaiter {
            id,
            ttl,
            rx,
            manager: Arc::clone(self),
        }
    }

    /// Resolve a pending request. `not_found` if the id is absent, already
    /// decided, or past its TTL (which also finalizes the expiry).
    pub fn decide(
        &self,
        id: Uuid,
        approve: bool,
        reviewer: Option<String>,
        note: Option<String>,
    ) -> Result<HitlRequest> {
        let entry = {
            let mut pending = self.pending.lock();
            let now = Utc::now();
            if pending.get(&id).is_some_and(|e| e.snapshot.expired_at(now)) {
                // Lazy expiry beat the reviewer to it.
                let entry = pending.remove(&id).unwrap();
                drop(pending);
                self.finalize_expired(entry);
                return Err(Error::NotFound(format!(
                    "approval request '{id}' has expired"
                )));
            }
            pending.remove(&id)
        };

        let Some(entry) = entry else {
            return Err(Error::NotFound(format!(
                "approval request '{id}' is not pending"
            )));
        };

        let mut snapshot = entry.snapshot;
        snapshot.status = if approve {
            HitlStatus::Approved
        } else {
            HitlStatus::Rejected
        };
        snapshot.reviewed_by = reviewer;
        snapshot.reviewed_at = Some(Utc::now());
        snapshot.reviewer_note = note.clone();

        let decision = if approve {
            Decision::Approved
        } else {
            Decision::Rejected { note }
        };
        // The waiter may already be gone (cancelled caller); that's fine.
        let _ = entry.respond.send(decision);

        self.notifier
            .publish_hitl(HitlEvent::Updated(snapshot.clone()));
        tracing::info!(id = %id, approved = approve, "approval request decided");
        Ok(snapshot)
    }

    /// Pending requests for subscribers connecting now. Lazily expires.
    pub fn list_pending(&self) -> Vec<HitlRequest> {
        self.sweep_expired();
        let pending = self.pending.lock();
        let mut list: Vec<HitlRequest> =
            pending.values().map(|e| e.snapshot.clone()).collect();
        list.sort_by_key(|r| r.created_at);
        list
    }

    /// Read view of one request.
    pub fn snapshot(&self, id: Uuid) -> Option<HitlRequest> {
        self.sweep_expired();
        self.pending.lock().get(&id).map(|e| e.snapshot.clone())
    }

    /// Transition every past-deadline request to `expired`.
    pub fn sweep_expired(&self) {
        let expired: Vec<PendingEntry> = {
            let mut pending = self.pending.lock();
            let now = Utc::now();
            let ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, e)| e.snapshot.expired_at(now))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };
        for entry in expired {
            self.finalize_expired(entry);
        }
    }

    fn finalize_expired(&self, entry: PendingEntry) {
        let mut snapshot = entry.snapshot;
        snapshot.status = HitlStatus::Expired;
        let _ = entry.respond.send(Decision::Expired);
        self.notifier
            .publish_hitl(HitlEvent::Updated(snapshot.clone()));
        tracing::info!(id = %snapshot.id, "approval request expired");
    }

    /// Drop a request whose caller went away while waiting.
    fn abandon(&self, id: Uuid) {
        if self.pending.lock().remove(&id).is_some() {
            self.notifier.publish_hitl(HitlEvent::Removed { id });
            tracing::info!(id = %id, "approval request abandoned by caller");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Waiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Suspends the dispatching caller until a decision, TTL expiry, or the
/// caller's own cancellation.
pub struct HitlWaiter {
    id: Uuid,
    ttl: Duration,
    rx: oneshot::Receiver<Decision>,
    manager: Arc<HitlManager>,
}

impl HitlWaiter {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(self, cancel: &CancellationToken) -> WaitOutcome {
        tokio::select! {
            decision = self.rx => match decision {
                Ok(Decision::Approved) => WaitOutcome::Approved,
                Ok(Decision::Rejected { note }) => WaitOutcome::Rejected { note },
                Ok(Decision::Expired) => WaitOutcome::Expired,
                // Sender dropped without a decision; treat as expired.
                Err(_) => WaitOutcome::Expired,
            },
            _ = tokio::time::sleep(self.ttl) => {
                // The waiter's own clock is the backstop; the sweep makes
                // the table agree.
                self.manager.sweep_expired();
                WaitOutcome::Expired
            }
            _ = cancel.cancelled() => {
                self.manager.abandon(self.id);
                WaitOutcome::Cancelled
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
