//! Notification bus — two broadcast channels fanning out HITL state changes
//! and new audit entries to live subscribers.
//!
//! Delivery is best-effort: a subscriber that cannot keep up observes
//! `Lagged` and re-snapshots from the authoritative in-memory/DB state.

use tokio::sync::broadcast;
use uuid::Uuid;

use hb_store::AuditEntry;

use crate::runtime::hitl::HitlRequest;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum HitlEvent {
    Created(HitlRequest),
    Updated(HitlRequest),
    /// A request left the table without a broadcastable terminal state
    /// (caller disconnected while waiting).
    Removed { id: Uuid },
}

pub struct Notifier {
    hitl_tx: broadcast::Sender<HitlEvent>,
    audit_tx: broadcast::Sender<AuditEntry>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (hitl_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (audit_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { hitl_tx, audit_tx }
    }

    pub fn subscribe_hitl(&self) -> broadcast::Receiver<HitlEvent> {
        self.hitl_tx.subscribe()
    }

    pub fn subscribe_audit(&self) -> broadcast::Receiver<AuditEntry> {
        self.audit_tx.subscribe()
    }

    /// Send failures just mean nobody is listening.
    pub fn publish_hitl(&self, event: HitlEvent) {
        let _ = self.hitl_tx.send(event);
    }

    pub fn publish_audit(&self, entry: AuditEntry) {
        let _ = self.audit_tx.send(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn audit_events_reach_subscribers_in_order() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe_audit();

        for i in 0..3u64 {
            notifier.publish_audit(AuditEntry {
                id: i.to_string(),
                timestamp: chrono::Utc::now(),
                protocol: "rest".into(),
                tool_category: "fs".into(),
                tool_name: "read".into(),
                status: hb_store::AuditStatus::Success,
                duration_ms: i,
                error_message: None,
                request_params_template: serde_json::json!({}),
                response_summary: None,
            });
        }

        for i in 0..3u64 {
            let entry = rx.recv().await.unwrap();
            assert_eq!(entry.id, i.to_string());
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let notifier = Notifier::new();
        notifier.publish_hitl(HitlEvent::Removed { id: Uuid::new_v4() });
    }
}
