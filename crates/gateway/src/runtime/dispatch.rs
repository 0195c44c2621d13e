//! Dispatch engine — the uniform pipeline every invocation traverses,
//! whatever surface it arrived on.
//!
//! Pipeline: descriptor lookup → policy → (HITL wait) → template expansion
//! → schema validation → handler → audit. The audit entry is written
//! *before* the result is returned, so an observer that has the response
//! can always find the matching entry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use hb_domain::invocation::Invocation;
use hb_domain::tool::ExecContext;
use hb_domain::{schema, Error, Result};
use hb_store::{AuditEntry, AuditStatus, AuditStore};
use hb_tools::WorkspaceResolver;

use crate::runtime::hitl::{HitlManager, HitlRequest, WaitOutcome};
use crate::runtime::notify::Notifier;
use crate::runtime::policy::{PolicyDecision, PolicyEngine};
use crate::runtime::registry::ToolRegistry;
use crate::runtime::secrets::SecretStore;
use crate::runtime::template;

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    policy: PolicyEngine,
    secrets: Arc<SecretStore>,
    hitl: Arc<HitlManager>,
    audit: Arc<AuditStore>,
    notifier: Arc<Notifier>,
    workspace: Arc<WorkspaceResolver>,
    response_summary_max_bytes: usize,
    /// Optional bound on the full dispatch, HITL wait included.
    request_timeout: Option<Duration>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ToolRegistry>,
        policy: PolicyEngine,
        secrets: Arc<SecretStore>,
        hitl: Arc<HitlManager>,
        audit: Arc<AuditStore>,
        notifier: Arc<Notifier>,
        workspace: Arc<WorkspaceResolver>,
        response_summary_max_kb: usize,
        request_timeout_seconds: Option<u64>,
    ) -> Self {
        Self {
            registry,
            policy,
            secrets,
            hitl,
            audit,
            notifier,
            workspace,
            response_summary_max_bytes: response_summary_max_kb * 1024,
            request_timeout: request_timeout_seconds.map(Duration::from_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch an invocation through the full pipeline.
    pub async fn dispatch(&self, inv: Invocation, cancel: CancellationToken) -> Result<Value> {
        self.dispatch_with(inv, cancel, false).await
    }

    /// Like [`dispatch`], but `force_hitl` routes the invocation through
    /// approval regardless of policy (plan tasks with `require_hitl`).
    pub async fn dispatch_with(
        &self,
        inv: Invocation,
        cancel: CancellationToken,
        force_hitl: bool,
    ) -> Result<Value> {
        let started = Instant::now();
        tracing::debug!(
            invocation_id = %inv.id,
            tool = %inv.tool_key(),
            protocol = %inv.protocol,
            "dispatching"
        );

        let (status, outcome) = self.run_pipeline(&inv, &cancel, force_hitl, started).await;

        let entry = AuditEntry {
            id: inv.id.to_string(),
            timestamp: Utc::now(),
            protocol: inv.protocol.to_string(),
            tool_category: inv.category.clone(),
            tool_name: inv.name.clone(),
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            error_message: outcome.as_ref().err().map(|e| e.audit_message()),
            // Pre-expansion params: secret values never reach the log.
            request_params_template: inv.params.clone(),
            response_summary: outcome
                .as_ref()
                .ok()
                .map(|v| self.summarize(v)),
        };
        match self.audit.append(entry) {
            Ok(entry) => self.notifier.publish_audit(entry),
            Err(e) => {
                tracing::error!(invocation_id = %inv.id, error = %e, "failed to write audit entry");
            }
        }

        outcome
    }

    async fn run_pipeline(
        &self,
        inv: &Invocation,
        cancel: &CancellationToken,
        force_hitl: bool,
        started: Instant,
    ) -> (AuditStatus, Result<Value>) {
        // 1. Descriptor lookup.
        let Some(desc) = self.registry.get(&inv.category, &inv.name) else {
            return (
                AuditStatus::Error,
                Err(Error::NotFound(format!(
                    "tool '{}' is not registered",
                    inv.tool_key()
                ))),
            );
        };

        // 2. Policy, before any secret expansion.
        let decision = if force_hitl {
            PolicyDecision::Approve {
                reason: "required by plan task".into(),
                ttl_seconds: self.policy.default_ttl_seconds(),
            }
        } else {
            self.policy.evaluate(inv, &desc)
        };

        let mut approved_via_hitl = false;
        match decision {
            PolicyDecision::Allow => {}
            PolicyDecision::Block { reason } => {
                return (AuditStatus::Blocked, Err(Error::Blocked(reason)));
            }
            PolicyDecision::Approve {
                reason,
                ttl_seconds,
            } => {
                // The HITL wait is bounded by min(ttl, remaining budget).
                let ttl_seconds = match self.remaining(started) {
                    Some(rem) => ttl_seconds.min(rem.as_secs().max(1)),
                    None => ttl_seconds,
                };
                let req = HitlRequest::new(
                    inv.id,
                    &inv.category,
                    &inv.name,
                    reason,
                    inv.params.clone(),
                    inv.caller.clone(),
                    ttl_seconds,
                );
                let waiter = self.hitl.submit(req);
                match waiter.wait(cancel).await {
                    WaitOutcome::Approved => approved_via_hitl = true,
                    WaitOutcome::Rejected { note } => {
                        return (
                            AuditStatus::HitlRejected,
                            Err(Error::HitlRejected(note.unwrap_or_else(|| {
                                "rejected by reviewer".into()
                            }))),
                        );
                    }
                    WaitOutcome::Expired => {
                        return (
                            AuditStatus::HitlExpired,
                            Err(Error::Timeout(
                                "approval request expired before a decision".into(),
                            )),
                        );
                    }
                    WaitOutcome::Cancelled => {
                        return (
                            AuditStatus::Error,
                            Err(Error::Internal(
                                "caller cancelled while awaiting approval".into(),
                            )),
                        );
                    }
                }
            }
        }

        // 5. Template expansion (after policy and approval, by design the
        //    pre-resolution form is what reviewers and audit saw).
        let resolved = match template::expand_secrets(&inv.params, &self.secrets) {
            Ok(v) => v,
            Err(e) => return (AuditStatus::Error, Err(e)),
        };

        // 6. Schema validation.
        if let Err(e) = schema::validate(&desc.input_schema, &resolved) {
            return (AuditStatus::Error, Err(e));
        }

        // 6b. Workspace containment for declared path params — the handler
        //     never sees a path that escapes the root.
        for key in &desc.path_params {
            let Some(raw) = resolved.get(key.as_str()).and_then(|v| v.as_str()) else {
                continue;
            };
            if let Err(e) = self.workspace.resolve(raw) {
                let status = if matches!(e, Error::Security(_)) {
                    AuditStatus::Blocked
                } else {
                    AuditStatus::Error
                };
                return (status, Err(e));
            }
        }

        // 7. Handler, under the remaining time budget.
        let ctx = ExecContext::new(inv.id, inv.protocol, cancel.child_token());
        let result = match self.remaining(started) {
            None => desc.handler.call(resolved, &ctx).await,
            Some(rem) if rem.is_zero() => Err(Error::Timeout(
                "request budget exhausted before the handler ran".into(),
            )),
            Some(rem) => match tokio::time::timeout(rem, desc.handler.call(resolved, &ctx)).await
            {
                Ok(result) => result,
                Err(_) => {
                    ctx.cancel.cancel();
                    Err(Error::Timeout(format!(
                        "handler exceeded the {}s request budget",
                        self.request_timeout.unwrap_or_default().as_secs()
                    )))
                }
            },
        };

        match result {
            Ok(value) => {
                let status = if approved_via_hitl {
                    AuditStatus::HitlApproved
                } else {
                    AuditStatus::Success
                };
                (status, Ok(value))
            }
            // Handlers classify their own failures; anything that slipped
            // through as Internal stays redacted on the wire.
            Err(e) => (AuditStatus::Error, Err(e)),
        }
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.request_timeout
            .map(|total| total.saturating_sub(started.elapsed()))
    }

    fn summarize(&self, value: &Value) -> String {
        let raw = value.to_string();
        if raw.len() <= self.response_summary_max_bytes {
            return raw;
        }
        let mut cut = self.response_summary_max_bytes;
        while cut > 0 && !raw.is_char_boundary(cut) {
            cut -= 1;
        }
        raw[..cut].to_owned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use hb_domain::config::{Config, PolicyAction, ToolOverride};
    use hb_domain::invocation::Protocol;
    use hb_domain::tool::ToolDescriptor;
    use hb_store::{AuditFilter, Db};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::runtime::registry::handler;

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn echo_descriptor(category: &str, name: &str, hitl_default: bool) -> ToolDescriptor {
        ToolDescriptor {
            category: category.into(),
            name: name.into(),
            description: "echo".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
            output_schema: None,
            requires_hitl_default: hitl_default,
            path_params: Vec::new(),
            handler: handler(|params, _ctx| async move {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "echo": params }))
            }),
        }
    }

    fn guarded_descriptor() -> ToolDescriptor {
        let mut desc = echo_descriptor("fs", "read", false);
        desc.path_params = vec!["path".into()];
        desc
    }

    fn slow_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            category: "slow".into(),
            name: "sleep".into(),
            description: "sleep".into(),
            input_schema: json!({ "type": "object" }),
            output_schema: None,
            requires_hitl_default: false,
            path_params: Vec::new(),
            handler: handler(|_params, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!({}))
            }),
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        audit: Arc<AuditStore>,
        hitl: Arc<HitlManager>,
    }

    fn fixture(config: Config, secrets_content: &str) -> (tempfile::TempDir, Fixture) {
        let dir = tempfile::tempdir().unwrap();
        let secrets_path = dir.path().join("secrets.env");
        std::fs::write(&secrets_path, secrets_content).unwrap();
        let secrets = Arc::new(SecretStore::load(secrets_path).unwrap());

        let mut registry = ToolRegistry::new();
        registry.register(echo_descriptor("fs", "write", false)).unwrap();
        registry.register(guarded_descriptor()).unwrap();
        registry.register(echo_descriptor("shell", "run", true)).unwrap();
        registry.register(slow_descriptor()).unwrap();
        let registry = Arc::new(registry);

        let notifier = Arc::new(Notifier::new());
        let hitl = Arc::new(HitlManager::new(notifier.clone()));
        let audit = Arc::new(AuditStore::new(Arc::new(Db::open_in_memory().unwrap())));
        let policy = PolicyEngine::from_config(&config).unwrap();
        let ws_root = dir.path().join("workspace");
        std::fs::create_dir_all(&ws_root).unwrap();

        let dispatcher = Dispatcher::new(
            registry,
            policy,
            secrets,
            hitl.clone(),
            audit.clone(),
            notifier,
            Arc::new(WorkspaceResolver::new(ws_root)),
            config.audit.response_summary_max_kb,
            config.limits.request_timeout_seconds,
        );
        (
            dir,
            Fixture {
                dispatcher,
                audit,
                hitl,
            },
        )
    }

    fn inv(category: &str, name: &str, params: Value) -> Invocation {
        Invocation::new(category, name, params, Protocol::Rest)
    }

    #[tokio::test]
    async fn success_writes_one_audit_entry() {
        let (_d, fx) = fixture(Config::default(), "");
        let result = fx
            .dispatcher
            .dispatch(
                inv("fs", "write", json!({ "path": "a.txt" })),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result["echo"]["path"], "a.txt");

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, AuditStatus::Success);
        assert_eq!(entries[0].tool_category, "fs");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found_and_audited() {
        let (_d, fx) = fixture(Config::default(), "");
        let err = fx
            .dispatcher
            .dispatch(
                inv("nope", "missing", json!({})),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, AuditStatus::Error);
    }

    #[tokio::test]
    async fn policy_block_skips_handler_and_audits_blocked() {
        let mut config = Config::default();
        config.tools.insert(
            "fs.write".into(),
            ToolOverride {
                policy: Some(PolicyAction::Block),
                reason: Some("writes are disabled".into()),
                ..Default::default()
            },
        );
        let (_d, fx) = fixture(config, "");
        let before = CALLS.load(Ordering::SeqCst);

        let err = fx
            .dispatcher
            .dispatch(
                inv("fs", "write", json!({ "path": "a.txt" })),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "blocked");
        assert!(err.to_string().contains("disabled"));
        assert_eq!(CALLS.load(Ordering::SeqCst), before);

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].status, AuditStatus::Blocked);
    }

    #[tokio::test]
    async fn schema_violation_is_classified_and_audited() {
        let (_d, fx) = fixture(Config::default(), "");
        let err = fx
            .dispatcher
            .dispatch(
                inv("fs", "write", json!({ "path": 42 })),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
        assert_eq!(err.http_status(), 422);

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].status, AuditStatus::Error);
    }

    #[tokio::test]
    async fn secrets_expand_for_handler_but_not_audit() {
        let (_d, fx) = fixture(Config::default(), "TOKEN=hunter2\n");
        let result = fx
            .dispatcher
            .dispatch(
                inv("fs", "write", json!({ "path": "a.txt", "body": "{{secret:TOKEN}}" })),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        // Handler saw the resolved value.
        assert_eq!(result["echo"]["body"], "hunter2");

        // Audit kept the template.
        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        let recorded = &entries[0].request_params_template;
        assert_eq!(recorded["body"], "{{secret:TOKEN}}");
        assert!(!recorded.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn unknown_secret_fails_before_handler() {
        let (_d, fx) = fixture(Config::default(), "");
        let before = CALLS.load(Ordering::SeqCst);
        let err = fx
            .dispatcher
            .dispatch(
                inv("fs", "write", json!({ "path": "{{secret:GHOST}}" })),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
        assert_eq!(CALLS.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn hitl_approval_runs_handler_and_audits_hitl_approved() {
        let (_d, fx) = fixture(Config::default(), "");
        let hitl = fx.hitl.clone();
        tokio::spawn(async move {
            // Wait for the request to appear, then approve it.
            for _ in 0..100 {
                if let Some(req) = hitl.list_pending().first() {
                    hitl.decide(req.id, true, Some("admin".into()), None).unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let result = fx
            .dispatcher
            .dispatch(
                inv("shell", "run", json!({ "path": "x" })),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.get("echo").is_some());

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].status, AuditStatus::HitlApproved);
    }

    #[tokio::test]
    async fn hitl_rejection_skips_handler() {
        let (_d, fx) = fixture(Config::default(), "");
        let before = CALLS.load(Ordering::SeqCst);
        let hitl = fx.hitl.clone();
        tokio::spawn(async move {
            for _ in 0..100 {
                if let Some(req) = hitl.list_pending().first() {
                    hitl.decide(req.id, false, Some("admin".into()), Some("no".into()))
                        .unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let err = fx
            .dispatcher
            .dispatch(
                inv("shell", "run", json!({ "path": "x" })),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "hitl_rejected");
        assert_eq!(CALLS.load(Ordering::SeqCst), before);

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].status, AuditStatus::HitlRejected);
    }

    #[tokio::test]
    async fn hitl_expiry_returns_timeout_and_audits_hitl_expired() {
        let mut config = Config::default();
        config.hitl.ttl_seconds = 1;
        let (_d, fx) = fixture(config, "");

        let err = fx
            .dispatcher
            .dispatch(
                inv("shell", "run", json!({ "path": "x" })),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].status, AuditStatus::HitlExpired);
    }

    #[tokio::test]
    async fn handler_timeout_is_bounded_by_request_budget() {
        let mut config = Config::default();
        config.limits.request_timeout_seconds = Some(1);
        let (_d, fx) = fixture(config, "");

        let err = fx
            .dispatcher
            .dispatch(inv("slow", "sleep", json!({})), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].status, AuditStatus::Error);
    }

    #[tokio::test]
    async fn path_escape_is_security_blocked_without_handler_call() {
        let (_d, fx) = fixture(Config::default(), "");
        let before = CALLS.load(Ordering::SeqCst);

        let err = fx
            .dispatcher
            .dispatch(
                inv("fs", "read", json!({ "path": "../../etc/passwd" })),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "security");
        assert!(err.to_string().contains("workspace"));
        assert_eq!(CALLS.load(Ordering::SeqCst), before);

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].status, AuditStatus::Blocked);
    }

    #[tokio::test]
    async fn response_summary_is_truncated() {
        let mut config = Config::default();
        config.audit.response_summary_max_kb = 1;
        let (_d, fx) = fixture(config, "");

        let big = "x".repeat(5000);
        fx.dispatcher
            .dispatch(
                inv("fs", "write", json!({ "path": big })),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let entries = fx.audit.query(&AuditFilter::default()).unwrap();
        let summary = entries[0].response_summary.as_ref().unwrap();
        assert!(summary.len() <= 1024);
    }
}
