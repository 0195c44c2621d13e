//! Composition root — builds every component once and wires them together.
//!
//! Ordering matters in one place: the registry's plan tools need the plan
//! executor, the dispatcher needs the registry, and the plan executor needs
//! the dispatcher. The executor takes its dispatcher reference last.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use sha2::{Digest, Sha256};

use hb_domain::config::Config;
use hb_store::{AuditStore, Db, MemoryGraph};
use hb_tools::http::HttpEgress;
use hb_tools::shell::ShellRunner;
use hb_tools::WorkspaceResolver;

use crate::catalog::{self, CatalogDeps};
use crate::mcp::server::McpSessionStore;
use crate::runtime::dispatch::Dispatcher;
use crate::runtime::hitl::HitlManager;
use crate::runtime::notify::Notifier;
use crate::runtime::plan::PlanExecutor;
use crate::runtime::policy::PolicyEngine;
use crate::runtime::secrets::SecretStore;
use crate::state::AppState;

pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    // ── durable stores ────────────────────────────────────────────
    let db = Arc::new(Db::open(&config.storage.db_path()).context("opening database")?);
    let audit = Arc::new(AuditStore::new(db.clone()));
    let memory = Arc::new(MemoryGraph::new(db));

    // ── secrets ───────────────────────────────────────────────────
    let secrets =
        Arc::new(SecretStore::load(config.secrets.file.clone()).context("loading secrets")?);

    // ── workspace & tool deps ─────────────────────────────────────
    std::fs::create_dir_all(&config.workspace.root).with_context(|| {
        format!(
            "creating workspace root '{}'",
            config.workspace.root.display()
        )
    })?;
    let workspace = Arc::new(WorkspaceResolver::new(config.workspace.root.clone()));
    let shell = Arc::new(ShellRunner::new(&config.shell).context("compiling shell deny list")?);
    let egress =
        Arc::new(HttpEgress::new(config.http.clone()).context("building http egress")?);

    // ── dispatch core ─────────────────────────────────────────────
    let notifier = Arc::new(Notifier::new());
    let hitl = Arc::new(HitlManager::new(notifier.clone()));
    let plans = Arc::new(PlanExecutor::new());

    let registry = Arc::new(
        catalog::build_registry(CatalogDeps {
            workspace: workspace.clone(),
            shell,
            egress,
            memory: memory.clone(),
            plans: plans.clone(),
        })
        .context("building tool registry")?,
    );
    tracing::info!(tools = registry.len(), "tool registry ready");

    let policy = PolicyEngine::from_config(&config).context("compiling policy rules")?;
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        policy,
        secrets.clone(),
        hitl.clone(),
        audit.clone(),
        notifier.clone(),
        workspace,
        config.audit.response_summary_max_kb,
        config.limits.request_timeout_seconds,
    ));
    plans.set_dispatcher(dispatcher.clone());

    let admin_password_hash = config
        .server
        .admin_password
        .as_ref()
        .map(|p| Sha256::digest(p.as_bytes()).to_vec());

    Ok(AppState {
        config,
        secrets,
        audit,
        memory,
        registry,
        dispatcher,
        hitl,
        plans,
        notifier,
        mcp_sessions: Arc::new(McpSessionStore::new()),
        admin_password_hash,
        started_at: Instant::now(),
    })
}

/// Background maintenance: audit retention sweep, HITL lazy expiry, and
/// idle MCP session cleanup.
pub fn spawn_background_tasks(state: &AppState) {
    let audit = state.audit.clone();
    let hitl = state.hitl.clone();
    let mcp_sessions = state.mcp_sessions.clone();
    let retention_days = state.config.audit.retention_days;
    let interval = std::time::Duration::from_secs(state.config.audit.sweep_interval_seconds.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            hitl.sweep_expired();
            mcp_sessions.sweep_idle();
            if let Err(e) = audit.sweep(retention_days) {
                tracing::warn!(error = %e, "audit sweep failed");
            }
        }
    });
}
