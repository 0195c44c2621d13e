use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use hb_domain::config::Config;
use hb_store::{AuditStore, MemoryGraph};

use crate::mcp::server::McpSessionStore;
use crate::runtime::dispatch::Dispatcher;
use crate::runtime::hitl::HitlManager;
use crate::runtime::notify::Notifier;
use crate::runtime::plan::PlanExecutor;
use crate::runtime::registry::ToolRegistry;
use crate::runtime::secrets::SecretStore;

/// Shared application state passed to all API handlers.
///
/// Everything is built once in [`crate::bootstrap`] and injected here —
/// there is no global mutable state in the core.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── stores ────────────────────────────────────────────────────
    pub secrets: Arc<SecretStore>,
    pub audit: Arc<AuditStore>,
    pub memory: Arc<MemoryGraph>,

    // ── dispatch core ─────────────────────────────────────────────
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub hitl: Arc<HitlManager>,
    pub plans: Arc<PlanExecutor>,
    pub notifier: Arc<Notifier>,

    // ── adapters ──────────────────────────────────────────────────
    pub mcp_sessions: Arc<McpSessionStore>,

    // ── security (startup-computed) ───────────────────────────────
    /// SHA-256 of the admin password. `None` = dev mode, admin open.
    pub admin_password_hash: Option<Vec<u8>>,

    pub started_at: Instant,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Check a caller-supplied admin credential.
    ///
    /// With no password configured every caller passes (dev mode). The
    /// provided value is hashed to a fixed 32 bytes and compared in
    /// constant time, so neither length nor prefix leaks through timing.
    pub fn admin_credential_ok(&self, provided: Option<&str>) -> bool {
        let Some(expected) = &self.admin_password_hash else {
            return true;
        };
        let Some(provided) = provided else {
            return false;
        };
        let digest = Sha256::digest(provided.as_bytes());
        digest.ct_eq(expected.as_slice()).into()
    }
}
