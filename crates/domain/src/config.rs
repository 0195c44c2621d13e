use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub hitl: HitlConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub http: HttpEgressConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Per-tool policy overrides (key = `"category.name"`).
    #[serde(default)]
    pub tools: HashMap<String, ToolOverride>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_8080")]
    pub listen_port: u16,
    /// Admin credential. `None` = admin surfaces open (dev mode).
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            listen_port: 8080,
            admin_password: None,
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace / storage / secrets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// The single root directory all file-like tool paths resolve against.
    #[serde(default = "d_ws_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { root: d_ws_root() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the single `hostbridge.db` database file.
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("hostbridge.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// `key=value` lines; loaded at startup and on explicit reload.
    #[serde(default = "d_secrets_file")]
    pub file: PathBuf,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            file: d_secrets_file(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HITL / audit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlConfig {
    /// Default TTL for approval requests, in seconds.
    #[serde(default = "d_300")]
    pub ttl_seconds: u64,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self { ttl_seconds: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Horizon for the background sweep. 0 = keep forever.
    #[serde(default = "d_90")]
    pub retention_days: u32,
    /// Handler output recorded in the audit log is truncated to this size.
    #[serde(default = "d_4")]
    pub response_summary_max_kb: usize,
    #[serde(default = "d_3600")]
    pub sweep_interval_seconds: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            response_summary_max_kb: 4,
            sweep_interval_seconds: 3600,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP egress
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEgressConfig {
    /// Reject private/loopback/link-local destination addresses.
    #[serde(default = "d_true")]
    pub block_private_ips: bool,
    /// Reject cloud metadata endpoints (169.254.169.254 and friends).
    #[serde(default = "d_true")]
    pub block_metadata_endpoints: bool,
    /// Exact or glob domain allowlist. Empty = any domain.
    #[serde(default)]
    pub allow_domains: Vec<String>,
    /// Domain denylist, applied after the allowlist.
    #[serde(default)]
    pub block_domains: Vec<String>,
    #[serde(default = "d_30")]
    pub default_timeout_secs: u64,
    #[serde(default = "d_120")]
    pub max_timeout_secs: u64,
    /// Responses larger than this are truncated.
    #[serde(default = "d_512")]
    pub max_response_size_kb: usize,
}

impl Default for HttpEgressConfig {
    fn default() -> Self {
        Self {
            block_private_ips: true,
            block_metadata_endpoints: true,
            allow_domains: Vec::new(),
            block_domains: Vec::new(),
            default_timeout_secs: 30,
            max_timeout_secs: 120,
            max_response_size_kb: 512,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shell
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Regexes; a command matching any of them is blocked outright.
    #[serde(default = "d_deny_patterns")]
    pub deny_patterns: Vec<String>,
    /// Hard timeout for a single command.
    #[serde(default = "d_120")]
    pub timeout_secs: u64,
    /// Captured output is truncated to this size.
    #[serde(default = "d_200_000")]
    pub max_output_chars: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            deny_patterns: d_deny_patterns(),
            timeout_secs: 120,
            max_output_chars: 200_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LimitsConfig {
    /// Optional bound on a full dispatch, HITL wait included.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-tool policy overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Block,
    Hitl,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolOverride {
    /// Unconditional action for this tool, evaluated after the pattern lists.
    #[serde(default)]
    pub policy: Option<PolicyAction>,
    /// Globs on the primary param that force approval.
    #[serde(default)]
    pub hitl_patterns: Vec<String>,
    /// Globs on the primary param that block outright.
    #[serde(default)]
    pub block_patterns: Vec<String>,
    /// Reason included in block errors and approval payloads.
    #[serde(default)]
    pub reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Apply `HOSTBRIDGE_*` environment overrides. Env wins over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HOSTBRIDGE_ADMIN_PASSWORD") {
            self.server.admin_password = Some(v);
        }
        if let Ok(v) = std::env::var("HOSTBRIDGE_LISTEN_PORT") {
            if let Ok(port) = v.parse() {
                self.server.listen_port = port;
            }
        }
        if let Ok(v) = std::env::var("HOSTBRIDGE_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("HOSTBRIDGE_WORKSPACE_ROOT") {
            self.workspace.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HOSTBRIDGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HOSTBRIDGE_SECRETS_FILE") {
            self.secrets.file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HOSTBRIDGE_HITL_TTL_SECONDS") {
            if let Ok(ttl) = v.parse() {
                self.hitl.ttl_seconds = ttl;
            }
        }
        if let Ok(v) = std::env::var("HOSTBRIDGE_AUDIT_RETENTION_DAYS") {
            if let Ok(days) = v.parse() {
                self.audit.retention_days = days;
            }
        }
    }

    /// Sanity-check the configuration. Errors prevent startup.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.hitl.ttl_seconds == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "hitl.ttl_seconds must be greater than zero".into(),
            });
        }
        if self.http.max_timeout_secs < self.http.default_timeout_secs {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "http.max_timeout_secs is below http.default_timeout_secs".into(),
            });
        }
        if self.server.admin_password.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "server.admin_password not set — admin endpoints are open".into(),
            });
        }
        if self.audit.response_summary_max_kb == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "audit.response_summary_max_kb is 0 — summaries will be empty".into(),
            });
        }
        for (key, rule) in &self.tools {
            let well_formed = match key.split_once('.') {
                Some((category, name)) => !category.is_empty() && !name.is_empty(),
                None => !key.is_empty(),
            };
            if !well_formed {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: format!("tools key '{key}' must be 'category' or 'category.name'"),
                });
            }
            for pattern in rule.hitl_patterns.iter().chain(&rule.block_patterns) {
                if glob_pattern_invalid(pattern) {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        message: format!("tools.{key}: invalid glob pattern '{pattern}'"),
                    });
                }
            }
        }

        issues
    }
}

// A pattern is checked structurally here; compilation happens once in the
// policy engine at startup.
fn glob_pattern_invalid(pattern: &str) -> bool {
    pattern.is_empty() || pattern.contains('\0')
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_8080() -> u16 {
    8080
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:8080".into(),
        "http://127.0.0.1:8080".into(),
    ]
}
fn d_ws_root() -> PathBuf {
    PathBuf::from("./workspace")
}
fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn d_secrets_file() -> PathBuf {
    PathBuf::from("./secrets.env")
}
fn d_300() -> u64 {
    300
}
fn d_90() -> u32 {
    90
}
fn d_4() -> usize {
    4
}
fn d_3600() -> u64 {
    3600
}
fn d_true() -> bool {
    true
}
fn d_30() -> u64 {
    30
}
fn d_120() -> u64 {
    120
}
fn d_512() -> usize {
    512
}
fn d_200_000() -> usize {
    200_000
}
fn d_deny_patterns() -> Vec<String> {
    vec![
        r"rm\s+-rf\s+/(\s|$)".into(),
        r"mkfs\.".into(),
        r"dd\s+if=.*of=/dev/".into(),
        r":\(\)\s*\{.*\};\s*:".into(),
    ]
}
