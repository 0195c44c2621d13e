/// Shared error type used across all HostBridge crates.
///
/// Every failure that can cross a component boundary is classified into one
/// of these variants; the wire identifier (`kind()`), HTTP status and
/// JSON-RPC code are derived from the variant, never free-form.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// Workspace escape, SSRF block, path-traversal attempt.
    #[error("security: {0}")]
    Security(String),

    /// Policy refused the call.
    #[error("blocked: {0}")]
    Blocked(String),

    /// A human reviewer rejected the call.
    #[error("approval rejected: {0}")]
    HitlRejected(String),

    /// Unknown secret key, unknown task reference, malformed argument.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Params failed validation against the tool's declared input schema.
    #[error("schema: {0}")]
    Schema(String),

    /// Unknown tool, plan, memory node, or file.
    #[error("not found: {0}")]
    NotFound(String),

    /// Handler or egress timeout, or an approval request that expired
    /// before a decision. The audit log tells the two apart
    /// (`error` vs `hitl_expired`).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unclassified failure. The message is kept for the audit log but
    /// redacted on the wire.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable wire identifier included in every failure response.
    ///
    /// Schema violations share the `invalid_parameter` identifier (the
    /// taxonomy has no separate kind) but keep their own HTTP status.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Security(_) => "security",
            Error::Blocked(_) => "blocked",
            Error::HitlRejected(_) => "hitl_rejected",
            Error::InvalidParameter(_) | Error::Schema(_) => "invalid_parameter",
            Error::NotFound(_) => "not_found",
            Error::Timeout(_) => "timeout",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Message safe to return to the caller. Internal errors are redacted;
    /// the original text only reaches the audit log.
    pub fn public_message(&self) -> String {
        match self {
            Error::Internal(_) => "internal error".to_owned(),
            other => other.to_string(),
        }
    }

    /// Message recorded in the audit log (never redacted).
    pub fn audit_message(&self) -> String {
        self.to_string()
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::Security(_) | Error::Blocked(_) | Error::HitlRejected(_) => 403,
            Error::InvalidParameter(_) => 400,
            Error::Schema(_) => 422,
            Error::NotFound(_) => 404,
            Error::Timeout(_) => 504,
            Error::Internal(_) => 500,
        }
    }

    /// JSON-RPC error code for the MCP surface. Standard codes where one
    /// exists, implementation-defined codes in the -32000 range otherwise.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            Error::InvalidParameter(_) | Error::Schema(_) => -32602,
            Error::Internal(_) => -32603,
            Error::NotFound(_) => -32001,
            Error::Security(_) | Error::Blocked(_) => -32002,
            Error::HitlRejected(_) => -32003,
            Error::Timeout(_) => -32004,
        }
    }

    /// A tool that would help the caller diagnose this failure, if one is
    /// obviously applicable.
    pub fn suggestion_tool(&self) -> Option<&'static str> {
        match self {
            Error::NotFound(msg) if msg.contains("file") || msg.contains("path") => {
                Some("fs_list")
            }
            Error::NotFound(msg) if msg.contains("node") => Some("memory_search"),
            Error::NotFound(msg) if msg.contains("plan") => Some("plan_list"),
            Error::Security(msg) if msg.contains("workspace") => Some("workspace_info"),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("IO: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidParameter(format!("JSON: {e}"))
    }
}
