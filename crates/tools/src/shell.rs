//! Shell tool — run a command under `sh -c` inside the workspace.
//!
//! A precompiled deny-list RegexSet rejects destructive commands before the
//! shell ever sees them, and a small env blocklist stops loader/interpreter
//! hijacks. The hard timeout and the caller's cancellation token both kill
//! the child.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use regex::RegexSet;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use hb_domain::config::ShellConfig;
use hb_domain::{Error, Result};

use crate::workspace::WorkspaceResolver;

#[derive(Debug, Clone, Deserialize)]
pub struct ShellRequest {
    pub command: String,
    /// Working directory, workspace-relative. Defaults to the root.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Override the configured hard timeout (seconds).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

/// Check if an environment variable name is dangerous to override.
fn is_dangerous_env_var(name: &str) -> bool {
    const BLOCKED: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "DYLD_INSERT_LIBRARIES",
        "DYLD_LIBRARY_PATH",
        "PATH",
        "HOME",
        "SHELL",
        "PYTHONPATH",
        "PYTHONSTARTUP",
        "NODE_OPTIONS",
        "BASH_ENV",
        "ENV",
        "IFS",
    ];
    let upper = name.to_ascii_uppercase();
    BLOCKED.contains(&upper.as_str())
}

pub struct ShellRunner {
    deny: RegexSet,
    timeout: Duration,
    max_output_chars: usize,
}

impl ShellRunner {
    pub fn new(config: &ShellConfig) -> Result<Self> {
        let deny = RegexSet::new(&config.deny_patterns)
            .map_err(|e| Error::Internal(format!("invalid shell deny pattern: {e}")))?;
        Ok(Self {
            deny,
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_chars: config.max_output_chars,
        })
    }

    pub async fn run(
        &self,
        ws: &WorkspaceResolver,
        req: ShellRequest,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        if self.deny.is_match(&req.command) {
            tracing::warn!(command = %req.command, "shell command blocked by deny pattern");
            return Err(Error::Blocked(
                "command matches the shell deny list".into(),
            ));
        }

        let workdir = match &req.workdir {
            Some(rel) => ws.resolve(rel)?,
            None => ws.root().to_path_buf(),
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&req.command)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref env) = req.env {
            for (k, v) in env {
                if is_dangerous_env_var(k) {
                    return Err(Error::Blocked(format!(
                        "environment variable '{k}' cannot be overridden"
                    )));
                }
                cmd.env(k, v);
            }
        }

        let timeout = Duration::from_secs(
            req.timeout_secs
                .unwrap_or(self.timeout.as_secs())
                .min(self.timeout.as_secs().max(1)),
        );
        let started = std::time::Instant::now();

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn shell: {e}")))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(ref mut pipe) = stdout_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            result = child.wait() => {
                result.map_err(|e| Error::Internal(format!("waiting for shell: {e}")))?
            }
            _ = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                return Err(Error::Timeout(format!(
                    "command exceeded {}s", timeout.as_secs()
                )));
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Internal("command cancelled by caller".into()));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let mut output = if stderr.is_empty() {
            stdout
        } else if stdout.is_empty() {
            stderr
        } else {
            format!("{stdout}\n{stderr}")
        };
        let truncated = output.chars().count() > self.max_output_chars;
        if truncated {
            output = output.chars().take(self.max_output_chars).collect();
        }

        Ok(serde_json::json!({
            "exit_code": status.code(),
            "output": output,
            "truncated": truncated,
            "duration_ms": started.elapsed().as_millis() as u64,
        }))
    }
}
