//! Git tools — fixed-argv subprocess wrappers over the git CLI, always
//! rooted at the workspace.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use hb_domain::{Error, Result};

use crate::command::run_command;
use crate::workspace::WorkspaceResolver;

const GIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct GitLogRequest {
    #[serde(default = "d_20")]
    pub limit: usize,
}

fn d_20() -> usize {
    20
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitDiffRequest {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub staged: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitCommitRequest {
    pub message: String,
    /// Stage all tracked and untracked changes first.
    #[serde(default)]
    pub stage_all: bool,
}

pub async fn git_status(ws: &WorkspaceResolver, cancel: &CancellationToken) -> Result<Value> {
    let out = run_command(
        "git",
        &["status", "--porcelain", "--branch"],
        Some(ws.root()),
        GIT_TIMEOUT,
        cancel,
    )
    .await?;
    Ok(git_result(out.exit_code, out.stdout, out.stderr))
}

pub async fn git_log(
    ws: &WorkspaceResolver,
    req: GitLogRequest,
    cancel: &CancellationToken,
) -> Result<Value> {
    let limit = req.limit.clamp(1, 500).to_string();
    let out = run_command(
        "git",
        &["log", "--oneline", "--no-color", "-n", &limit],
        Some(ws.root()),
        GIT_TIMEOUT,
        cancel,
    )
    .await?;
    Ok(git_result(out.exit_code, out.stdout, out.stderr))
}

pub async fn git_diff(
    ws: &WorkspaceResolver,
    req: GitDiffRequest,
    cancel: &CancellationToken,
) -> Result<Value> {
    let mut args = vec!["diff", "--no-color"];
    if req.staged {
        args.push("--staged");
    }
    // The path must stay inside the workspace like every other file param.
    let resolved;
    if let Some(ref path) = req.path {
        resolved = ws.resolve(path)?;
        args.push("--");
        args.push(resolved.to_str().ok_or_else(|| {
            Error::InvalidParameter("path is not valid UTF-8".into())
        })?);
    }
    let out = run_command("git", &args, Some(ws.root()), GIT_TIMEOUT, cancel).await?;
    Ok(git_result(out.exit_code, out.stdout, out.stderr))
}

pub async fn git_commit(
    ws: &WorkspaceResolver,
    req: GitCommitRequest,
    cancel: &CancellationToken,
) -> Result<Value> {
    if req.message.trim().is_empty() {
        return Err(Error::InvalidParameter(
            "commit message must not be empty".into(),
        ));
    }
    if req.stage_all {
        let add = run_command(
            "git",
            &["add", "-A"],
            Some(ws.root()),
            GIT_TIMEOUT,
            cancel,
        )
        .await?;
        if add.exit_code != Some(0) {
            return Ok(git_result(add.exit_code, add.stdout, add.stderr));
        }
    }
    let out = run_command(
        "git",
        &["commit", "-m", &req.message],
        Some(ws.root()),
        GIT_TIMEOUT,
        cancel,
    )
    .await?;
    Ok(git_result(out.exit_code, out.stdout, out.stderr))
}

fn git_result(exit_code: Option<i32>, stdout: String, stderr: String) -> Value {
    serde_json::json!({
        "exit_code": exit_code,
        "output": if stdout.is_empty() { stderr } else { stdout },
        "ok": exit_code == Some(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws() -> (tempfile::TempDir, WorkspaceResolver) {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceResolver::new(dir.path().to_path_buf());
        (dir, ws)
    }

    #[tokio::test]
    async fn status_outside_a_repo_reports_failure() {
        let (_dir, ws) = ws();
        let out = git_status(&ws, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["ok"], false);
    }

    #[tokio::test]
    async fn empty_commit_message_is_invalid() {
        let (_dir, ws) = ws();
        let err = git_commit(
            &ws,
            GitCommitRequest {
                message: "  ".into(),
                stage_all: false,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }

    #[tokio::test]
    async fn diff_path_is_workspace_checked() {
        let (_dir, ws) = ws();
        let err = git_diff(
            &ws,
            GitDiffRequest {
                path: Some("../outside".into()),
                staged: false,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "security");
    }
}
