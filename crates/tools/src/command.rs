//! Shared subprocess runner for the git and docker wrappers.
//!
//! Fixed argv only — nothing here goes through a shell. Output is captured
//! whole; the select loop races completion against the timeout and the
//! caller's cancellation token.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use hb_domain::{Error, Result};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` with `args`, capturing stdout/stderr.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Internal(format!("'{program}' is not installed or not on PATH"))
        } else {
            Error::Internal(format!("failed to spawn '{program}': {e}"))
        }
    })?;

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
            result.map_err(|e| Error::Internal(format!("waiting for '{program}': {e}")))?
        }
        _ = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            return Err(Error::Timeout(format!(
                "'{program}' exceeded {}s", timeout.as_secs()
            )));
        }
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(Error::Internal(format!("'{program}' cancelled by caller")));
        }
    };

    Ok(CommandOutput {
        exit_code: status.code(),
        stdout: stdout_task.await.unwrap_or_default(),
        stderr: stderr_task.await.unwrap_or_default(),
    })
}
