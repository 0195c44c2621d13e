//! Docker tools — read-only subprocess wrappers over the docker CLI.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use hb_domain::{Error, Result};

use crate::command::run_command;

const DOCKER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerPsRequest {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerLogsRequest {
    pub container: String,
    #[serde(default = "d_100")]
    pub tail: usize,
}

fn d_100() -> usize {
    100
}

// Container names and ids: no room for flag injection.
fn validate_container_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && !name.starts_with('-');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "invalid container name '{name}'"
        )))
    }
}

pub async fn docker_ps(req: DockerPsRequest, cancel: &CancellationToken) -> Result<Value> {
    let mut args = vec![
        "ps",
        "--format",
        "{{.ID}}\t{{.Image}}\t{{.Status}}\t{{.Names}}",
    ];
    if req.all {
        args.push("--all");
    }
    let out = run_command("docker", &args, None, DOCKER_TIMEOUT, cancel).await?;
    docker_result(out.exit_code, out.stdout, out.stderr)
}

pub async fn docker_images(cancel: &CancellationToken) -> Result<Value> {
    let out = run_command(
        "docker",
        &[
            "images",
            "--format",
            "{{.Repository}}\t{{.Tag}}\t{{.ID}}\t{{.Size}}",
        ],
        None,
        DOCKER_TIMEOUT,
        cancel,
    )
    .await?;
    docker_result(out.exit_code, out.stdout, out.stderr)
}

pub async fn docker_logs(req: DockerLogsRequest, cancel: &CancellationToken) -> Result<Value> {
    validate_container_name(&req.container)?;
    let tail = req.tail.clamp(1, 5000).to_string();
    let out = run_command(
        "docker",
        &["logs", "--tail", &tail, &req.container],
        None,
        DOCKER_TIMEOUT,
        cancel,
    )
    .await?;
    docker_result(out.exit_code, out.stdout, out.stderr)
}

fn docker_result(exit_code: Option<i32>, stdout: String, stderr: String) -> Result<Value> {
    if exit_code == Some(0) {
        Ok(serde_json::json!({ "output": stdout, "ok": true }))
    } else if stderr.contains("No such container") {
        Err(Error::NotFound(stderr.trim().to_owned()))
    } else {
        Ok(serde_json::json!({
            "output": if stderr.is_empty() { stdout } else { stderr },
            "ok": false,
            "exit_code": exit_code,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_validation() {
        assert!(validate_container_name("web-1").is_ok());
        assert!(validate_container_name("abc123def").is_ok());
        assert!(validate_container_name("").is_err());
        assert!(validate_container_name("--privileged").is_err());
        assert!(validate_container_name("a b").is_err());
        assert!(validate_container_name("a;rm").is_err());
    }

    #[tokio::test]
    async fn logs_with_bad_name_fail_before_spawn() {
        let err = docker_logs(
            DockerLogsRequest {
                container: "--follow".into(),
                tail: 10,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }
}
