//! Filesystem tools — safe, auditable file I/O constrained to the workspace.
//!
//! All paths arrive as workspace-relative strings and are validated by the
//! [`WorkspaceResolver`] before any I/O. Results are structured JSON.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use hb_domain::{Error, Result};

use crate::workspace::WorkspaceResolver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct FileReadRequest {
    pub path: String,
    /// Line number to start from (0-indexed).
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum number of lines to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileWriteRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileMoveRequest {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilePathRequest {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileListRequest {
    #[serde(default = "default_dot")]
    pub path: String,
}

fn default_dot() -> String {
    ".".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read file contents with optional line offset and limit.
pub async fn file_read(ws: &WorkspaceResolver, req: FileReadRequest) -> Result<Value> {
    let path = ws.resolve(&req.path)?;

    let content = fs::read_to_string(&path).await.map_err(|e| read_err(&req.path, e))?;

    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();
    let offset = req.offset.unwrap_or(0);
    let limit = req.limit.unwrap_or(total_lines.saturating_sub(offset));
    let selected: Vec<&str> = lines.into_iter().skip(offset).take(limit).collect();

    Ok(serde_json::json!({
        "path": req.path,
        "content": selected.join("\n"),
        "total_lines": total_lines,
        "offset": offset,
        "lines_returned": selected.len(),
    }))
}

/// Write/create a file atomically (write to a .tmp sibling, then rename).
pub async fn file_write(ws: &WorkspaceResolver, req: FileWriteRequest) -> Result<Value> {
    let path = ws.resolve(&req.path)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Internal(format!("creating parent dirs: {e}")))?;
    }

    let tmp = path.with_extension("hb-tmp");
    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| Error::Internal(format!("creating '{}': {e}", req.path)))?;
    file.write_all(req.content.as_bytes())
        .await
        .map_err(|e| Error::Internal(format!("writing '{}': {e}", req.path)))?;
    file.flush().await.ok();
    drop(file);
    fs::rename(&tmp, &path)
        .await
        .map_err(|e| Error::Internal(format!("renaming into place: {e}")))?;

    Ok(serde_json::json!({
        "path": req.path,
        "bytes_written": req.content.len(),
    }))
}

/// Append to a file, creating it if absent.
pub async fn file_append(ws: &WorkspaceResolver, req: FileWriteRequest) -> Result<Value> {
    let path = ws.resolve(&req.path)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Internal(format!("creating parent dirs: {e}")))?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| Error::Internal(format!("opening '{}': {e}", req.path)))?;
    file.write_all(req.content.as_bytes())
        .await
        .map_err(|e| Error::Internal(format!("appending to '{}': {e}", req.path)))?;

    Ok(serde_json::json!({
        "path": req.path,
        "bytes_appended": req.content.len(),
    }))
}

/// Delete a file or an empty directory.
pub async fn file_delete(ws: &WorkspaceResolver, req: FilePathRequest) -> Result<Value> {
    let path = ws.resolve(&req.path)?;
    let meta = fs::metadata(&path).await.map_err(|e| read_err(&req.path, e))?;

    if meta.is_dir() {
        fs::remove_dir(&path)
            .await
            .map_err(|e| Error::Internal(format!("removing directory '{}': {e}", req.path)))?;
    } else {
        fs::remove_file(&path)
            .await
            .map_err(|e| Error::Internal(format!("removing '{}': {e}", req.path)))?;
    }

    Ok(serde_json::json!({ "path": req.path, "deleted": true }))
}

/// Move/rename within the workspace.
pub async fn file_move(ws: &WorkspaceResolver, req: FileMoveRequest) -> Result<Value> {
    let source = ws.resolve(&req.source)?;
    let destination = ws.resolve(&req.destination)?;

    if !source.exists() {
        return Err(Error::NotFound(format!(
            "file '{}' does not exist",
            req.source
        )));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Internal(format!("creating parent dirs: {e}")))?;
    }
    fs::rename(&source, &destination)
        .await
        .map_err(|e| Error::Internal(format!("moving '{}': {e}", req.source)))?;

    Ok(serde_json::json!({
        "source": req.source,
        "destination": req.destination,
        "moved": true,
    }))
}

/// Create a directory (and any missing parents).
pub async fn file_mkdir(ws: &WorkspaceResolver, req: FilePathRequest) -> Result<Value> {
    let path = ws.resolve(&req.path)?;
    fs::create_dir_all(&path)
        .await
        .map_err(|e| Error::Internal(format!("creating '{}': {e}", req.path)))?;
    Ok(serde_json::json!({ "path": req.path, "created": true }))
}

/// List a directory with entry metadata.
pub async fn file_list(ws: &WorkspaceResolver, req: FileListRequest) -> Result<Value> {
    let path = ws.resolve(&req.path)?;

    let mut read = fs::read_dir(&path).await.map_err(|e| read_err(&req.path, e))?;
    let mut entries = Vec::new();
    while let Ok(Some(entry)) = read.next_entry().await {
        let meta = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        entries.push(serde_json::json!({
            "name": entry.file_name().to_string_lossy(),
            "size": meta.len(),
            "modified": modified.to_rfc3339(),
            "is_dir": meta.is_dir(),
        }));
    }
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    Ok(serde_json::json!({
        "path": req.path,
        "entries": entries,
        "count": entries.len(),
    }))
}

fn read_err(path: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("file '{path}' does not exist"))
    } else {
        Error::Internal(format!("reading '{path}': {e}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn ws() -> (tempfile::TempDir, WorkspaceResolver) {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceResolver::new(dir.path().to_path_buf());
        (dir, ws)
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let (_dir, ws) = ws();
        let written = file_write(
            &ws,
            FileWriteRequest {
                path: "notes/hello.txt".into(),
                content: "line1\nline2\nline3".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(written["bytes_written"], 17);

        let read = file_read(
            &ws,
            FileReadRequest {
                path: "notes/hello.txt".into(),
                offset: Some(1),
                limit: Some(1),
            },
        )
        .await
        .unwrap();
        assert_eq!(read["content"], "line2");
        assert_eq!(read["total_lines"], 3);
    }

    #[tokio::test]
    async fn write_to_parent_traversal_is_security_error() {
        let (_dir, ws) = ws();
        let err = file_write(
            &ws,
            FileWriteRequest {
                path: "../x".into(),
                content: "x".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "security");
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found_with_suggestion() {
        let (_dir, ws) = ws();
        let err = file_read(
            &ws,
            FileReadRequest {
                path: "missing.txt".into(),
                offset: None,
                limit: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.suggestion_tool(), Some("fs_list"));
    }

    #[tokio::test]
    async fn append_creates_and_extends() {
        let (_dir, ws) = ws();
        for part in ["a", "b"] {
            file_append(
                &ws,
                FileWriteRequest {
                    path: "log.txt".into(),
                    content: part.into(),
                },
            )
            .await
            .unwrap();
        }
        let read = file_read(
            &ws,
            FileReadRequest {
                path: "log.txt".into(),
                offset: None,
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(read["content"], "ab");
    }

    #[tokio::test]
    async fn move_then_delete() {
        let (_dir, ws) = ws();
        file_write(
            &ws,
            FileWriteRequest {
                path: "a.txt".into(),
                content: "x".into(),
            },
        )
        .await
        .unwrap();

        file_move(
            &ws,
            FileMoveRequest {
                source: "a.txt".into(),
                destination: "b/c.txt".into(),
            },
        )
        .await
        .unwrap();

        let listed = file_list(
            &ws,
            FileListRequest { path: "b".into() },
        )
        .await
        .unwrap();
        assert_eq!(listed["count"], 1);

        file_delete(&ws, FilePathRequest { path: "b/c.txt".into() })
            .await
            .unwrap();
        let listed = file_list(&ws, FileListRequest { path: "b".into() })
            .await
            .unwrap();
        assert_eq!(listed["count"], 0);
    }

    #[tokio::test]
    async fn mkdir_creates_nested_dirs() {
        let (dir, ws) = ws();
        file_mkdir(&ws, FilePathRequest { path: "x/y/z".into() })
            .await
            .unwrap();
        assert!(dir.path().join("x/y/z").is_dir());
    }
}
