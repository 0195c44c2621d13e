//! Workspace resolver — the single component that validates raw paths.
//!
//! One root directory is configured at startup; every incoming path is
//! normalized, symlink-resolved, and checked to be a strict descendant of
//! that root. Violations are `security` errors and carry the word
//! "workspace" so callers can tell a containment failure from a missing
//! file.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use hb_domain::{Error, Result};

#[derive(Debug, Clone)]
pub struct WorkspaceResolver {
    root: PathBuf,
}

impl WorkspaceResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate and resolve a requested path within the workspace root.
    ///
    /// The request must be relative, null-free, and free of `..`. The path
    /// is then rebuilt one component at a time on top of the canonical
    /// root: every component that exists on disk is symlink-resolved and
    /// re-checked for containment before descending further, so a link
    /// planted anywhere along the way cannot step outside. Components past
    /// the first missing one are appended as-is — nothing that does not
    /// exist yet can be a symlink, and `..` was already ruled out.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf> {
        if requested.contains('\0') {
            return Err(Error::Security(
                "path contains a null byte; workspace paths must be plain text".into(),
            ));
        }

        let requested_path = Path::new(requested);
        if requested_path.is_absolute() {
            return Err(Error::Security(format!(
                "absolute paths are not allowed; use a path relative to the workspace root (got '{requested}')"
            )));
        }

        let root = self.root.canonicalize().map_err(|e| {
            Error::Internal(format!(
                "cannot resolve workspace root '{}': {e}",
                self.root.display()
            ))
        })?;

        let mut resolved = root.clone();
        // Set once a component is missing from disk; from that point the
        // remainder is purely lexical.
        let mut building = false;

        for component in requested_path.components() {
            let part = match component {
                Component::Normal(part) => part,
                Component::CurDir => continue,
                Component::ParentDir => {
                    return Err(Error::Security(
                        "path must not contain '..' components; it would escape the workspace"
                            .into(),
                    ));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::Security(format!(
                        "path '{requested}' is not relative to the workspace"
                    )));
                }
            };

            resolved.push(part);
            if building {
                continue;
            }
            match resolved.canonicalize() {
                Ok(real) => {
                    if !real.starts_with(&root) {
                        return Err(Error::Security(format!(
                            "path '{requested}' escapes the workspace root"
                        )));
                    }
                    resolved = real;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    building = true;
                }
                Err(e) => {
                    return Err(Error::Internal(format!(
                        "cannot resolve '{}': {e}",
                        resolved.display()
                    )));
                }
            }
        }

        Ok(resolved)
    }

    /// Root metadata for the `workspace.info` tool.
    pub fn info(&self) -> Result<Value> {
        let canonical = self.root.canonicalize().map_err(|e| {
            Error::Internal(format!("cannot resolve workspace root: {e}"))
        })?;
        let mut entries = 0usize;
        if let Ok(read) = std::fs::read_dir(&canonical) {
            entries = read.count();
        }
        Ok(serde_json::json!({
            "root": canonical.display().to_string(),
            "top_level_entries": entries,
        }))
    }

    /// Bounded directory tree for the `workspace.tree` tool.
    pub fn tree(&self, path: &str, max_depth: u32) -> Result<Value> {
        let start = self.resolve(path)?;
        if !start.is_dir() {
            return Err(Error::NotFound(format!(
                "path '{path}' is not a directory"
            )));
        }
        let max_depth = max_depth.clamp(1, 8);
        Ok(tree_level(&start, max_depth))
    }
}

fn tree_level(dir: &Path, depth_left: u32) -> Value {
    let mut entries = Vec::new();
    let Ok(read) = std::fs::read_dir(dir) else {
        return Value::Array(entries);
    };
    let mut items: Vec<_> = read.flatten().collect();
    items.sort_by_key(|e| e.file_name());
    for item in items {
        let name = item.file_name().to_string_lossy().into_owned();
        let is_dir = item.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && depth_left > 1 {
            entries.push(serde_json::json!({
                "name": name,
                "dir": true,
                "children": tree_level(&item.path(), depth_left - 1),
            }));
        } else {
            entries.push(serde_json::json!({ "name": name, "dir": is_dir }));
        }
    }
    Value::Array(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> (tempfile::TempDir, WorkspaceResolver) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = WorkspaceResolver::new(dir.path().to_path_buf());
        (dir, resolver)
    }

    #[test]
    fn resolves_relative_path_inside_root() {
        let (dir, resolver) = resolver();
        let resolved = resolver.resolve("sub/file.txt").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
        assert!(resolved.ends_with("sub/file.txt"));
    }

    #[test]
    fn rejects_parent_traversal() {
        let (_dir, resolver) = resolver();
        let err = resolver.resolve("../x").unwrap_err();
        assert_eq!(err.kind(), "security");
        assert!(err.to_string().contains("workspace"));
    }

    #[test]
    fn rejects_embedded_parent_traversal() {
        let (_dir, resolver) = resolver();
        assert!(resolver.resolve("a/../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_null_byte() {
        let (_dir, resolver) = resolver();
        let err = resolver.resolve("a\0b").unwrap_err();
        assert_eq!(err.kind(), "security");
    }

    #[test]
    fn rejects_absolute_path() {
        let (_dir, resolver) = resolver();
        let err = resolver.resolve("/etc/passwd").unwrap_err();
        assert_eq!(err.kind(), "security");
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_root() {
        let (dir, resolver) = resolver();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let err = resolver.resolve("escape/secret.txt").unwrap_err();
        assert_eq!(err.kind(), "security");
    }

    #[test]
    fn accepted_paths_are_descendants_of_root() {
        let (dir, resolver) = resolver();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        for p in ["x.txt", "a/y.txt", "a/b/z.txt"] {
            let resolved = resolver.resolve(p).unwrap();
            assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
        }
    }

    #[test]
    fn tree_is_depth_bounded() {
        let (dir, resolver) = resolver();
        std::fs::create_dir_all(dir.path().join("a/b/c/d")).unwrap();
        let tree = resolver.tree(".", 2).unwrap();
        let level1 = &tree[0];
        assert_eq!(level1["name"], "a");
        // Depth 2 shows a/b but not b's children.
        assert_eq!(level1["children"][0]["name"], "b");
        assert!(level1["children"][0].get("children").is_none());
    }
}
