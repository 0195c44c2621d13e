//! SQLite connection handling.
//!
//! A single connection behind a mutex serializes all writes; reads share the
//! same lock. WAL keeps readers from blocking the writer on disk.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use hb_domain::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_entries (
    id                      TEXT PRIMARY KEY,
    timestamp               TEXT NOT NULL,
    protocol                TEXT NOT NULL,
    tool_category           TEXT NOT NULL,
    tool_name               TEXT NOT NULL,
    status                  TEXT NOT NULL,
    duration_ms             INTEGER NOT NULL,
    error_message           TEXT,
    request_params_template TEXT NOT NULL,
    response_summary        TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries (timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_tool
    ON audit_entries (tool_category, tool_name, status);

CREATE TABLE IF NOT EXISTS memory_nodes (
    id          TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    content     TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    tags        TEXT NOT NULL DEFAULT '[]',
    metadata    TEXT NOT NULL DEFAULT '{}',
    source      TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memory_edges (
    source_id   TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    relation    TEXT NOT NULL,
    weight      REAL NOT NULL DEFAULT 1.0,
    metadata    TEXT NOT NULL DEFAULT '{}',
    valid_from  TEXT,
    valid_until TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, relation)
);
CREATE INDEX IF NOT EXISTS idx_edges_target ON memory_edges (target_id, relation);

CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    name, content, tags,
    content='memory_nodes',
    content_rowid='rowid'
);
"#;

/// Handle to the single HostBridge database file.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("creating data dir: {e}")))?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn).map_err(db_err)
    }

    /// Run `f` inside a transaction; rolls back on error.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let out = f(&tx).map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(out)
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Internal(format!("sqlite: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_applies_schema() {
        let db = Db::open_in_memory().unwrap();
        let count: i64 = db
            .with_conn(|c| {
                c.query_row("SELECT COUNT(*) FROM audit_entries", [], |r| r.get(0))
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/hostbridge.db");
        let _db = Db::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostbridge.db");
        drop(Db::open(&path).unwrap());
        // Re-opening runs the migrations again without error.
        let _db = Db::open(&path).unwrap();
    }
}
