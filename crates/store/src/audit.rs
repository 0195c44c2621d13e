//! Append-only audit log.
//!
//! Exactly one entry is written per invocation that leaves the dispatch
//! engine; entries are never updated. `request_params_template` holds the
//! params as received, so secret templates stay unexpanded on disk.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use hb_domain::{Error, Result};

use crate::db::Db;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
    Blocked,
    HitlApproved,
    HitlRejected,
    HitlExpired,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Error => "error",
            AuditStatus::Blocked => "blocked",
            AuditStatus::HitlApproved => "hitl_approved",
            AuditStatus::HitlRejected => "hitl_rejected",
            AuditStatus::HitlExpired => "hitl_expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AuditStatus::Success),
            "error" => Some(AuditStatus::Error),
            "blocked" => Some(AuditStatus::Blocked),
            "hitl_approved" => Some(AuditStatus::HitlApproved),
            "hitl_rejected" => Some(AuditStatus::HitlRejected),
            "hitl_expired" => Some(AuditStatus::HitlExpired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,
    pub tool_category: String,
    pub tool_name: String,
    pub status: AuditStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Params as received — templates unexpanded, never secret values.
    pub request_params_template: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_summary: Option<String>,
}

/// Query filter; all fields combine with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub tool_category: Option<String>,
    pub tool_name: Option<String>,
    pub status: Option<AuditStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Substring match over tool name and error message.
    pub text: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AuditStore {
    db: Arc<Db>,
}

impl AuditStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Append an entry. Returns the entry back for event fan-out.
    pub fn append(&self, entry: AuditEntry) -> Result<AuditEntry> {
        let params_json = serde_json::to_string(&entry.request_params_template)
            .map_err(|e| Error::Internal(format!("serializing audit params: {e}")))?;
        self.db.with_conn(|c| {
            c.execute(
                "INSERT INTO audit_entries
                 (id, timestamp, protocol, tool_category, tool_name, status,
                  duration_ms, error_message, request_params_template, response_summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.id,
                    entry.timestamp.to_rfc3339(),
                    entry.protocol,
                    entry.tool_category,
                    entry.tool_name,
                    entry.status.as_str(),
                    entry.duration_ms as i64,
                    entry.error_message,
                    params_json,
                    entry.response_summary,
                ],
            )
        })?;
        Ok(entry)
    }

    /// Query entries, newest first.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut sql = String::from(
            "SELECT id, timestamp, protocol, tool_category, tool_name, status,
                    duration_ms, error_message, request_params_template, response_summary
             FROM audit_entries WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref cat) = filter.tool_category {
            sql.push_str(" AND tool_category = ?");
            args.push(Box::new(cat.clone()));
        }
        if let Some(ref name) = filter.tool_name {
            sql.push_str(" AND tool_name = ?");
            args.push(Box::new(name.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str().to_owned()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND timestamp <= ?");
            args.push(Box::new(until.to_rfc3339()));
        }
        if let Some(ref text) = filter.text {
            sql.push_str(
                " AND (LOWER(tool_name) LIKE ? OR LOWER(COALESCE(error_message,'')) LIKE ?)",
            );
            let needle = format!("%{}%", text.to_lowercase());
            args.push(Box::new(needle.clone()));
            args.push(Box::new(needle));
        }

        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");
        args.push(Box::new(filter.limit.unwrap_or(100) as i64));
        args.push(Box::new(filter.offset.unwrap_or(0) as i64));

        self.db.with_conn(|c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_entry,
            )?;
            rows.collect()
        })
    }

    /// Export the filtered set as JSON or CSV.
    pub fn export(&self, filter: &AuditFilter, format: ExportFormat) -> Result<String> {
        let entries = self.query(filter)?;
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&entries)
                .map_err(|e| Error::Internal(format!("export: {e}"))),
            ExportFormat::Csv => Ok(to_csv(&entries)),
        }
    }

    /// Delete entries older than `retention_days`. Returns the count removed.
    /// A horizon of 0 disables the sweep.
    pub fn sweep(&self, retention_days: u32) -> Result<usize> {
        if retention_days == 0 {
            return Ok(0);
        }
        let horizon = Utc::now() - Duration::days(i64::from(retention_days));
        let removed = self.db.with_conn(|c| {
            c.execute(
                "DELETE FROM audit_entries WHERE timestamp < ?1",
                params![horizon.to_rfc3339()],
            )
        })?;
        if removed > 0 {
            tracing::info!(removed, retention_days, "audit sweep removed old entries");
        }
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize> {
        self.db.with_conn(|c| {
            c.query_row("SELECT COUNT(*) FROM audit_entries", [], |r| {
                r.get::<_, i64>(0).map(|n| n as usize)
            })
        })
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let ts: String = row.get(1)?;
    let status: String = row.get(5)?;
    let params_raw: String = row.get(8)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: DateTime::parse_from_rfc3339(&ts)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        protocol: row.get(2)?,
        tool_category: row.get(3)?,
        tool_name: row.get(4)?,
        status: AuditStatus::parse(&status).unwrap_or(AuditStatus::Error),
        duration_ms: row.get::<_, i64>(6)? as u64,
        error_message: row.get(7)?,
        request_params_template: serde_json::from_str(&params_raw)
            .unwrap_or(Value::Null),
        response_summary: row.get(9)?,
    })
}

fn to_csv(entries: &[AuditEntry]) -> String {
    let mut out = String::from(
        "id,timestamp,protocol,tool_category,tool_name,status,duration_ms,error_message,response_summary\n",
    );
    for e in entries {
        let fields = [
            e.id.clone(),
            e.timestamp.to_rfc3339(),
            e.protocol.clone(),
            e.tool_category.clone(),
            e.tool_name.clone(),
            e.status.as_str().to_owned(),
            e.duration_ms.to_string(),
            e.error_message.clone().unwrap_or_default(),
            e.response_summary.clone().unwrap_or_default(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> AuditStore {
        AuditStore::new(Arc::new(Db::open_in_memory().unwrap()))
    }

    fn entry(status: AuditStatus, tool: &str) -> AuditEntry {
        AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            protocol: "rest".into(),
            tool_category: "fs".into(),
            tool_name: tool.into(),
            status,
            duration_ms: 12,
            error_message: None,
            request_params_template: json!({ "path": "a.txt" }),
            response_summary: Some("{\"ok\":true}".into()),
        }
    }

    #[test]
    fn append_then_query_roundtrips() {
        let store = store();
        let e = store.append(entry(AuditStatus::Success, "read")).unwrap();
        let got = store.query(&AuditFilter::default()).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, e.id);
        assert_eq!(got[0].status, AuditStatus::Success);
        assert_eq!(got[0].request_params_template["path"], "a.txt");
    }

    #[test]
    fn filter_by_status() {
        let store = store();
        store.append(entry(AuditStatus::Success, "read")).unwrap();
        store.append(entry(AuditStatus::Blocked, "write")).unwrap();

        let blocked = store
            .query(&AuditFilter {
                status: Some(AuditStatus::Blocked),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].tool_name, "write");
    }

    #[test]
    fn text_search_matches_error_message() {
        let store = store();
        let mut e = entry(AuditStatus::Error, "read");
        e.error_message = Some("not found: file 'missing.txt'".into());
        store.append(e).unwrap();
        store.append(entry(AuditStatus::Success, "read")).unwrap();

        let hits = store
            .query(&AuditFilter {
                text: Some("MISSING.TXT".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn pagination_applies_limit_and_offset() {
        let store = store();
        for _ in 0..5 {
            store.append(entry(AuditStatus::Success, "read")).unwrap();
        }
        let page = store
            .query(&AuditFilter {
                limit: Some(2),
                offset: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn csv_export_escapes_quotes_and_commas() {
        let store = store();
        let mut e = entry(AuditStatus::Error, "run");
        e.error_message = Some("bad \"arg\", try again".into());
        store.append(e).unwrap();

        let csv = store
            .export(&AuditFilter::default(), ExportFormat::Csv)
            .unwrap();
        assert!(csv.starts_with("id,timestamp"));
        assert!(csv.contains("\"bad \"\"arg\"\", try again\""));
    }

    #[test]
    fn sweep_removes_only_old_entries() {
        let store = store();
        let mut old = entry(AuditStatus::Success, "read");
        old.timestamp = Utc::now() - Duration::days(30);
        store.append(old).unwrap();
        store.append(entry(AuditStatus::Success, "read")).unwrap();

        let removed = store.sweep(7).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn sweep_with_zero_horizon_is_a_noop() {
        let store = store();
        store.append(entry(AuditStatus::Success, "read")).unwrap();
        assert_eq!(store.sweep(0).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);
    }
}
