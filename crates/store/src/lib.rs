//! Durable state for HostBridge: one SQLite database file holding the audit
//! log and the memory graph (nodes, edges, full-text index).
//!
//! Plans and pending approvals are deliberately *not* here — they live in
//! memory only and die with the process.

pub mod audit;
pub mod db;
pub mod graph;

pub use audit::{AuditEntry, AuditFilter, AuditStatus, AuditStore, ExportFormat};
pub use db::Db;
pub use graph::{
    DeleteOutcome, EdgeSpec, EntityType, GraphStats, LinkArgs, MemoryEdge, MemoryGraph,
    MemoryNode, NewNode, NodePatch, SearchMode, SearchQuery,
};
