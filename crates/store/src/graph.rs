//! Memory graph — content-addressed nodes with typed edges, a full-text
//! index, and bounded hierarchy traversals.
//!
//! `parent_of` is the only relation that participates in hierarchy queries
//! (`children`, `ancestors`, `subtree`, `roots`). Everything else is plain
//! graph data surfaced by `related`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use hb_domain::{Error, Result};

use crate::db::Db;

/// The relation that defines the hierarchy.
pub const PARENT_OF: &str = "parent_of";

/// Default bound for recursive traversals.
pub const DEFAULT_TRAVERSAL_DEPTH: u32 = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Concept,
    Fact,
    Task,
    Person,
    Event,
    #[default]
    Note,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Concept => "concept",
            EntityType::Fact => "fact",
            EntityType::Task => "task",
            EntityType::Person => "person",
            EntityType::Event => "event",
            EntityType::Note => "note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "concept" => Some(EntityType::Concept),
            "fact" => Some(EntityType::Fact),
            "task" => Some(EntityType::Task),
            "person" => Some(EntityType::Person),
            "event" => Some(EntityType::Event),
            "note" => Some(EntityType::Note),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: String,
    pub name: String,
    pub content: String,
    pub entity_type: EntityType,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEdge {
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    pub weight: f64,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

/// Input for `store`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewNode {
    pub content: String,
    /// Defaults to the first 60 characters of `content`.
    pub name: Option<String>,
    #[serde(default)]
    pub entity_type: EntityType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: Option<String>,
}

/// An initial edge attached at `store` time.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeSpec {
    pub target: String,
    pub relation: String,
    #[serde(default = "d_weight")]
    pub weight: f64,
    /// When true the edge points from `target` to the new node.
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn d_weight() -> f64 {
    1.0
}

/// Input for `update`. Tags replace wholesale; metadata is patch-merged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePatch {
    pub name: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Fulltext,
    Tags,
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default = "d_max_results")]
    pub max_results: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            mode: SearchMode::default(),
            entity_type: None,
            tags: Vec::new(),
            created_after: None,
            created_before: None,
            max_results: d_max_results(),
        }
    }
}

fn d_max_results() -> usize {
    20
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub node: MemoryNode,
    /// BM25 rank for full-text matches (lower is better); absent for
    /// tag-only matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Serialize)]
pub struct Neighbor {
    pub edge: MemoryEdge,
    pub direction: EdgeDirection,
    pub neighbor_id: String,
    pub neighbor_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeWithRelations {
    #[serde(flatten)]
    pub node: MemoryNode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<Neighbor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraversalNode {
    #[serde(flatten)]
    pub node: MemoryNode,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Everything removed, including cascaded orphans.
    Deleted { ids: Vec<String> },
    /// Refused: these children would have been orphaned. Nothing deleted.
    WouldOrphan { orphans: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub nodes_by_type: HashMap<String, usize>,
    pub edge_count: usize,
    /// Top five nodes by incident-edge count: (id, name, degree).
    pub most_connected: Vec<(String, String, usize)>,
    /// Nodes with no edges at all.
    pub orphan_count: usize,
    pub tag_frequency: HashMap<String, usize>,
}

/// Upsert input for `link`.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkArgs {
    pub source: String,
    pub target: String,
    pub relation: String,
    #[serde(default = "d_weight")]
    pub weight: f64,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Graph store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemoryGraph {
    db: Arc<Db>,
}

impl MemoryGraph {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Insert a node (and optional initial edges) and index it.
    pub fn store(&self, new: NewNode, initial_edges: Vec<EdgeSpec>) -> Result<MemoryNode> {
        if new.content.is_empty() {
            return Err(Error::InvalidParameter("content must not be empty".into()));
        }
        let now = Utc::now();
        let node = MemoryNode {
            id: Uuid::new_v4().to_string(),
            name: new
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| new.content.chars().take(60).collect()),
            content: new.content,
            entity_type: new.entity_type,
            tags: new.tags,
            metadata: new.metadata,
            source: new.source,
            created_at: now,
            updated_at: now,
        };

        // Edge targets must exist before we open the write transaction.
        for spec in &initial_edges {
            if self.fetch_node(&spec.target)?.is_none() {
                return Err(Error::NotFound(format!(
                    "memory node '{}' does not exist",
                    spec.target
                )));
            }
        }

        self.db.with_tx(|tx| {
            insert_node(tx, &node)?;
            let rowid = tx.last_insert_rowid();
            fts_insert(tx, rowid, &node)?;
            for spec in &initial_edges {
                let (src, dst) = if spec.reverse {
                    (spec.target.as_str(), node.id.as_str())
                } else {
                    (node.id.as_str(), spec.target.as_str())
                };
                upsert_edge(
                    tx,
                    src,
                    dst,
                    &spec.relation,
                    spec.weight,
                    &spec.metadata,
                    None,
                    None,
                )?;
            }
            Ok(())
        })?;

        Ok(node)
    }

    /// Fetch a node, optionally with its immediate neighbors.
    pub fn get(&self, id: &str, include_relations: bool) -> Result<NodeWithRelations> {
        let node = self.require_node(id)?;
        let relations = if include_relations {
            self.neighbors_of(id, None)?
        } else {
            Vec::new()
        };
        Ok(NodeWithRelations { node, relations })
    }

    /// Search nodes. Fulltext uses BM25 over (name, content, tags); tags
    /// mode requires every supplied tag; hybrid unions both with full-text
    /// hits ranked first.
    pub fn search(&self, q: &SearchQuery) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if matches!(q.mode, SearchMode::Fulltext | SearchMode::Hybrid) {
            for (node, score) in self.fulltext(&q.query, q.max_results * 4)? {
                if Self::passes_filters(&node, q) && seen.insert(node.id.clone()) {
                    hits.push(SearchHit {
                        node,
                        score: Some(score),
                    });
                }
            }
        }

        if matches!(q.mode, SearchMode::Tags | SearchMode::Hybrid) {
            // Tag terms come from the explicit list; in hybrid mode with no
            // list, query tokens are tried as tags.
            let (terms, require_all) = if !q.tags.is_empty() {
                (q.tags.clone(), true)
            } else {
                (tokenize(&q.query), false)
            };
            if !terms.is_empty() {
                for node in self.all_nodes()? {
                    let matches = if require_all {
                        terms.iter().all(|t| node.tags.iter().any(|nt| nt == t))
                    } else {
                        terms.iter().any(|t| node.tags.iter().any(|nt| nt == t))
                    };
                    if matches && Self::passes_filters(&node, q) && seen.insert(node.id.clone())
                    {
                        hits.push(SearchHit { node, score: None });
                    }
                }
            }
        }

        hits.truncate(q.max_results);
        Ok(hits)
    }

    /// Update any subset of name/content/tags/metadata. Tags replace;
    /// metadata keys merge over the existing map.
    pub fn update(&self, id: &str, patch: NodePatch) -> Result<MemoryNode> {
        let old = self.require_node(id)?;

        let mut node = old.clone();
        if let Some(name) = patch.name {
            node.name = name;
        }
        if let Some(content) = patch.content {
            node.content = content;
        }
        if let Some(tags) = patch.tags {
            node.tags = tags;
        }
        if let Some(meta_patch) = patch.metadata {
            for (k, v) in meta_patch {
                node.metadata.insert(k, v);
            }
        }
        node.updated_at = Utc::now();

        self.db.with_tx(|tx| {
            let rowid = node_rowid(tx, id)?;
            fts_delete(tx, rowid, &old)?;
            tx.execute(
                "UPDATE memory_nodes
                 SET name = ?2, content = ?3, tags = ?4, metadata = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id,
                    node.name,
                    node.content,
                    json_string(&node.tags),
                    map_string(&node.metadata),
                    node.updated_at.to_rfc3339(),
                ],
            )?;
            fts_insert(tx, rowid, &node)?;
            Ok(())
        })?;

        Ok(node)
    }

    /// Delete a node and its incident edges.
    ///
    /// With `cascade = false` the delete is refused when any `parent_of`
    /// child would lose its only parent; the would-be orphans are returned
    /// untouched. With `cascade = true` orphaned children are deleted
    /// transitively.
    pub fn delete(&self, id: &str, cascade: bool) -> Result<DeleteOutcome> {
        self.require_node(id)?;

        let mut doomed: Vec<String> = vec![id.to_owned()];
        let mut doomed_set: HashSet<String> = doomed.iter().cloned().collect();
        let mut queue: VecDeque<String> = VecDeque::from([id.to_owned()]);
        let mut first_orphans: Vec<String> = Vec::new();

        while let Some(current) = queue.pop_front() {
            for child in self.child_ids(&current)? {
                if doomed_set.contains(&child) {
                    continue;
                }
                let orphaned = self
                    .parent_ids(&child)?
                    .into_iter()
                    .all(|p| doomed_set.contains(&p));
                if orphaned {
                    if current == id {
                        first_orphans.push(child.clone());
                    }
                    if cascade {
                        doomed_set.insert(child.clone());
                        doomed.push(child.clone());
                        queue.push_back(child);
                    }
                }
            }
        }

        if !cascade && !first_orphans.is_empty() {
            first_orphans.sort();
            return Ok(DeleteOutcome::WouldOrphan {
                orphans: first_orphans,
            });
        }

        self.db.with_tx(|tx| {
            for node_id in &doomed {
                let rowid = node_rowid(tx, node_id)?;
                let node = read_node_by_rowid(tx, rowid)?;
                fts_delete(tx, rowid, &node)?;
                tx.execute("DELETE FROM memory_nodes WHERE id = ?1", params![node_id])?;
                tx.execute(
                    "DELETE FROM memory_edges WHERE source_id = ?1 OR target_id = ?1",
                    params![node_id],
                )?;
            }
            Ok(())
        })?;

        Ok(DeleteOutcome::Deleted { ids: doomed })
    }

    /// Idempotent edge upsert on `(source, target, relation)`. Re-linking
    /// updates weight/metadata/validity instead of inserting a duplicate.
    pub fn link(&self, args: &LinkArgs) -> Result<Vec<MemoryEdge>> {
        self.require_node(&args.source)?;
        self.require_node(&args.target)?;
        if args.source == args.target {
            return Err(Error::InvalidParameter(
                "cannot link a node to itself".into(),
            ));
        }

        self.db.with_tx(|tx| {
            upsert_edge(
                tx,
                &args.source,
                &args.target,
                &args.relation,
                args.weight,
                &args.metadata,
                args.valid_from,
                args.valid_until,
            )?;
            if args.bidirectional {
                upsert_edge(
                    tx,
                    &args.target,
                    &args.source,
                    &args.relation,
                    args.weight,
                    &args.metadata,
                    args.valid_from,
                    args.valid_until,
                )?;
            }
            Ok(())
        })?;

        let mut edges = vec![self.fetch_edge(&args.source, &args.target, &args.relation)?];
        if args.bidirectional {
            edges.push(self.fetch_edge(&args.target, &args.source, &args.relation)?);
        }
        Ok(edges)
    }

    /// Direct `parent_of` children.
    pub fn children(&self, id: &str) -> Result<Vec<Neighbor>> {
        self.require_node(id)?;
        let all = self.neighbors_of(id, Some(PARENT_OF))?;
        Ok(all
            .into_iter()
            .filter(|n| n.direction == EdgeDirection::Outgoing)
            .collect())
    }

    /// Walk `parent_of` edges upward. Excludes the start node; bounded by
    /// `max_depth` (default 10).
    pub fn ancestors(&self, id: &str, max_depth: Option<u32>) -> Result<Vec<TraversalNode>> {
        self.traverse(id, max_depth, TraversalDirection::Up)
    }

    /// Walk `parent_of` edges downward. Does not include the root.
    pub fn subtree(&self, id: &str, max_depth: Option<u32>) -> Result<Vec<TraversalNode>> {
        self.traverse(id, max_depth, TraversalDirection::Down)
    }

    /// Nodes with no incoming `parent_of` edge.
    pub fn roots(&self) -> Result<Vec<MemoryNode>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT rowid FROM memory_nodes
                 WHERE id NOT IN
                   (SELECT target_id FROM memory_edges WHERE relation = ?1)
                 ORDER BY created_at",
            )?;
            let rowids: Vec<i64> = stmt
                .query_map(params![PARENT_OF], |r| r.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            rowids
                .into_iter()
                .map(|rowid| read_node_by_rowid(c, rowid))
                .collect()
        })
    }

    /// Union of outgoing and incoming edges, optionally filtered to one
    /// relation.
    pub fn related(&self, id: &str, relation: Option<&str>) -> Result<Vec<Neighbor>> {
        self.require_node(id)?;
        self.neighbors_of(id, relation)
    }

    pub fn stats(&self) -> Result<GraphStats> {
        let nodes = self.all_nodes()?;
        let node_count = nodes.len();

        let mut nodes_by_type: HashMap<String, usize> = HashMap::new();
        let mut tag_frequency: HashMap<String, usize> = HashMap::new();
        for node in &nodes {
            *nodes_by_type
                .entry(node.entity_type.as_str().to_owned())
                .or_default() += 1;
            for tag in &node.tags {
                *tag_frequency.entry(tag.clone()).or_default() += 1;
            }
        }

        let edge_count: usize = self.db.with_conn(|c| {
            c.query_row("SELECT COUNT(*) FROM memory_edges", [], |r| {
                r.get::<_, i64>(0).map(|n| n as usize)
            })
        })?;

        let mut degree: HashMap<String, usize> = HashMap::new();
        self.db.with_conn(|c| {
            let mut stmt = c.prepare("SELECT source_id, target_id FROM memory_edges")?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (src, dst) = row?;
                *degree.entry(src).or_default() += 1;
                *degree.entry(dst).or_default() += 1;
            }
            Ok(())
        })?;

        let name_of: HashMap<&str, &str> = nodes
            .iter()
            .map(|n| (n.id.as_str(), n.name.as_str()))
            .collect();
        let mut most_connected: Vec<(String, String, usize)> = degree
            .iter()
            .map(|(id, d)| {
                (
                    id.clone(),
                    name_of.get(id.as_str()).unwrap_or(&"").to_string(),
                    *d,
                )
            })
            .collect();
        most_connected.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));
        most_connected.truncate(5);

        let orphan_count = nodes
            .iter()
            .filter(|n| !degree.contains_key(n.id.as_str()))
            .count();

        Ok(GraphStats {
            node_count,
            nodes_by_type,
            edge_count,
            most_connected,
            orphan_count,
            tag_frequency,
        })
    }

    // ── internals ─────────────────────────────────────────────────

    fn traverse(
        &self,
        id: &str,
        max_depth: Option<u32>,
        direction: TraversalDirection,
    ) -> Result<Vec<TraversalNode>> {
        self.require_node(id)?;
        let max_depth = max_depth.unwrap_or(DEFAULT_TRAVERSAL_DEPTH);

        let mut out = Vec::new();
        let mut visited: HashSet<String> = HashSet::from([id.to_owned()]);
        let mut frontier: Vec<String> = vec![id.to_owned()];
        let mut depth = 0;

        while !frontier.is_empty() && depth < max_depth {
            depth += 1;
            let mut next = Vec::new();
            for current in &frontier {
                let linked = match direction {
                    TraversalDirection::Up => self.parent_ids(current)?,
                    TraversalDirection::Down => self.child_ids(current)?,
                };
                for other in linked {
                    if visited.insert(other.clone()) {
                        out.push(TraversalNode {
                            node: self.require_node(&other)?,
                            depth,
                        });
                        next.push(other);
                    }
                }
            }
            frontier = next;
        }

        Ok(out)
    }

    fn fulltext(&self, query: &str, limit: usize) -> Result<Vec<(MemoryNode, f64)>> {
        let match_expr = fts_match_expr(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT n.rowid, bm25(memory_fts) AS rank
                 FROM memory_fts
                 JOIN memory_nodes n ON n.rowid = memory_fts.rowid
                 WHERE memory_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
            )?;
            let rows: Vec<(i64, f64)> = stmt
                .query_map(params![match_expr, limit as i64], |r| {
                    Ok((r.get(0)?, r.get(1)?))
                })?
                .collect::<rusqlite::Result<_>>()?;
            rows.into_iter()
                .map(|(rowid, rank)| read_node_by_rowid(c, rowid).map(|n| (n, rank)))
                .collect()
        })
    }

    fn passes_filters(node: &MemoryNode, q: &SearchQuery) -> bool {
        if let Some(et) = q.entity_type {
            if node.entity_type != et {
                return false;
            }
        }
        if !q.tags.is_empty() && !q.tags.iter().all(|t| node.tags.iter().any(|nt| nt == t)) {
            return false;
        }
        if let Some(after) = q.created_after {
            if node.created_at < after {
                return false;
            }
        }
        if let Some(before) = q.created_before {
            if node.created_at > before {
                return false;
            }
        }
        true
    }

    fn all_nodes(&self) -> Result<Vec<MemoryNode>> {
        self.db.with_conn(|c| {
            let mut stmt =
                c.prepare("SELECT rowid FROM memory_nodes ORDER BY created_at")?;
            let rowids: Vec<i64> = stmt
                .query_map([], |r| r.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            rowids
                .into_iter()
                .map(|rowid| read_node_by_rowid(c, rowid))
                .collect()
        })
    }

    fn fetch_node(&self, id: &str) -> Result<Option<MemoryNode>> {
        self.db.with_conn(|c| {
            let rowid: Option<i64> = c
                .query_row(
                    "SELECT rowid FROM memory_nodes WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?;
            rowid.map(|r| read_node_by_rowid(c, r)).transpose()
        })
    }

    fn require_node(&self, id: &str) -> Result<MemoryNode> {
        self.fetch_node(id)?
            .ok_or_else(|| Error::NotFound(format!("memory node '{id}' does not exist")))
    }

    fn fetch_edge(&self, src: &str, dst: &str, relation: &str) -> Result<MemoryEdge> {
        self.db.with_conn(|c| {
            c.query_row(
                "SELECT source_id, target_id, relation, weight, metadata, valid_from, valid_until
                 FROM memory_edges
                 WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
                params![src, dst, relation],
                row_to_edge,
            )
        })
    }

    fn child_ids(&self, id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT target_id FROM memory_edges
                 WHERE source_id = ?1 AND relation = ?2",
            )?;
            let result = stmt.query_map(params![id, PARENT_OF], |r| r.get(0))?
                .collect();
            result
        })
    }

    fn parent_ids(&self, id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT source_id FROM memory_edges
                 WHERE target_id = ?1 AND relation = ?2",
            )?;
            let result = stmt.query_map(params![id, PARENT_OF], |r| r.get(0))?
                .collect();
            result
        })
    }

    fn neighbors_of(&self, id: &str, relation: Option<&str>) -> Result<Vec<Neighbor>> {
        let edges: Vec<MemoryEdge> = self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT source_id, target_id, relation, weight, metadata, valid_from, valid_until
                 FROM memory_edges
                 WHERE (source_id = ?1 OR target_id = ?1)
                   AND (?2 IS NULL OR relation = ?2)
                 ORDER BY relation, weight DESC",
            )?;
            let result = stmt.query_map(params![id, relation], row_to_edge)?.collect();
            result
        })?;

        let mut out = Vec::with_capacity(edges.len());
        for edge in edges {
            let (direction, neighbor_id) = if edge.source_id == id {
                (EdgeDirection::Outgoing, edge.target_id.clone())
            } else {
                (EdgeDirection::Incoming, edge.source_id.clone())
            };
            let neighbor_name = self
                .fetch_node(&neighbor_id)?
                .map(|n| n.name)
                .unwrap_or_default();
            out.push(Neighbor {
                edge,
                direction,
                neighbor_id,
                neighbor_name,
            });
        }
        Ok(out)
    }
}

enum TraversalDirection {
    Up,
    Down,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SQL helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn insert_node(conn: &Connection, node: &MemoryNode) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO memory_nodes
         (id, name, content, entity_type, tags, metadata, source, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            node.id,
            node.name,
            node.content,
            node.entity_type.as_str(),
            json_string(&node.tags),
            map_string(&node.metadata),
            node.source,
            node.created_at.to_rfc3339(),
            node.updated_at.to_rfc3339(),
        ],
    )
}

#[allow(clippy::too_many_arguments)]
fn upsert_edge(
    conn: &Connection,
    src: &str,
    dst: &str,
    relation: &str,
    weight: f64,
    metadata: &Map<String, Value>,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
) -> rusqlite::Result<usize> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO memory_edges
         (source_id, target_id, relation, weight, metadata, valid_from, valid_until,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT (source_id, target_id, relation) DO UPDATE SET
           weight = excluded.weight,
           metadata = excluded.metadata,
           valid_from = excluded.valid_from,
           valid_until = excluded.valid_until,
           updated_at = excluded.updated_at",
        params![
            src,
            dst,
            relation,
            weight,
            map_string(metadata),
            valid_from.map(|t| t.to_rfc3339()),
            valid_until.map(|t| t.to_rfc3339()),
            now,
        ],
    )
}

fn node_rowid(conn: &Connection, id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT rowid FROM memory_nodes WHERE id = ?1",
        params![id],
        |r| r.get(0),
    )
}

fn read_node_by_rowid(conn: &Connection, rowid: i64) -> rusqlite::Result<MemoryNode> {
    conn.query_row(
        "SELECT id, name, content, entity_type, tags, metadata, source, created_at, updated_at
         FROM memory_nodes WHERE rowid = ?1",
        params![rowid],
        row_to_node,
    )
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<MemoryNode> {
    let entity_raw: String = row.get(3)?;
    let tags_raw: String = row.get(4)?;
    let meta_raw: String = row.get(5)?;
    let created: String = row.get(7)?;
    let updated: String = row.get(8)?;
    Ok(MemoryNode {
        id: row.get(0)?,
        name: row.get(1)?,
        content: row.get(2)?,
        entity_type: EntityType::parse(&entity_raw).unwrap_or_default(),
        tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
        metadata: serde_json::from_str(&meta_raw).unwrap_or_default(),
        source: row.get(6)?,
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<MemoryEdge> {
    let meta_raw: String = row.get(4)?;
    let valid_from: Option<String> = row.get(5)?;
    let valid_until: Option<String> = row.get(6)?;
    Ok(MemoryEdge {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        relation: row.get(2)?,
        weight: row.get(3)?,
        metadata: serde_json::from_str(&meta_raw).unwrap_or_default(),
        valid_from: valid_from.as_deref().map(parse_ts),
        valid_until: valid_until.as_deref().map(parse_ts),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn json_string(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".into())
}

fn map_string(map: &Map<String, Value>) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "{}".into())
}

// FTS5 external-content tables are kept in sync manually; the 'delete'
// command needs the old column values.
fn fts_insert(conn: &Connection, rowid: i64, node: &MemoryNode) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO memory_fts (rowid, name, content, tags) VALUES (?1, ?2, ?3, ?4)",
        params![rowid, node.name, node.content, node.tags.join(" ")],
    )
}

fn fts_delete(conn: &Connection, rowid: i64, node: &MemoryNode) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO memory_fts (memory_fts, rowid, name, content, tags)
         VALUES ('delete', ?1, ?2, ?3, ?4)",
        params![rowid, node.name, node.content, node.tags.join(" ")],
    )
}

/// Build an FTS5 MATCH expression: each token quoted, AND-combined.
fn fts_match_expr(query: &str) -> String {
    tokenize(query)
        .into_iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> MemoryGraph {
        MemoryGraph::new(Arc::new(Db::open_in_memory().unwrap()))
    }

    fn store_node(g: &MemoryGraph, content: &str, tags: &[&str]) -> MemoryNode {
        g.store(
            NewNode {
                content: content.into(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            },
            vec![],
        )
        .unwrap()
    }

    fn link(g: &MemoryGraph, src: &str, dst: &str, relation: &str) {
        g.link(&LinkArgs {
            source: src.into(),
            target: dst.into(),
            relation: relation.into(),
            weight: 1.0,
            bidirectional: false,
            metadata: Map::new(),
            valid_from: None,
            valid_until: None,
        })
        .unwrap();
    }

    #[test]
    fn store_then_get_roundtrips() {
        let g = graph();
        let node = g
            .store(
                NewNode {
                    content: "Rust ownership prevents data races".into(),
                    name: Some("ownership".into()),
                    entity_type: EntityType::Concept,
                    tags: vec!["rust".into(), "memory".into()],
                    ..Default::default()
                },
                vec![],
            )
            .unwrap();

        let got = g.get(&node.id, false).unwrap();
        assert_eq!(got.node.content, "Rust ownership prevents data races");
        assert_eq!(got.node.name, "ownership");
        assert_eq!(got.node.entity_type, EntityType::Concept);
        assert_eq!(got.node.tags, vec!["rust", "memory"]);
    }

    #[test]
    fn name_defaults_to_first_60_chars() {
        let g = graph();
        let long = "x".repeat(100);
        let node = store_node(&g, &long, &[]);
        assert_eq!(node.name.chars().count(), 60);
    }

    #[test]
    fn get_unknown_node_is_not_found() {
        let g = graph();
        let err = g.get("nope", false).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn fulltext_search_finds_by_content() {
        let g = graph();
        store_node(&g, "the borrow checker enforces aliasing rules", &[]);
        store_node(&g, "completely unrelated text about cooking", &[]);

        let hits = g
            .search(&SearchQuery {
                query: "borrow checker".into(),
                mode: SearchMode::Fulltext,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score.is_some());
    }

    #[test]
    fn tag_search_requires_all_tags() {
        let g = graph();
        store_node(&g, "a", &["rust", "async"]);
        store_node(&g, "b", &["rust"]);

        let hits = g
            .search(&SearchQuery {
                mode: SearchMode::Tags,
                tags: vec!["rust".into(), "async".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.content, "a");
    }

    #[test]
    fn hybrid_unions_fulltext_and_tags() {
        let g = graph();
        store_node(&g, "tokio runtime internals", &[]);
        store_node(&g, "unrelated", &["tokio"]);

        let hits = g
            .search(&SearchQuery {
                query: "tokio".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 2);
        // Full-text hit ranks first.
        assert!(hits[0].score.is_some());
        assert!(hits[1].score.is_none());
    }

    #[test]
    fn search_filters_by_entity_type() {
        let g = graph();
        g.store(
            NewNode {
                content: "deploy service".into(),
                entity_type: EntityType::Task,
                ..Default::default()
            },
            vec![],
        )
        .unwrap();
        g.store(
            NewNode {
                content: "deploy pipeline notes".into(),
                entity_type: EntityType::Note,
                ..Default::default()
            },
            vec![],
        )
        .unwrap();

        let hits = g
            .search(&SearchQuery {
                query: "deploy".into(),
                mode: SearchMode::Fulltext,
                entity_type: Some(EntityType::Task),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.entity_type, EntityType::Task);
    }

    #[test]
    fn update_replaces_tags_and_merges_metadata() {
        let g = graph();
        let node = g
            .store(
                NewNode {
                    content: "c".into(),
                    tags: vec!["old".into()],
                    metadata: serde_json::from_value(
                        serde_json::json!({ "keep": 1, "overwrite": "a" }),
                    )
                    .unwrap(),
                    ..Default::default()
                },
                vec![],
            )
            .unwrap();

        let updated = g
            .update(
                &node.id,
                NodePatch {
                    tags: Some(vec!["new1".into(), "new2".into()]),
                    metadata: Some(
                        serde_json::from_value(
                            serde_json::json!({ "overwrite": "b", "added": true }),
                        )
                        .unwrap(),
                    ),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.tags, vec!["new1", "new2"]);
        assert_eq!(updated.metadata["keep"], 1);
        assert_eq!(updated.metadata["overwrite"], "b");
        assert_eq!(updated.metadata["added"], true);

        // Read back through get to confirm persistence.
        let got = g.get(&node.id, false).unwrap();
        assert_eq!(got.node.tags, vec!["new1", "new2"]);
    }

    #[test]
    fn update_keeps_fts_in_sync() {
        let g = graph();
        let node = store_node(&g, "original topic alpha", &[]);
        g.update(
            &node.id,
            NodePatch {
                content: Some("replacement topic beta".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let stale = g
            .search(&SearchQuery {
                query: "alpha".into(),
                mode: SearchMode::Fulltext,
                ..Default::default()
            })
            .unwrap();
        assert!(stale.is_empty());

        let fresh = g
            .search(&SearchQuery {
                query: "beta".into(),
                mode: SearchMode::Fulltext,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn link_is_idempotent_and_updates_weight() {
        let g = graph();
        let a = store_node(&g, "a", &[]);
        let b = store_node(&g, "b", &[]);

        let mut args = LinkArgs {
            source: a.id.clone(),
            target: b.id.clone(),
            relation: "related_to".into(),
            weight: 1.0,
            bidirectional: false,
            metadata: Map::new(),
            valid_from: None,
            valid_until: None,
        };
        g.link(&args).unwrap();
        args.weight = 0.25;
        let edges = g.link(&args).unwrap();

        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, 0.25);
        let stats = g.stats().unwrap();
        assert_eq!(stats.edge_count, 1);
    }

    #[test]
    fn bidirectional_link_creates_reverse_edge() {
        let g = graph();
        let a = store_node(&g, "a", &[]);
        let b = store_node(&g, "b", &[]);
        let edges = g
            .link(&LinkArgs {
                source: a.id.clone(),
                target: b.id.clone(),
                relation: "contradicts".into(),
                weight: 1.0,
                bidirectional: true,
                metadata: Map::new(),
                valid_from: None,
                valid_until: None,
            })
            .unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1].source_id, b.id);
        assert_eq!(edges[1].target_id, a.id);
    }

    #[test]
    fn self_link_is_rejected() {
        let g = graph();
        let a = store_node(&g, "a", &[]);
        let err = g
            .link(&LinkArgs {
                source: a.id.clone(),
                target: a.id.clone(),
                relation: "related_to".into(),
                weight: 1.0,
                bidirectional: false,
                metadata: Map::new(),
                valid_from: None,
                valid_until: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }

    #[test]
    fn hierarchy_subtree_roots_and_ancestors() {
        let g = graph();
        let p = store_node(&g, "parent", &[]);
        let c = store_node(&g, "child", &[]);
        link(&g, &p.id, &c.id, PARENT_OF);

        let subtree = g.subtree(&p.id, None).unwrap();
        assert_eq!(subtree.len(), 1);
        assert_eq!(subtree[0].node.id, c.id);
        assert_eq!(subtree[0].depth, 1);

        let roots = g.roots().unwrap();
        let root_ids: Vec<_> = roots.iter().map(|n| n.id.as_str()).collect();
        assert!(root_ids.contains(&p.id.as_str()));
        assert!(!root_ids.contains(&c.id.as_str()));

        let ancestors = g.ancestors(&c.id, None).unwrap();
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].node.id, p.id);
    }

    #[test]
    fn initial_reverse_edge_builds_hierarchy() {
        let g = graph();
        let p = store_node(&g, "parent", &[]);
        let c = g
            .store(
                NewNode {
                    content: "child".into(),
                    ..Default::default()
                },
                vec![EdgeSpec {
                    target: p.id.clone(),
                    relation: PARENT_OF.into(),
                    weight: 1.0,
                    reverse: true,
                    metadata: Map::new(),
                }],
            )
            .unwrap();

        let subtree = g.subtree(&p.id, None).unwrap();
        assert_eq!(subtree.len(), 1);
        assert_eq!(subtree[0].node.id, c.id);
    }

    #[test]
    fn traversal_respects_depth_bound() {
        let g = graph();
        let a = store_node(&g, "a", &[]);
        let b = store_node(&g, "b", &[]);
        let c = store_node(&g, "c", &[]);
        link(&g, &a.id, &b.id, PARENT_OF);
        link(&g, &b.id, &c.id, PARENT_OF);

        let shallow = g.subtree(&a.id, Some(1)).unwrap();
        assert_eq!(shallow.len(), 1);
        let deep = g.subtree(&a.id, Some(5)).unwrap();
        assert_eq!(deep.len(), 2);
        assert_eq!(deep[1].depth, 2);
    }

    #[test]
    fn traversal_survives_cycles() {
        let g = graph();
        let a = store_node(&g, "a", &[]);
        let b = store_node(&g, "b", &[]);
        link(&g, &a.id, &b.id, PARENT_OF);
        link(&g, &b.id, &a.id, PARENT_OF);

        let subtree = g.subtree(&a.id, None).unwrap();
        assert_eq!(subtree.len(), 1);
    }

    #[test]
    fn delete_without_cascade_refuses_when_orphaning() {
        let g = graph();
        let p = store_node(&g, "parent", &[]);
        let c = store_node(&g, "child", &[]);
        link(&g, &p.id, &c.id, PARENT_OF);

        let outcome = g.delete(&p.id, false).unwrap();
        assert_eq!(
            outcome,
            DeleteOutcome::WouldOrphan {
                orphans: vec![c.id.clone()]
            }
        );
        // Nothing was deleted.
        assert!(g.get(&p.id, false).is_ok());
        assert!(g.get(&c.id, false).is_ok());
    }

    #[test]
    fn delete_allows_children_with_other_parents() {
        let g = graph();
        let p1 = store_node(&g, "p1", &[]);
        let p2 = store_node(&g, "p2", &[]);
        let c = store_node(&g, "c", &[]);
        link(&g, &p1.id, &c.id, PARENT_OF);
        link(&g, &p2.id, &c.id, PARENT_OF);

        let outcome = g.delete(&p1.id, false).unwrap();
        assert!(matches!(outcome, DeleteOutcome::Deleted { .. }));
        assert!(g.get(&c.id, false).is_ok());
    }

    #[test]
    fn cascade_delete_removes_orphans_transitively() {
        let g = graph();
        let a = store_node(&g, "a", &[]);
        let b = store_node(&g, "b", &[]);
        let c = store_node(&g, "c", &[]);
        link(&g, &a.id, &b.id, PARENT_OF);
        link(&g, &b.id, &c.id, PARENT_OF);

        let outcome = g.delete(&a.id, true).unwrap();
        match outcome {
            DeleteOutcome::Deleted { ids } => assert_eq!(ids.len(), 3),
            other => panic!("expected Deleted, got {other:?}"),
        }
        assert!(g.get(&b.id, false).is_err());
        assert!(g.get(&c.id, false).is_err());
    }

    #[test]
    fn delete_removes_incident_edges_and_fts_entry() {
        let g = graph();
        let a = store_node(&g, "searchable alpha text", &[]);
        let b = store_node(&g, "b", &[]);
        link(&g, &a.id, &b.id, "related_to");

        g.delete(&a.id, false).unwrap();

        let hits = g
            .search(&SearchQuery {
                query: "alpha".into(),
                mode: SearchMode::Fulltext,
                ..Default::default()
            })
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(g.stats().unwrap().edge_count, 0);
    }

    #[test]
    fn related_filters_by_relation() {
        let g = graph();
        let a = store_node(&g, "a", &[]);
        let b = store_node(&g, "b", &[]);
        let c = store_node(&g, "c", &[]);
        link(&g, &a.id, &b.id, "depends_on");
        link(&g, &c.id, &a.id, "supersedes");

        let all = g.related(&a.id, None).unwrap();
        assert_eq!(all.len(), 2);

        let deps = g.related(&a.id, Some("depends_on")).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].direction, EdgeDirection::Outgoing);
        assert_eq!(deps[0].neighbor_id, b.id);
    }

    #[test]
    fn stats_counts_types_edges_and_orphans() {
        let g = graph();
        let a = store_node(&g, "a", &["t1"]);
        let b = store_node(&g, "b", &["t1", "t2"]);
        let _lonely = store_node(&g, "lonely", &[]);
        link(&g, &a.id, &b.id, "related_to");

        let stats = g.stats().unwrap();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 1);
        assert_eq!(stats.orphan_count, 1);
        assert_eq!(stats.nodes_by_type["note"], 3);
        assert_eq!(stats.tag_frequency["t1"], 2);
        assert_eq!(stats.tag_frequency["t2"], 1);
        assert_eq!(stats.most_connected.len(), 2);
    }

    #[test]
    fn store_rejects_empty_content() {
        let g = graph();
        let err = g.store(NewNode::default(), vec![]).unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }

    #[test]
    fn store_with_unknown_edge_target_fails_cleanly() {
        let g = graph();
        let err = g
            .store(
                NewNode {
                    content: "x".into(),
                    ..Default::default()
                },
                vec![EdgeSpec {
                    target: "ghost".into(),
                    relation: PARENT_OF.into(),
                    weight: 1.0,
                    reverse: false,
                    metadata: Map::new(),
                }],
            )
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        // The node itself must not have been stored.
        assert_eq!(g.stats().unwrap().node_count, 0);
    }
}
