//! The tool catalog — every `(category, name)` pair HostBridge exposes,
//! with input schemas and handler bindings. Built once at startup; the
//! registry is immutable afterwards.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use hb_domain::tool::ToolDescriptor;
use hb_domain::{Error, Result};
use hb_store::{DeleteOutcome, EdgeSpec, LinkArgs, MemoryGraph, NewNode, NodePatch, SearchQuery};
use hb_tools::http::{HttpEgress, HttpRequestArgs};
use hb_tools::shell::{ShellRequest, ShellRunner};
use hb_tools::{docker, file_ops, git, WorkspaceResolver};

use crate::runtime::plan::{PlanExecutor, PlanSpec};
use crate::runtime::registry::{decode, handler, ToolRegistry};

pub struct CatalogDeps {
    pub workspace: Arc<WorkspaceResolver>,
    pub shell: Arc<ShellRunner>,
    pub egress: Arc<HttpEgress>,
    pub memory: Arc<MemoryGraph>,
    pub plans: Arc<PlanExecutor>,
}

fn desc(
    category: &str,
    name: &str,
    description: &str,
    requires_hitl_default: bool,
    input_schema: Value,
    handler: Arc<dyn hb_domain::tool::ToolHandler>,
) -> ToolDescriptor {
    ToolDescriptor {
        category: category.into(),
        name: name.into(),
        description: description.into(),
        input_schema,
        output_schema: None,
        requires_hitl_default,
        path_params: Vec::new(),
        handler,
    }
}

/// Like [`desc`], declaring which params the dispatch engine must validate
/// against the workspace root before the handler runs.
#[allow(clippy::too_many_arguments)]
fn desc_paths(
    category: &str,
    name: &str,
    description: &str,
    requires_hitl_default: bool,
    path_params: &[&str],
    input_schema: Value,
    handler: Arc<dyn hb_domain::tool::ToolHandler>,
) -> ToolDescriptor {
    let mut d = desc(
        category,
        name,
        description,
        requires_hitl_default,
        input_schema,
        handler,
    );
    d.path_params = path_params.iter().map(|p| p.to_string()).collect();
    d
}

fn string_prop(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

/// Build the full registry.
pub fn build_registry(deps: CatalogDeps) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    register_fs(&mut registry, &deps)?;
    register_shell(&mut registry, &deps)?;
    register_git(&mut registry, &deps)?;
    register_docker(&mut registry, &deps)?;
    register_http(&mut registry, &deps)?;
    register_workspace(&mut registry, &deps)?;
    register_memory(&mut registry, &deps)?;
    register_plan(&mut registry, &deps)?;
    Ok(registry)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn register_fs(registry: &mut ToolRegistry, deps: &CatalogDeps) -> Result<()> {
    let path_only = |desc: &str| {
        json!({
            "type": "object",
            "properties": { "path": string_prop(desc) },
            "required": ["path"]
        })
    };

    let ws = deps.workspace.clone();
    registry.register(desc_paths(
        "fs",
        "read",
        "Read a file from the workspace, optionally a line range.",
        false,
        &["path"],
        json!({
            "type": "object",
            "properties": {
                "path": string_prop("Workspace-relative file path"),
                "offset": { "type": "integer", "description": "First line (0-indexed)" },
                "limit": { "type": "integer", "description": "Maximum lines to return" }
            },
            "required": ["path"]
        }),
        handler(move |params, _ctx| {
            let ws = ws.clone();
            async move { file_ops::file_read(&ws, decode(params)?).await }
        }),
    ))?;

    let ws = deps.workspace.clone();
    registry.register(desc_paths(
        "fs",
        "write",
        "Write a file atomically, creating parent directories.",
        false,
        &["path"],
        json!({
            "type": "object",
            "properties": {
                "path": string_prop("Workspace-relative file path"),
                "content": string_prop("Full file content")
            },
            "required": ["path", "content"]
        }),
        handler(move |params, _ctx| {
            let ws = ws.clone();
            async move { file_ops::file_write(&ws, decode(params)?).await }
        }),
    ))?;

    let ws = deps.workspace.clone();
    registry.register(desc_paths(
        "fs",
        "append",
        "Append to a file, creating it if absent.",
        false,
        &["path"],
        json!({
            "type": "object",
            "properties": {
                "path": string_prop("Workspace-relative file path"),
                "content": string_prop("Content to append")
            },
            "required": ["path", "content"]
        }),
        handler(move |params, _ctx| {
            let ws = ws.clone();
            async move { file_ops::file_append(&ws, decode(params)?).await }
        }),
    ))?;

    let ws = deps.workspace.clone();
    registry.register(desc_paths(
        "fs",
        "delete",
        "Delete a file or empty directory.",
        true,
        &["path"],
        path_only("Workspace-relative path to delete"),
        handler(move |params, _ctx| {
            let ws = ws.clone();
            async move { file_ops::file_delete(&ws, decode(params)?).await }
        }),
    ))?;

    let ws = deps.workspace.clone();
    registry.register(desc_paths(
        "fs",
        "move",
        "Move or rename within the workspace.",
        true,
        &["source", "destination"],
        json!({
            "type": "object",
            "properties": {
                "source": string_prop("Existing workspace-relative path"),
                "destination": string_prop("New workspace-relative path")
            },
            "required": ["source", "destination"]
        }),
        handler(move |params, _ctx| {
            let ws = ws.clone();
            async move { file_ops::file_move(&ws, decode(params)?).await }
        }),
    ))?;

    let ws = deps.workspace.clone();
    registry.register(desc_paths(
        "fs",
        "mkdir",
        "Create a directory and any missing parents.",
        false,
        &["path"],
        path_only("Workspace-relative directory path"),
        handler(move |params, _ctx| {
            let ws = ws.clone();
            async move { file_ops::file_mkdir(&ws, decode(params)?).await }
        }),
    ))?;

    let ws = deps.workspace.clone();
    registry.register(desc_paths(
        "fs",
        "list",
        "List a directory with sizes and timestamps.",
        false,
        &["path"],
        json!({
            "type": "object",
            "properties": { "path": string_prop("Workspace-relative directory (default '.')") }
        }),
        handler(move |params, _ctx| {
            let ws = ws.clone();
            async move { file_ops::file_list(&ws, decode(params)?).await }
        }),
    ))?;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// shell
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn register_shell(registry: &mut ToolRegistry, deps: &CatalogDeps) -> Result<()> {
    let ws = deps.workspace.clone();
    let shell = deps.shell.clone();
    registry.register(desc_paths(
        "shell",
        "run",
        "Run a shell command in the workspace. Returns combined output.",
        true,
        &["workdir"],
        json!({
            "type": "object",
            "properties": {
                "command": string_prop("Command to run under sh -c"),
                "workdir": string_prop("Workspace-relative working directory"),
                "timeout_secs": { "type": "integer", "description": "Hard timeout in seconds" },
                "env": { "type": "object", "description": "Extra environment variables" }
            },
            "required": ["command"]
        }),
        handler(move |params, ctx| {
            let ws = ws.clone();
            let shell = shell.clone();
            async move {
                let req: ShellRequest = decode(params)?;
                shell.run(&ws, req, &ctx.cancel).await
            }
        }),
    ))?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// git
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn register_git(registry: &mut ToolRegistry, deps: &CatalogDeps) -> Result<()> {
    let ws = deps.workspace.clone();
    registry.register(desc(
        "git",
        "status",
        "Porcelain status of the workspace repository.",
        false,
        json!({ "type": "object", "properties": {} }),
        handler(move |_params, ctx| {
            let ws = ws.clone();
            async move { git::git_status(&ws, &ctx.cancel).await }
        }),
    ))?;

    let ws = deps.workspace.clone();
    registry.register(desc(
        "git",
        "log",
        "Recent commits, one line each.",
        false,
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "description": "Number of commits (default 20)" }
            }
        }),
        handler(move |params, ctx| {
            let ws = ws.clone();
            async move { git::git_log(&ws, decode(params)?, &ctx.cancel).await }
        }),
    ))?;

    let ws = deps.workspace.clone();
    registry.register(desc_paths(
        "git",
        "diff",
        "Unstaged (or staged) changes, optionally for one path.",
        false,
        &["path"],
        json!({
            "type": "object",
            "properties": {
                "path": string_prop("Limit the diff to this workspace-relative path"),
                "staged": { "type": "boolean", "description": "Diff the index instead" }
            }
        }),
        handler(move |params, ctx| {
            let ws = ws.clone();
            async move { git::git_diff(&ws, decode(params)?, &ctx.cancel).await }
        }),
    ))?;

    let ws = deps.workspace.clone();
    registry.register(desc(
        "git",
        "commit",
        "Create a commit, optionally staging everything first.",
        true,
        json!({
            "type": "object",
            "properties": {
                "message": string_prop("Commit message"),
                "stage_all": { "type": "boolean", "description": "git add -A first" }
            },
            "required": ["message"]
        }),
        handler(move |params, ctx| {
            let ws = ws.clone();
            async move { git::git_commit(&ws, decode(params)?, &ctx.cancel).await }
        }),
    ))?;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// docker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn register_docker(registry: &mut ToolRegistry, _deps: &CatalogDeps) -> Result<()> {
    registry.register(desc(
        "docker",
        "ps",
        "List containers.",
        false,
        json!({
            "type": "object",
            "properties": {
                "all": { "type": "boolean", "description": "Include stopped containers" }
            }
        }),
        handler(move |params, ctx| async move {
            docker::docker_ps(decode(params)?, &ctx.cancel).await
        }),
    ))?;

    registry.register(desc(
        "docker",
        "images",
        "List local images.",
        false,
        json!({ "type": "object", "properties": {} }),
        handler(move |_params, ctx| async move { docker::docker_images(&ctx.cancel).await }),
    ))?;

    registry.register(desc(
        "docker",
        "logs",
        "Tail a container's logs.",
        false,
        json!({
            "type": "object",
            "properties": {
                "container": string_prop("Container name or id"),
                "tail": { "type": "integer", "description": "Lines from the end (default 100)" }
            },
            "required": ["container"]
        }),
        handler(move |params, ctx| async move {
            docker::docker_logs(decode(params)?, &ctx.cancel).await
        }),
    ))?;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// http
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn register_http(registry: &mut ToolRegistry, deps: &CatalogDeps) -> Result<()> {
    let egress = deps.egress.clone();
    registry.register(desc(
        "http",
        "request",
        "Make an outbound HTTP request (SSRF-guarded).",
        false,
        json!({
            "type": "object",
            "properties": {
                "url": string_prop("Destination URL (http/https)"),
                "method": string_prop("HTTP method (default GET)"),
                "headers": { "type": "object", "description": "Request headers" },
                "body": { "description": "String is sent raw, anything else as JSON" },
                "timeout_secs": { "type": "integer", "description": "Request timeout" }
            },
            "required": ["url"]
        }),
        handler(move |params, ctx| {
            let egress = egress.clone();
            async move {
                let req: HttpRequestArgs = decode(params)?;
                egress.request(req, &ctx.cancel).await
            }
        }),
    ))?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn register_workspace(registry: &mut ToolRegistry, deps: &CatalogDeps) -> Result<()> {
    let ws = deps.workspace.clone();
    registry.register(desc(
        "workspace",
        "info",
        "Workspace root metadata.",
        false,
        json!({ "type": "object", "properties": {} }),
        handler(move |_params, _ctx| {
            let ws = ws.clone();
            async move { ws.info() }
        }),
    ))?;

    #[derive(Deserialize)]
    struct TreeParams {
        #[serde(default = "d_dot")]
        path: String,
        #[serde(default = "d_3")]
        max_depth: u32,
    }
    fn d_dot() -> String {
        ".".into()
    }
    fn d_3() -> u32 {
        3
    }

    let ws = deps.workspace.clone();
    registry.register(desc_paths(
        "workspace",
        "tree",
        "Bounded directory tree.",
        false,
        &["path"],
        json!({
            "type": "object",
            "properties": {
                "path": string_prop("Starting directory (default '.')"),
                "max_depth": { "type": "integer", "description": "Depth bound (default 3, max 8)" }
            }
        }),
        handler(move |params, _ctx| {
            let ws = ws.clone();
            async move {
                let req: TreeParams = decode(params)?;
                ws.tree(&req.path, req.max_depth)
            }
        }),
    ))?;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn register_memory(registry: &mut ToolRegistry, deps: &CatalogDeps) -> Result<()> {
    #[derive(Deserialize)]
    struct StoreParams {
        #[serde(flatten)]
        node: NewNode,
        #[serde(default)]
        edges: Vec<EdgeSpec>,
    }

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "store",
        "Store a memory node, optionally with initial edges.",
        false,
        json!({
            "type": "object",
            "properties": {
                "content": string_prop("Node content"),
                "name": string_prop("Display name (default: first 60 chars of content)"),
                "entity_type": { "type": "string", "enum": ["concept", "fact", "task", "person", "event", "note"] },
                "tags": { "type": "array", "items": { "type": "string" } },
                "metadata": { "type": "object" },
                "source": string_prop("Where this came from"),
                "edges": { "type": "array", "description": "Initial edges to existing nodes" }
            },
            "required": ["content"]
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let req: StoreParams = decode(params)?;
                let node = memory.store(req.node, req.edges)?;
                Ok(serde_json::to_value(node)?)
            }
        }),
    ))?;

    #[derive(Deserialize)]
    struct GetParams {
        id: String,
        #[serde(default)]
        include_relations: bool,
    }

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "get",
        "Fetch a node, optionally with its immediate neighbors.",
        false,
        json!({
            "type": "object",
            "properties": {
                "id": string_prop("Node id"),
                "include_relations": { "type": "boolean" }
            },
            "required": ["id"]
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let req: GetParams = decode(params)?;
                let node = memory.get(&req.id, req.include_relations)?;
                Ok(serde_json::to_value(node)?)
            }
        }),
    ))?;

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "search",
        "Search nodes: fulltext (BM25), tags, or hybrid (default).",
        false,
        json!({
            "type": "object",
            "properties": {
                "query": string_prop("Search text"),
                "mode": { "type": "string", "enum": ["fulltext", "tags", "hybrid"] },
                "entity_type": { "type": "string", "enum": ["concept", "fact", "task", "person", "event", "note"] },
                "tags": { "type": "array", "items": { "type": "string" } },
                "created_after": string_prop("RFC 3339 lower bound"),
                "created_before": string_prop("RFC 3339 upper bound"),
                "max_results": { "type": "integer" }
            }
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let query: SearchQuery = decode(params)?;
                let hits = memory.search(&query)?;
                Ok(json!({ "count": hits.len(), "results": hits }))
            }
        }),
    ))?;

    #[derive(Deserialize)]
    struct UpdateParams {
        id: String,
        #[serde(flatten)]
        patch: NodePatch,
    }

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "update",
        "Update content/name/tags/metadata. Tags replace; metadata merges.",
        false,
        json!({
            "type": "object",
            "properties": {
                "id": string_prop("Node id"),
                "content": { "type": "string" },
                "name": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "metadata": { "type": "object" }
            },
            "required": ["id"]
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let req: UpdateParams = decode(params)?;
                let node = memory.update(&req.id, req.patch)?;
                Ok(serde_json::to_value(node)?)
            }
        }),
    ))?;

    #[derive(Deserialize)]
    struct DeleteParams {
        id: String,
        #[serde(default)]
        cascade: bool,
    }

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "delete",
        "Delete a node. Refuses to orphan children unless cascade=true.",
        false,
        json!({
            "type": "object",
            "properties": {
                "id": string_prop("Node id"),
                "cascade": { "type": "boolean", "description": "Also delete orphaned children" }
            },
            "required": ["id"]
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let req: DeleteParams = decode(params)?;
                match memory.delete(&req.id, req.cascade)? {
                    DeleteOutcome::Deleted { ids } => {
                        Ok(json!({ "deleted": ids }))
                    }
                    DeleteOutcome::WouldOrphan { orphans } => Err(Error::InvalidParameter(
                        format!(
                            "delete refused: nodes [{}] would be orphaned; retry with cascade=true",
                            orphans.join(", ")
                        ),
                    )),
                }
            }
        }),
    ))?;

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "link",
        "Create or update an edge (idempotent on source/target/relation).",
        false,
        json!({
            "type": "object",
            "properties": {
                "source": string_prop("Source node id"),
                "target": string_prop("Target node id"),
                "relation": string_prop("e.g. related_to, depends_on, parent_of, contradicts, supersedes, derived_from"),
                "weight": { "type": "number" },
                "bidirectional": { "type": "boolean" },
                "metadata": { "type": "object" },
                "valid_from": string_prop("RFC 3339"),
                "valid_until": string_prop("RFC 3339")
            },
            "required": ["source", "target", "relation"]
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let args: LinkArgs = decode(params)?;
                let edges = memory.link(&args)?;
                Ok(json!({ "edges": edges }))
            }
        }),
    ))?;

    #[derive(Deserialize)]
    struct IdParams {
        id: String,
    }

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "children",
        "Direct parent_of children of a node.",
        false,
        json!({
            "type": "object",
            "properties": { "id": string_prop("Node id") },
            "required": ["id"]
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let req: IdParams = decode(params)?;
                let children = memory.children(&req.id)?;
                Ok(json!({ "count": children.len(), "children": children }))
            }
        }),
    ))?;

    #[derive(Deserialize)]
    struct TraverseParams {
        id: String,
        #[serde(default)]
        max_depth: Option<u32>,
    }

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "ancestors",
        "Walk parent_of edges upward (bounded, default depth 10).",
        false,
        json!({
            "type": "object",
            "properties": {
                "id": string_prop("Node id"),
                "max_depth": { "type": "integer" }
            },
            "required": ["id"]
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let req: TraverseParams = decode(params)?;
                let nodes = memory.ancestors(&req.id, req.max_depth)?;
                Ok(json!({ "count": nodes.len(), "ancestors": nodes }))
            }
        }),
    ))?;

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "subtree",
        "Walk parent_of edges downward; excludes the root itself.",
        false,
        json!({
            "type": "object",
            "properties": {
                "id": string_prop("Node id"),
                "max_depth": { "type": "integer" }
            },
            "required": ["id"]
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let req: TraverseParams = decode(params)?;
                let nodes = memory.subtree(&req.id, req.max_depth)?;
                Ok(json!({ "count": nodes.len(), "subtree": nodes }))
            }
        }),
    ))?;

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "roots",
        "Nodes with no incoming parent_of edge.",
        false,
        json!({ "type": "object", "properties": {} }),
        handler(move |_params, _ctx| {
            let memory = memory.clone();
            async move {
                let roots = memory.roots()?;
                Ok(json!({ "count": roots.len(), "roots": roots }))
            }
        }),
    ))?;

    #[derive(Deserialize)]
    struct RelatedParams {
        id: String,
        #[serde(default)]
        relation: Option<String>,
    }

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "related",
        "All edges touching a node, optionally filtered by relation.",
        false,
        json!({
            "type": "object",
            "properties": {
                "id": string_prop("Node id"),
                "relation": string_prop("Filter to one relation")
            },
            "required": ["id"]
        }),
        handler(move |params, _ctx| {
            let memory = memory.clone();
            async move {
                let req: RelatedParams = decode(params)?;
                let related = memory.related(&req.id, req.relation.as_deref())?;
                Ok(json!({ "count": related.len(), "related": related }))
            }
        }),
    ))?;

    let memory = deps.memory.clone();
    registry.register(desc(
        "memory",
        "stats",
        "Graph statistics: counts by type, degree leaders, tag frequency.",
        false,
        json!({ "type": "object", "properties": {} }),
        handler(move |_params, _ctx| {
            let memory = memory.clone();
            async move { Ok(serde_json::to_value(memory.stats()?)?) }
        }),
    ))?;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn register_plan(registry: &mut ToolRegistry, deps: &CatalogDeps) -> Result<()> {
    let plans = deps.plans.clone();
    registry.register(desc(
        "plan",
        "create",
        "Validate a task DAG and store it for execution.",
        false,
        json!({
            "type": "object",
            "properties": {
                "name": string_prop("Plan name"),
                "on_failure": { "type": "string", "enum": ["stop", "skip_dependents", "continue"] },
                "tasks": {
                    "type": "array",
                    "description": "Tasks with id, tool ('category.name'), params, depends_on",
                    "items": { "type": "object" }
                }
            },
            "required": ["name", "tasks"]
        }),
        handler(move |params, _ctx| {
            let plans = plans.clone();
            async move {
                let spec: PlanSpec = decode(params)?;
                plans.create(spec)
            }
        }),
    ))?;

    #[derive(Deserialize)]
    struct PlanRef {
        plan: String,
    }

    let plans = deps.plans.clone();
    registry.register(desc(
        "plan",
        "execute",
        "Run a plan level by level; same-level tasks run concurrently.",
        false,
        json!({
            "type": "object",
            "properties": { "plan": string_prop("Plan id or unique name") },
            "required": ["plan"]
        }),
        handler(move |params, ctx| {
            let plans = plans.clone();
            async move {
                let req: PlanRef = decode(params)?;
                plans.execute(&req.plan, ctx.protocol).await
            }
        }),
    ))?;

    let plans = deps.plans.clone();
    registry.register(desc(
        "plan",
        "status",
        "Current status and per-task detail of a plan.",
        false,
        json!({
            "type": "object",
            "properties": { "plan": string_prop("Plan id or unique name") },
            "required": ["plan"]
        }),
        handler(move |params, _ctx| {
            let plans = plans.clone();
            async move {
                let req: PlanRef = decode(params)?;
                plans.status(&req.plan)
            }
        }),
    ))?;

    let plans = deps.plans.clone();
    registry.register(desc(
        "plan",
        "list",
        "All plans known to this process.",
        false,
        json!({ "type": "object", "properties": {} }),
        handler(move |_params, _ctx| {
            let plans = plans.clone();
            async move { Ok(plans.list()) }
        }),
    ))?;

    let plans = deps.plans.clone();
    registry.register(desc(
        "plan",
        "cancel",
        "Cancel a pending or running plan; it can never run again.",
        false,
        json!({
            "type": "object",
            "properties": { "plan": string_prop("Plan id or unique name") },
            "required": ["plan"]
        }),
        handler(move |params, _ctx| {
            let plans = plans.clone();
            async move {
                let req: PlanRef = decode(params)?;
                plans.cancel(&req.plan)
            }
        }),
    ))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hb_domain::config::{HttpEgressConfig, ShellConfig};
    use hb_store::Db;

    fn registry() -> (tempfile::TempDir, ToolRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let deps = CatalogDeps {
            workspace: Arc::new(WorkspaceResolver::new(dir.path().to_path_buf())),
            shell: Arc::new(ShellRunner::new(&ShellConfig::default()).unwrap()),
            egress: Arc::new(HttpEgress::new(HttpEgressConfig::default()).unwrap()),
            memory: Arc::new(MemoryGraph::new(Arc::new(Db::open_in_memory().unwrap()))),
            plans: Arc::new(PlanExecutor::new()),
        };
        (dir, build_registry(deps).unwrap())
    }

    #[test]
    fn catalog_covers_every_category() {
        let (_dir, registry) = registry();
        for (category, name) in [
            ("fs", "read"),
            ("fs", "write"),
            ("fs", "append"),
            ("fs", "delete"),
            ("fs", "move"),
            ("fs", "mkdir"),
            ("fs", "list"),
            ("shell", "run"),
            ("git", "status"),
            ("git", "log"),
            ("git", "diff"),
            ("git", "commit"),
            ("docker", "ps"),
            ("docker", "images"),
            ("docker", "logs"),
            ("http", "request"),
            ("workspace", "info"),
            ("workspace", "tree"),
            ("memory", "store"),
            ("memory", "get"),
            ("memory", "search"),
            ("memory", "update"),
            ("memory", "delete"),
            ("memory", "link"),
            ("memory", "children"),
            ("memory", "ancestors"),
            ("memory", "subtree"),
            ("memory", "roots"),
            ("memory", "related"),
            ("memory", "stats"),
            ("plan", "create"),
            ("plan", "execute"),
            ("plan", "status"),
            ("plan", "list"),
            ("plan", "cancel"),
        ] {
            assert!(
                registry.get(category, name).is_some(),
                "missing {category}.{name}"
            );
        }
    }

    #[test]
    fn destructive_tools_default_to_hitl() {
        let (_dir, registry) = registry();
        for (category, name) in [
            ("shell", "run"),
            ("fs", "delete"),
            ("fs", "move"),
            ("git", "commit"),
        ] {
            assert!(
                registry.get(category, name).unwrap().requires_hitl_default,
                "{category}.{name} should require approval by default"
            );
        }
        assert!(!registry.get("fs", "read").unwrap().requires_hitl_default);
    }

    #[test]
    fn every_tool_declares_an_object_schema() {
        let (_dir, registry) = registry();
        for desc in registry.list() {
            assert_eq!(
                desc.input_schema["type"], "object",
                "{} schema is not an object",
                desc.mcp_name()
            );
        }
    }
}
