use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::invocation::Protocol;

/// Per-invocation execution context handed to tool handlers.
///
/// The token is a child of the caller's token: adapter disconnect, plan
/// cancellation, and request timeout all propagate through it.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub invocation_id: uuid::Uuid,
    pub protocol: Protocol,
    pub cancel: CancellationToken,
}

impl ExecContext {
    pub fn new(invocation_id: uuid::Uuid, protocol: Protocol, cancel: CancellationToken) -> Self {
        Self {
            invocation_id,
            protocol,
            cancel,
        }
    }
}

/// A concrete tool body. Handlers receive fully resolved, schema-validated
/// params and classify their own failures into the shared error taxonomy.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value, ctx: &ExecContext) -> Result<Value>;
}

/// Static record binding a `(category, name)` pair to its schema, handler,
/// and approval default. The set of descriptors is fixed at process start.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub category: String,
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input params.
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    /// Whether an unmatched policy falls through to approval for this tool.
    pub requires_hitl_default: bool,
    /// Params holding workspace-relative paths. The dispatch engine
    /// validates these against the workspace root before the handler runs.
    pub path_params: Vec<String>,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    /// The flat name used on the MCP surface.
    pub fn mcp_name(&self) -> String {
        format!("{}_{}", self.category, self.name)
    }

    pub fn key(&self) -> (String, String) {
        (self.category.clone(), self.name.clone())
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("category", &self.category)
            .field("name", &self.name)
            .field("requires_hitl_default", &self.requires_hitl_default)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, params: Value, _ctx: &ExecContext) -> Result<Value> {
            Ok(params)
        }
    }

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            category: "fs".into(),
            name: "read".into(),
            description: "Read a file".into(),
            input_schema: serde_json::json!({ "type": "object" }),
            output_schema: None,
            requires_hitl_default: false,
            path_params: vec!["path".into()],
            handler: Arc::new(Echo),
        }
    }

    #[test]
    fn mcp_name_uses_underscore() {
        assert_eq!(descriptor().mcp_name(), "fs_read");
    }

    #[tokio::test]
    async fn handler_is_callable_through_the_trait() {
        let desc = descriptor();
        let ctx = ExecContext::new(
            uuid::Uuid::new_v4(),
            Protocol::Rest,
            CancellationToken::new(),
        );
        let out = desc
            .handler
            .call(serde_json::json!({ "path": "a.txt" }), &ctx)
            .await
            .unwrap();
        assert_eq!(out["path"], "a.txt");
    }
}
