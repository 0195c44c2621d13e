//! Tool registry — the fixed `(category, name)` → descriptor map built once
//! at startup by the composition root.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use hb_domain::tool::{ExecContext, ToolDescriptor, ToolHandler};
use hb_domain::{Error, Result};

pub struct ToolRegistry {
    tools: HashMap<(String, String), Arc<ToolDescriptor>>,
    /// Registration order, for stable listings.
    order: Vec<(String, String)>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a descriptor. `(category, name)` must be unique.
    pub fn register(&mut self, desc: ToolDescriptor) -> Result<()> {
        let key = desc.key();
        if self.tools.contains_key(&key) {
            return Err(Error::Internal(format!(
                "duplicate tool registration: {}.{}",
                key.0, key.1
            )));
        }
        self.order.push(key.clone());
        self.tools.insert(key, Arc::new(desc));
        Ok(())
    }

    pub fn get(&self, category: &str, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.tools
            .get(&(category.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Resolve an MCP-style flat name (`category_name`).
    pub fn get_mcp(&self, mcp_name: &str) -> Option<Arc<ToolDescriptor>> {
        let (category, name) = mcp_name.split_once('_')?;
        self.get(category, name)
    }

    /// All descriptors in registration order.
    pub fn list(&self) -> Vec<Arc<ToolDescriptor>> {
        self.order
            .iter()
            .filter_map(|key| self.tools.get(key).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Closure handler adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, ExecContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn call(&self, params: Value, ctx: &ExecContext) -> Result<Value> {
        (self.0)(params, ctx.clone()).await
    }
}

/// Wrap an async closure as a `ToolHandler`.
pub fn handler<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value, ExecContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Decode params into a request struct, classifying failures.
pub fn decode<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| Error::InvalidParameter(format!("bad params: {e}")))
}
