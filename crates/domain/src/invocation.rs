use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The surface an invocation arrived on. Dispatch behaves identically for
/// both; the value is recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rest,
    Mcp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Rest => write!(f, "rest"),
            Protocol::Mcp => write!(f, "mcp"),
        }
    }
}

/// Non-sensitive caller metadata, carried for audit only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// The canonical, protocol-independent form of a tool call.
///
/// Created by an adapter, consumed by the dispatch engine, discarded after
/// the audit record is written.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: Uuid,
    pub category: String,
    pub name: String,
    pub params: Value,
    pub protocol: Protocol,
    pub caller: CallerContext,
    pub received_at: DateTime<Utc>,
}

impl Invocation {
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        params: Value,
        protocol: Protocol,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: category.into(),
            name: name.into(),
            params,
            protocol,
            caller: CallerContext::default(),
            received_at: Utc::now(),
        }
    }

    pub fn with_caller(mut self, caller: CallerContext) -> Self {
        self.caller = caller;
        self
    }

    /// `category.name`, the form used in logs and config keys.
    pub fn tool_key(&self) -> String {
        format!("{}.{}", self.category, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = Invocation::new("fs", "read", serde_json::json!({}), Protocol::Rest);
        let b = Invocation::new("fs", "read", serde_json::json!({}), Protocol::Rest);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn tool_key_joins_with_dot() {
        let inv = Invocation::new("memory", "search", serde_json::json!({}), Protocol::Mcp);
        assert_eq!(inv.tool_key(), "memory.search");
    }

    #[test]
    fn protocol_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Protocol::Rest).unwrap(), "\"rest\"");
        assert_eq!(serde_json::to_string(&Protocol::Mcp).unwrap(), "\"mcp\"");
    }
}
