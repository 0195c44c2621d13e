//! Policy engine — an ordered rule list compiled once from config.
//!
//! Rules are evaluated top to bottom; the first match wins. Pattern rules
//! (globs on the primary param) for a tool come before its unconditional
//! rule, so `block_patterns` still apply when the tool itself is allowed.
//! When nothing matches, the descriptor's `requires_hitl_default` decides.

use glob::Pattern;
use serde_json::Value;

use hb_domain::config::{Config, PolicyAction};
use hb_domain::invocation::Invocation;
use hb_domain::tool::ToolDescriptor;
use hb_domain::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Block { reason: String },
    Approve { reason: String, ttl_seconds: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleAction {
    Allow,
    Block,
    RequireApproval,
}

#[derive(Debug, Clone)]
struct PolicyRule {
    category: String,
    /// `None` matches every tool in the category.
    name: Option<String>,
    /// Glob applied to the invocation's primary param.
    pattern: Option<Pattern>,
    action: RuleAction,
    reason: String,
}

impl PolicyRule {
    fn matches(&self, inv: &Invocation) -> bool {
        if self.category != inv.category {
            return false;
        }
        if let Some(ref name) = self.name {
            if name != &inv.name {
                return false;
            }
        }
        match &self.pattern {
            None => true,
            Some(pattern) => match primary_param(&inv.params) {
                Some(value) => pattern.matches(value),
                None => false,
            },
        }
    }
}

/// Params checked by glob rules, in priority order. The first present key
/// is the tool's primary param.
const PRIMARY_PARAM_KEYS: &[&str] = &[
    "path", "source", "url", "command", "container", "message", "query", "id", "name",
];

fn primary_param(params: &Value) -> Option<&str> {
    let obj = params.as_object()?;
    PRIMARY_PARAM_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
}

pub struct PolicyEngine {
    rules: Vec<PolicyRule>,
    default_ttl_seconds: u64,
}

impl PolicyEngine {
    /// Compile the rule table from config. Keys are `"category.name"` for a
    /// single tool or `"category"` for the whole category.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut rules = Vec::new();

        let mut keys: Vec<&String> = config.tools.keys().collect();
        keys.sort();
        for key in keys {
            let rule_cfg = &config.tools[key];
            let (category, name) = match key.split_once('.') {
                Some((c, n)) => (c.to_owned(), Some(n.to_owned())),
                None => (key.clone(), None),
            };
            let tool_label = name
                .as_deref()
                .map(|n| format!("{category}.{n}"))
                .unwrap_or_else(|| category.clone());

            for raw in &rule_cfg.block_patterns {
                rules.push(PolicyRule {
                    category: category.clone(),
                    name: name.clone(),
                    pattern: Some(compile(raw, &tool_label)?),
                    action: RuleAction::Block,
                    reason: rule_cfg.reason.clone().unwrap_or_else(|| {
                        format!("'{raw}' is blocked for {tool_label}")
                    }),
                });
            }
            for raw in &rule_cfg.hitl_patterns {
                rules.push(PolicyRule {
                    category: category.clone(),
                    name: name.clone(),
                    pattern: Some(compile(raw, &tool_label)?),
                    action: RuleAction::RequireApproval,
                    reason: rule_cfg.reason.clone().unwrap_or_else(|| {
                        format!("'{raw}' requires approval for {tool_label}")
                    }),
                });
            }
            if let Some(action) = rule_cfg.policy {
                rules.push(PolicyRule {
                    category,
                    name,
                    pattern: None,
                    action: match action {
                        PolicyAction::Allow => RuleAction::Allow,
                        PolicyAction::Block => RuleAction::Block,
                        PolicyAction::Hitl => RuleAction::RequireApproval,
                    },
                    reason: rule_cfg
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("policy override for {tool_label}")),
                });
            }
        }

        Ok(Self {
            rules,
            default_ttl_seconds: config.hitl.ttl_seconds,
        })
    }

    /// Pure, synchronous decision. Consulted before any secret expansion.
    pub fn evaluate(&self, inv: &Invocation, desc: &ToolDescriptor) -> PolicyDecision {
        for rule in &self.rules {
            if rule.matches(inv) {
                return match rule.action {
                    RuleAction::Allow => PolicyDecision::Allow,
                    RuleAction::Block => PolicyDecision::Block {
                        reason: rule.reason.clone(),
                    },
                    RuleAction::RequireApproval => PolicyDecision::Approve {
                        reason: rule.reason.clone(),
                        ttl_seconds: self.default_ttl_seconds,
                    },
                };
            }
        }

        if desc.requires_hitl_default {
            PolicyDecision::Approve {
                reason: format!(
                    "{}.{} requires approval by default",
                    desc.category, desc.name
                ),
                ttl_seconds: self.default_ttl_seconds,
            }
        } else {
            PolicyDecision::Allow
        }
    }

    pub fn default_ttl_seconds(&self) -> u64 {
        self.default_ttl_seconds
    }
}

fn compile(raw: &str, tool: &str) -> Result<Pattern> {
    Pattern::new(raw)
        .map_err(|e| Error::Internal(format!("invalid glob '{raw}' for {tool}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hb_domain::config::ToolOverride;
    use hb_domain::invocation::Protocol;
    use hb_domain::tool::{ExecContext, ToolHandler};
    use serde_json::json;
    use std::sync::Arc;

    struct Noop;

    #[async_trait::async_trait]
    impl ToolHandler for Noop {
        async fn call(&self, _params: Value, _ctx: &ExecContext) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn descriptor(category: &str, name: &str, hitl_default: bool) -> ToolDescriptor {
        ToolDescriptor {
            category: category.into(),
            name: name.into(),
            description: String::new(),
            input_schema: json!({ "type": "object" }),
            output_schema: None,
            requires_hitl_default: hitl_default,
            path_params: Vec::new(),
            handler: Arc::new(Noop),
        }
    }

    fn engine(overrides: &[(&str, ToolOverride)]) -> PolicyEngine {
        let mut config = Config::default();
        for (key, rule) in overrides {
            config.tools.insert(key.to_string(), rule.clone());
        }
        PolicyEngine::from_config(&config).unwrap()
    }

    fn inv(category: &str, name: &str, params: Value) -> Invocation {
        Invocation::new(category, name, params, Protocol::Rest)
    }

    #[test]
    fn no_rules_and_no_default_allows() {
        let engine = engine(&[]);
        let decision = engine.evaluate(
            &inv("fs", "read", json!({ "path": "a.txt" })),
            &descriptor("fs", "read", false),
        );
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn hitl_default_requires_approval_when_unmatched() {
        let engine = engine(&[]);
        let decision = engine.evaluate(
            &inv("shell", "run", json!({ "command": "ls" })),
            &descriptor("shell", "run", true),
        );
        assert!(matches!(decision, PolicyDecision::Approve { .. }));
    }

    #[test]
    fn explicit_allow_overrides_hitl_default() {
        let engine = engine(&[(
            "shell.run",
            ToolOverride {
                policy: Some(PolicyAction::Allow),
                ..Default::default()
            },
        )]);
        let decision = engine.evaluate(
            &inv("shell", "run", json!({ "command": "ls" })),
            &descriptor("shell", "run", true),
        );
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn block_rule_wins_with_reason() {
        let engine = engine(&[(
            "docker",
            ToolOverride {
                policy: Some(PolicyAction::Block),
                reason: Some("docker is disabled on this host".into()),
                ..Default::default()
            },
        )]);
        let decision = engine.evaluate(
            &inv("docker", "ps", json!({})),
            &descriptor("docker", "ps", false),
        );
        match decision {
            PolicyDecision::Block { reason } => {
                assert!(reason.contains("disabled"));
            }
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn hitl_pattern_matches_primary_param() {
        let engine = engine(&[(
            "fs.write",
            ToolOverride {
                hitl_patterns: vec!["*.conf".into()],
                ..Default::default()
            },
        )]);

        let approve = engine.evaluate(
            &inv("fs", "write", json!({ "path": "app.conf", "content": "x" })),
            &descriptor("fs", "write", false),
        );
        assert!(matches!(approve, PolicyDecision::Approve { .. }));

        let allow = engine.evaluate(
            &inv("fs", "write", json!({ "path": "notes.txt", "content": "x" })),
            &descriptor("fs", "write", false),
        );
        assert_eq!(allow, PolicyDecision::Allow);
    }

    #[test]
    fn block_pattern_beats_unconditional_allow() {
        let engine = engine(&[(
            "fs.write",
            ToolOverride {
                policy: Some(PolicyAction::Allow),
                block_patterns: vec!["*.pem".into()],
                ..Default::default()
            },
        )]);
        let decision = engine.evaluate(
            &inv("fs", "write", json!({ "path": "key.pem", "content": "x" })),
            &descriptor("fs", "write", false),
        );
        assert!(matches!(decision, PolicyDecision::Block { .. }));
    }

    #[test]
    fn category_wide_rule_matches_every_tool() {
        let engine = engine(&[(
            "git",
            ToolOverride {
                policy: Some(PolicyAction::Hitl),
                ..Default::default()
            },
        )]);
        for name in ["status", "log", "commit"] {
            let decision = engine.evaluate(
                &inv("git", name, json!({})),
                &descriptor("git", name, false),
            );
            assert!(matches!(decision, PolicyDecision::Approve { .. }), "{name}");
        }
    }

    #[test]
    fn pattern_rule_without_primary_param_does_not_match() {
        let engine = engine(&[(
            "fs.write",
            ToolOverride {
                block_patterns: vec!["*".into()],
                ..Default::default()
            },
        )]);
        let decision = engine.evaluate(
            &inv("fs", "write", json!({ "content": "no path here" })),
            &descriptor("fs", "write", false),
        );
        assert_eq!(decision, PolicyDecision::Allow);
    }
}
