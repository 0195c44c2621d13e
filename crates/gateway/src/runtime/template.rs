//! Template resolver — expands `{{secret:KEY}}` and `{{task:ID.FIELD}}`
//! placeholders across every string leaf of a params tree.
//!
//! Secrets are expanded *after* policy evaluation and any approval wait, so
//! the pre-resolution form is what policy, reviewers, and the audit log see.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use hb_domain::{Error, Result};

use crate::runtime::secrets::SecretStore;

fn secret_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{secret:([A-Za-z0-9_]+)\}\}").unwrap())
}

fn task_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{task:([A-Za-z0-9_\-]+)(?:\.([A-Za-z0-9_.\-]+))?\}\}").unwrap()
    })
}

/// Expand `{{secret:KEY}}` placeholders. Unknown keys fail the whole tree.
pub fn expand_secrets(params: &Value, secrets: &SecretStore) -> Result<Value> {
    map_strings(params, &mut |s| {
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in secret_re().captures_iter(s) {
            let m = caps.get(0).unwrap();
            let key = &caps[1];
            let value = secrets.get(key).ok_or_else(|| {
                Error::InvalidParameter(format!("unknown secret key '{key}'"))
            })?;
            out.push_str(&s[last..m.start()]);
            out.push_str(&value);
            last = m.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    })
}

/// True if any string leaf still carries a secret placeholder. Used by
/// tests and the audit invariants.
pub fn contains_secret_template(params: &Value) -> bool {
    match params {
        Value::String(s) => secret_re().is_match(s),
        Value::Array(items) => items.iter().any(contains_secret_template),
        Value::Object(map) => map.values().any(contains_secret_template),
        _ => false,
    }
}

/// Expand `{{task:ID.FIELD}}` placeholders against completed task outputs.
///
/// `{{task:ID}}` standing alone as the whole leaf substitutes the entire
/// output preserving its JSON type; field references and embedded
/// placeholders substitute the string form. `FIELD` may be a dotted path.
pub fn expand_task_refs(params: &Value, outputs: &HashMap<String, Value>) -> Result<Value> {
    map_strings(params, &mut |s| {
        // Whole-leaf, field-less placeholder: substitute the raw output.
        if let Some(caps) = task_re().captures(s) {
            if caps.get(0).unwrap().as_str() == s && caps.get(2).is_none() {
                return lookup(outputs, &caps[1], None);
            }
        }
        // Otherwise splice the string form of each reference.
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in task_re().captures_iter(s) {
            let m = caps.get(0).unwrap();
            let value = lookup(outputs, &caps[1], caps.get(2).map(|mm| mm.as_str()))?;
            out.push_str(&s[last..m.start()]);
            out.push_str(&stringify(&value));
            last = m.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    })
}

fn lookup(outputs: &HashMap<String, Value>, task_id: &str, field: Option<&str>) -> Result<Value> {
    let output = outputs.get(task_id).ok_or_else(|| {
        Error::InvalidParameter(format!("unknown task reference '{task_id}'"))
    })?;
    match field {
        None => Ok(output.clone()),
        Some(path) => {
            let mut current = output;
            for segment in path.split('.') {
                current = current.get(segment).ok_or_else(|| {
                    Error::InvalidParameter(format!(
                        "task '{task_id}' output has no field '{path}'"
                    ))
                })?;
            }
            Ok(current.clone())
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walk the tree applying `f` to every string leaf.
fn map_strings(
    value: &Value,
    f: &mut impl FnMut(&str) -> Result<Value>,
) -> Result<Value> {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => {
            let mapped: Result<Vec<Value>> =
                items.iter().map(|v| map_strings(v, f)).collect();
            Ok(Value::Array(mapped?))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), map_strings(v, f)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
