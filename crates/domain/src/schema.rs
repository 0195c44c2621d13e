//! Structural validation of tool params against a declared JSON schema.
//!
//! Covers the subset tool descriptors actually declare: `type`, `required`,
//! `properties`, `items`, and `enum`. Unknown object properties are allowed.

use serde_json::Value;

use crate::error::{Error, Result};

/// Validate `value` against `schema`. Violations return `Error::Schema`
/// with a path-qualified message.
pub fn validate(schema: &Value, value: &Value) -> Result<()> {
    validate_at(schema, value, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<()> {
    let Some(schema_obj) = schema.as_object() else {
        // A non-object schema constrains nothing.
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(|t| t.as_str()) {
        check_type(expected, value, path)?;
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return Err(Error::Schema(format!(
                "{path}: value {value} is not one of the allowed values"
            )));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
            for key in required.iter().filter_map(|k| k.as_str()) {
                if !obj.contains_key(key) {
                    return Err(Error::Schema(format!(
                        "{path}: missing required property '{key}'"
                    )));
                }
            }
        }
        if let Some(props) = schema_obj.get("properties").and_then(|p| p.as_object()) {
            for (key, prop_schema) in props {
                if let Some(v) = obj.get(key) {
                    validate_at(prop_schema, v, &format!("{path}.{key}"))?;
                }
            }
        }
    }

    if let (Some(items), Some(arr)) = (schema_obj.get("items"), value.as_array()) {
        for (i, item) in arr.iter().enumerate() {
            validate_at(items, item, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn check_type(expected: &str, value: &Value, path: &str) -> Result<()> {
    let ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Schema(format!(
            "{path}: expected {expected}, got {}",
            type_name(value)
        )))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" },
                "mode": { "type": "string", "enum": ["create", "overwrite"] }
            },
            "required": ["path", "content"]
        })
    }

    #[test]
    fn accepts_valid_params() {
        let params = json!({ "path": "a.txt", "content": "hi" });
        assert!(validate(&write_schema(), &params).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let params = json!({ "path": "a.txt" });
        let err = validate(&write_schema(), &params).unwrap_err();
        assert!(err.to_string().contains("content"));
        assert_eq!(err.http_status(), 422);
    }

    #[test]
    fn rejects_wrong_type() {
        let params = json!({ "path": 42, "content": "hi" });
        let err = validate(&write_schema(), &params).unwrap_err();
        assert!(err.to_string().contains("$.path"));
    }

    #[test]
    fn rejects_value_outside_enum() {
        let params = json!({ "path": "a", "content": "b", "mode": "append" });
        assert!(validate(&write_schema(), &params).is_err());
    }

    #[test]
    fn extra_properties_are_allowed() {
        let params = json!({ "path": "a", "content": "b", "unknown": true });
        assert!(validate(&write_schema(), &params).is_ok());
    }

    #[test]
    fn validates_array_items() {
        let schema = json!({ "type": "array", "items": { "type": "string" } });
        assert!(validate(&schema, &json!(["a", "b"])).is_ok());
        assert!(validate(&schema, &json!(["a", 1])).is_err());
    }

    #[test]
    fn integer_accepts_whole_numbers_only() {
        let schema = json!({ "type": "integer" });
        assert!(validate(&schema, &json!(3)).is_ok());
        assert!(validate(&schema, &json!(3.5)).is_err());
    }
}
