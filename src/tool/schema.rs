//! Minimal validation of tool arguments against their declared schema.
//!
//! Tools declare JSON-schema shaped input. The executor checks the pieces
//! the providers actually emit (object shape, `required`, primitive
//! `properties` types) before a tool ever runs; anything deeper is the
//! tool's own job.

use serde_json::Value;

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        // Integers are numbers too.
        "number" => matches!(value, Value::Number(_)),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        other => type_name(value) == other,
    }
}

/// Check `args` against `schema`. Returns every problem found, not just the
/// first, so the model gets a complete correction in one error result.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), Vec<String>> {
    let mut issues = Vec::new();

    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        issues.push(format!(
            "expected an argument object, got {}",
            type_name(args)
        ));
        return Err(issues);
    }

    let empty = serde_json::Map::new();
    let fields = args.as_object().unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(key) {
                issues.push(format!("missing required field '{key}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop) in properties {
            let Some(value) = fields.get(key) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if let Some(expected) = prop.get("type").and_then(Value::as_str)
                && !matches_type(value, expected)
            {
                issues.push(format!(
                    "field '{key}' should be {expected}, got {}",
                    type_name(value)
                ));
            }
            if let Some(allowed) = prop.get("enum").and_then(Value::as_array)
                && !allowed.contains(value)
            {
                issues.push(format!("field '{key}' is not one of the allowed values"));
            }
        }
    }

    if issues.is_empty() { Ok(()) } else { Err(issues) }
}
