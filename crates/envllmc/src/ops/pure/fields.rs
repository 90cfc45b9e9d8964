//! Field extraction from STRUCT and SPAN values.

use crate::error::ExecError;
use crate::session::Session;
use crate::value::Value;

pub fn get_field(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let field = args[1]
        .as_str()
        .ok_or_else(|| ExecError::runtime("GET_FIELD: FIELD must be STRING"))?
        .to_string();

    match &args[0] {
        Value::Span(span) => match field.as_str() {
            "start" => Ok(Value::Json(serde_json::json!(span.start))),
            "end" => Ok(Value::Json(serde_json::json!(span.end))),
            _ => Err(ExecError::runtime(format!(
                "GET_FIELD: unknown field {field:?} for SPAN (use start or end)"
            ))),
        },
        Value::Struct(map) => match map.get(&field) {
            Some(v) => Ok(Value::Json(v.clone())),
            None => {
                let keys: Vec<&String> = map.keys().collect();
                Err(ExecError::runtime(format!(
                    "GET_FIELD failed: field {field:?} not found. Available fields: {keys:?}"
                )))
            }
        },
        Value::Json(serde_json::Value::Object(map)) => match map.get(&field) {
            Some(v) => Ok(Value::Json(v.clone())),
            None => {
                let keys: Vec<&String> = map.keys().collect();
                Err(ExecError::runtime(format!(
                    "GET_FIELD failed: field {field:?} not found. Available fields: {keys:?}"
                )))
            }
        },
        other => Err(ExecError::runtime(format!(
            "GET_FIELD: SOURCE must be STRUCT or SPAN, got {}",
            other.kind()
        ))),
    }
}

/// Extracts a COST from a struct-like result's `cost` field; absent or
/// non-numeric fields read as zero cost.
pub fn get_cost(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let cost = match &args[0] {
        Value::Struct(map) => map.get("cost").and_then(|v| v.as_i64()),
        Value::Json(serde_json::Value::Object(map)) => map.get("cost").and_then(|v| v.as_i64()),
        _ => None,
    };
    Ok(Value::Cost(cost.unwrap_or(0)))
}
