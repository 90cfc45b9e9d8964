//! JSON decode and path access.

use serde_json::Value as Json;

use crate::error::ExecError;
use crate::ops::pure::text_of;
use crate::session::Session;
use crate::value::Value;

pub fn json_parse(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let text = text_of(s, &args[0])?;
    let decoded: Json = serde_json::from_str(&text)
        .map_err(|e| ExecError::runtime(format!("JSON_PARSE failed: {e}")))?;
    Ok(Value::Json(decoded))
}

pub fn json_get(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let path = match &args[1] {
        Value::Str(p) => p.clone(),
        Value::Text(_) => text_of(s, &args[1])?,
        other => {
            return Err(ExecError::runtime(format!(
                "JSON_GET: PATH must be TEXT, got {}",
                other.kind()
            )))
        }
    };

    let root = match &args[0] {
        Value::Json(j) => j.clone(),
        Value::Struct(m) => Json::Object(m.clone().into_iter().collect()),
        other => {
            return Err(ExecError::runtime(format!(
                "JSON_GET: SOURCE must be JSON, got {}",
                other.kind()
            )))
        }
    };

    // `$.` prefixes are a common model habit; strip rather than reject.
    let path = path.strip_prefix("$.").unwrap_or(&path);

    let mut current = root;
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        let Json::Object(map) = &current else {
            return Err(ExecError::runtime(
                "JSON_GET failed: current value is not an object",
            ));
        };
        match map.get(part) {
            Some(next) => current = next.clone(),
            None => {
                let keys: Vec<&String> = map.keys().collect();
                return Err(ExecError::runtime(format!(
                    "JSON_GET failed: key {part:?} not found. Available keys: {keys:?}"
                )));
            }
        }
    }

    Ok(Value::Json(current))
}
