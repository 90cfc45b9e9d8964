//! Text, offset, and span operations.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::json;

use crate::error::ExecError;
use crate::ops::pure::text_of;
use crate::session::Session;
use crate::value::{Span, Value};

pub fn stats(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let text = text_of(s, &args[0])?;
    let mut fields = BTreeMap::new();
    fields.insert("bytes".to_string(), json!(text.len()));
    fields.insert("lines".to_string(), json!(text.split('\n').count()));
    Ok(Value::Struct(fields))
}

pub fn find_text(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let pos = locate(s, args)?.map_or(-1, |(start, _)| start);
    Ok(Value::Offset(pos))
}

/// `FIND_TEXT` positioned just past the needle.
pub fn after_text(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let pos = locate(s, args)?.map_or(-1, |(_, end)| end);
    Ok(Value::Offset(pos))
}

fn locate(s: &mut Session, args: &[Value]) -> Result<Option<(i64, i64)>, ExecError> {
    let text = text_of(s, &args[0])?;
    let needle = text_of(s, &args[1])?;
    let mode = args[2].as_str().unwrap_or("FIRST").to_string();
    let ignore_case = args[3].as_bool().unwrap_or(false);

    let (haystack, needle) = if ignore_case {
        (text.to_lowercase(), needle.to_lowercase())
    } else {
        (text, needle)
    };

    let found = match mode.as_str() {
        "LAST" => haystack.rfind(&needle),
        _ => haystack.find(&needle),
    };
    Ok(found.map(|at| (at as i64, (at + needle.len()) as i64)))
}

pub fn window_text(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let handle = args[0]
        .as_text()
        .ok_or_else(|| ExecError::runtime("WINDOW_TEXT: SOURCE must be TEXT"))?
        .clone();
    let center = args[1].as_int().unwrap_or(0);
    let radius = args[2].as_int().unwrap_or(0);
    let out = s
        .store_mut()
        .window(&handle, center, radius)
        .map_err(ExecError::runtime)?;
    Ok(Value::Text(out))
}

pub fn slice_text(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let handle = args[0]
        .as_text()
        .ok_or_else(|| ExecError::runtime("SLICE_TEXT: SOURCE must be TEXT"))?
        .clone();
    let start = args[1].as_int().unwrap_or(0);
    let end = args[2].as_int().unwrap_or(0);
    let out = s
        .store_mut()
        .slice(&handle, start, end)
        .map_err(ExecError::runtime)?;
    Ok(Value::Text(out))
}

pub fn find_regex(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let text = text_of(s, &args[0])?;
    let pattern = text_of(s, &args[1])?;
    let mode = args[2].as_str().unwrap_or("FIRST").to_string();

    let re = Regex::new(&pattern)
        .map_err(|e| ExecError::runtime(format!("FIND_REGEX invalid pattern {pattern:?}: {e}")))?;

    let matched = match mode.as_str() {
        "LAST" => re.find_iter(&text).last(),
        _ => re.find(&text),
    };

    let span = matched.map_or(Span { start: -1, end: -1 }, |m| Span {
        start: m.start() as i64,
        end: m.end() as i64,
    });
    Ok(Value::Span(span))
}

pub fn get_span_start(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let span = args[0]
        .as_span()
        .ok_or_else(|| ExecError::runtime("GET_SPAN_START: SOURCE must be SPAN"))?;
    Ok(Value::Offset(span.start))
}

pub fn get_span_end(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let span = args[0]
        .as_span()
        .ok_or_else(|| ExecError::runtime("GET_SPAN_END: SOURCE must be SPAN"))?;
    Ok(Value::Offset(span.end))
}

pub fn concat_text(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let a = text_of(s, &args[0])?;
    let b = text_of(s, &args[1])?;
    let out = s.store_mut().add(&format!("{a}{b}"));
    Ok(Value::Text(out))
}

pub fn to_text(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let rendered = match &args[0] {
        Value::Text(h) => {
            let handle = h.clone();
            return Ok(Value::Text(handle));
        }
        Value::Str(v) => v.clone(),
        other => other.display_string(),
    };
    let out = s.store_mut().add(&rendered);
    Ok(Value::Text(out))
}

pub fn offset(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    Ok(Value::Offset(args[0].as_int().unwrap_or(0)))
}

pub fn offset_add(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let base = args[0].as_int().unwrap_or(0);
    let amount = args[1].as_int().unwrap_or(0);
    Ok(Value::Offset(base + amount))
}

pub fn span(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    Ok(Value::Span(Span {
        start: args[0].as_int().unwrap_or(0),
        end: args[1].as_int().unwrap_or(0),
    }))
}

pub fn as_span(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let start = args[0].as_int().unwrap_or(0);
    let length = args[1].as_int().unwrap_or(0);
    Ok(Value::Span(Span {
        start,
        end: start + length,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;

    fn session() -> Session {
        Session::new(Policy::permissive())
    }

    fn text(s: &mut Session, body: &str) -> Value {
        Value::Text(s.store_mut().add(body))
    }

    #[test]
    fn stats_counts_bytes_and_lines() {
        let mut s = session();
        let src = text(&mut s, "one\ntwo\nthree");
        let Value::Struct(fields) = stats(&mut s, &[src]).unwrap() else {
            panic!("expected STRUCT");
        };
        assert_eq!(fields["bytes"], json!(13));
        assert_eq!(fields["lines"], json!(3));
    }

    #[test]
    fn find_text_first_last_and_missing() {
        let mut s = session();
        let src = text(&mut s, "ab ab ab");
        let needle = text(&mut s, "ab");
        let mode_first = Value::Str("FIRST".into());
        let mode_last = Value::Str("LAST".into());
        let no_case = Value::Bool(false);

        let first = find_text(
            &mut s,
            &[src.clone(), needle.clone(), mode_first, no_case.clone()],
        )
        .unwrap();
        assert_eq!(first, Value::Offset(0));

        let last = find_text(&mut s, &[src.clone(), needle, mode_last, no_case.clone()]).unwrap();
        assert_eq!(last, Value::Offset(6));

        let ghost = text(&mut s, "zz");
        let missing = find_text(
            &mut s,
            &[src, ghost, Value::Str("FIRST".into()), no_case],
        )
        .unwrap();
        assert_eq!(missing, Value::Offset(-1));
    }

    #[test]
    fn find_text_ignore_case() {
        let mut s = session();
        let src = text(&mut s, "Hello World");
        let needle = text(&mut s, "world");
        let hit = find_text(
            &mut s,
            &[src, needle, Value::Str("FIRST".into()), Value::Bool(true)],
        )
        .unwrap();
        assert_eq!(hit, Value::Offset(6));
    }

    #[test]
    fn after_text_lands_past_the_needle() {
        let mut s = session();
        let src = text(&mut s, "key: value");
        let needle = text(&mut s, "key: ");
        let pos = after_text(
            &mut s,
            &[src, needle, Value::Str("FIRST".into()), Value::Bool(false)],
        )
        .unwrap();
        assert_eq!(pos, Value::Offset(5));
    }

    #[test]
    fn find_regex_first_and_no_match_sentinel() {
        let mut s = session();
        let src = text(&mut s, "My email is test@example.com.");
        let pattern = text(&mut s, "[a-z]+@[a-z.]+");
        let hit = find_regex(&mut s, &[src.clone(), pattern, Value::Str("FIRST".into())]).unwrap();
        assert_eq!(
            hit,
            Value::Span(Span {
                start: 12,
                end: 29
            })
        );

        let none = text(&mut s, "[0-9]+");
        let missing = find_regex(&mut s, &[src, none, Value::Str("FIRST".into())]).unwrap();
        assert_eq!(missing, Value::Span(Span { start: -1, end: -1 }));
    }

    #[test]
    fn find_regex_rejects_bad_patterns() {
        let mut s = session();
        let src = text(&mut s, "x");
        let bad = text(&mut s, "[unclosed");
        let err = find_regex(&mut s, &[src, bad, Value::Str("FIRST".into())]).unwrap_err();
        assert!(err.message().contains("invalid pattern"), "{err}");
    }

    #[test]
    fn concat_and_to_text() {
        let mut s = session();
        let a = text(&mut s, "foo");
        let b = text(&mut s, "bar");
        let joined = concat_text(&mut s, &[a, b]).unwrap();
        let Value::Text(h) = &joined else { panic!() };
        assert_eq!(s.store().get(h), Some("foobar"));

        let rendered = to_text(&mut s, &[Value::Int(42)]).unwrap();
        let Value::Text(h) = &rendered else { panic!() };
        assert_eq!(s.store().get(h), Some("42"));

        let null_text = to_text(&mut s, &[Value::Null]).unwrap();
        let Value::Text(h) = &null_text else { panic!() };
        assert_eq!(s.store().get(h), Some("null"));
    }

    #[test]
    fn span_constructors_and_getters() {
        let mut s = session();
        let built = span(&mut s, &[Value::Offset(3), Value::Offset(9)]).unwrap();
        assert_eq!(built, Value::Span(Span { start: 3, end: 9 }));

        let sized = as_span(&mut s, &[Value::Offset(3), Value::Int(4)]).unwrap();
        assert_eq!(sized, Value::Span(Span { start: 3, end: 7 }));

        assert_eq!(
            get_span_start(&mut s, &[built.clone()]).unwrap(),
            Value::Offset(3)
        );
        assert_eq!(get_span_end(&mut s, &[built]).unwrap(), Value::Offset(9));
    }

    #[test]
    fn offset_add_keeps_offset_kind() {
        let mut s = session();
        let moved = offset_add(&mut s, &[Value::Offset(10), Value::Int(-4)]).unwrap();
        assert_eq!(moved, Value::Offset(6));
    }
}
