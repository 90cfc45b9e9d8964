//! Typed runtime values.
//!
//! Every value carries exactly its payload; structurally identical kinds
//! (`OFFSET` vs `INT`) stay distinct types and convert only through dedicated
//! operations. The wire form is `{"kind": KIND, "v": PAYLOAD}`.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "INT")]
    Int,
    #[serde(rename = "BOOL")]
    Bool,
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "STRUCT")]
    Struct,
    #[serde(rename = "SPAN")]
    Span,
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "LIST")]
    List,
    #[serde(rename = "ROWS")]
    Rows,
    #[serde(rename = "OFFSET")]
    Offset,
    #[serde(rename = "COST")]
    Cost,
    #[serde(rename = "NULL")]
    Null,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Int => "INT",
            Kind::Bool => "BOOL",
            Kind::Text => "TEXT",
            Kind::Json => "JSON",
            Kind::Struct => "STRUCT",
            Kind::Span => "SPAN",
            Kind::String => "STRING",
            Kind::List => "LIST",
            Kind::Rows => "ROWS",
            Kind::Offset => "OFFSET",
            Kind::Cost => "COST",
            Kind::Null => "NULL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INT" => Some(Kind::Int),
            "BOOL" => Some(Kind::Bool),
            "TEXT" => Some(Kind::Text),
            "JSON" => Some(Kind::Json),
            "STRUCT" => Some(Kind::Struct),
            "SPAN" => Some(Kind::Span),
            "STRING" => Some(Kind::String),
            "LIST" => Some(Kind::List),
            "ROWS" => Some(Kind::Rows),
            "OFFSET" => Some(Kind::Offset),
            "COST" => Some(Kind::Cost),
            "NULL" => Some(Kind::Null),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An `[start, end)` byte range within a text handle. `{-1,-1}` is the
/// no-match sentinel produced by `FIND_REGEX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: i64,
    pub end: i64,
}

/// Opaque reference to interned text. The id is content-derived, so handles
/// compare by id; bytes are only reachable through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextHandle {
    pub id: String,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_bytes: Option<usize>,
}

impl PartialEq for TextHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TextHandle {}

/// A ROWS payload: an ordered list of field maps.
pub type Row = BTreeMap<String, Json>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Text(TextHandle),
    Json(Json),
    Struct(BTreeMap<String, Json>),
    Span(Span),
    Str(String),
    List(Vec<Value>),
    Rows(Vec<Row>),
    Offset(i64),
    Cost(i64),
    Null,
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Int(_) => Kind::Int,
            Value::Bool(_) => Kind::Bool,
            Value::Text(_) => Kind::Text,
            Value::Json(_) => Kind::Json,
            Value::Struct(_) => Kind::Struct,
            Value::Span(_) => Kind::Span,
            Value::Str(_) => Kind::String,
            Value::List(_) => Kind::List,
            Value::Rows(_) => Kind::Rows,
            Value::Offset(_) => Kind::Offset,
            Value::Cost(_) => Kind::Cost,
            Value::Null => Kind::Null,
        }
    }

    pub fn as_text(&self) -> Option<&TextHandle> {
        match self {
            Value::Text(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload shared by the INT/OFFSET/COST kinds.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) | Value::Offset(i) | Value::Cost(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_span(&self) -> Option<Span> {
        match self {
            Value::Span(s) => Some(*s),
            _ => None,
        }
    }

    /// Rendering used by `TO_TEXT` and print events.
    pub fn display_string(&self) -> String {
        match self {
            Value::Int(i) | Value::Offset(i) | Value::Cost(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => s.clone(),
            Value::Text(h) => h.id.clone(),
            Value::Json(j) => j.to_string(),
            Value::Struct(m) => Json::Object(m.clone().into_iter().collect()).to_string(),
            Value::Span(s) => format!("[{},{})", s.start, s.end),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::display_string).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Rows(rows) => format!("<{} rows>", rows.len()),
            Value::Null => "null".to_string(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Value", 2)?;
        st.serialize_field("kind", self.kind().as_str())?;
        match self {
            Value::Int(i) | Value::Offset(i) | Value::Cost(i) => st.serialize_field("v", i)?,
            Value::Bool(b) => st.serialize_field("v", b)?,
            Value::Text(h) => st.serialize_field("v", h)?,
            Value::Json(j) => st.serialize_field("v", j)?,
            Value::Struct(m) => st.serialize_field("v", m)?,
            Value::Span(s) => st.serialize_field("v", s)?,
            Value::Str(s) => st.serialize_field("v", s)?,
            Value::List(items) => st.serialize_field("v", items)?,
            Value::Rows(rows) => st.serialize_field("v", rows)?,
            Value::Null => st.serialize_field("v", &Json::Null)?,
        }
        st.end()
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            kind: String,
            #[serde(default)]
            v: Json,
        }
        let wire = Wire::deserialize(deserializer)?;
        let kind = Kind::parse(&wire.kind)
            .ok_or_else(|| D::Error::custom(format!("unknown value kind: {}", wire.kind)))?;
        decode_payload(kind, wire.v).map_err(D::Error::custom)
    }
}

fn decode_payload(kind: Kind, v: Json) -> Result<Value, String> {
    fn int_of(v: &Json, kind: Kind) -> Result<i64, String> {
        v.as_i64()
            .ok_or_else(|| format!("{kind} payload must be an integer, got {v}"))
    }

    match kind {
        Kind::Int => Ok(Value::Int(int_of(&v, kind)?)),
        Kind::Offset => Ok(Value::Offset(int_of(&v, kind)?)),
        Kind::Cost => Ok(Value::Cost(int_of(&v, kind)?)),
        Kind::Bool => v
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| format!("BOOL payload must be a boolean, got {v}")),
        Kind::Text => serde_json::from_value::<TextHandle>(v)
            .map(Value::Text)
            .map_err(|e| format!("bad TEXT payload: {e}")),
        Kind::Json => Ok(Value::Json(v)),
        Kind::Struct => serde_json::from_value::<BTreeMap<String, Json>>(v)
            .map(Value::Struct)
            .map_err(|e| format!("bad STRUCT payload: {e}")),
        Kind::Span => serde_json::from_value::<Span>(v)
            .map(Value::Span)
            .map_err(|e| format!("bad SPAN payload: {e}")),
        Kind::String => v
            .as_str()
            .map(|s| Value::Str(s.to_string()))
            .ok_or_else(|| format!("STRING payload must be a string, got {v}")),
        Kind::List => serde_json::from_value::<Vec<Value>>(v)
            .map(Value::List)
            .map_err(|e| format!("bad LIST payload: {e}")),
        Kind::Rows => serde_json::from_value::<Vec<Row>>(v)
            .map(Value::Rows)
            .map_err(|e| format!("bad ROWS payload: {e}")),
        Kind::Null => Ok(Value::Null),
    }
}
