//! The core module: text, span, JSON, struct, and row operations, plus the
//! recursive `SUBCALL`.

use envllm_contracts::CAP_PURE;

use crate::error::ExecError;
use crate::ops::pure::{fields, json, rows, text, text_of};
use crate::ops::registry::{Handler, Module};
use crate::ops::table::{OpDef, Param};
use crate::session::Session;
use crate::value::{Kind, Value};

pub struct CoreModule;

fn pure_op(name: &str, result_type: Kind, signature: Vec<Param>) -> OpDef {
    OpDef {
        name: name.to_string(),
        capabilities: vec![CAP_PURE.to_string()],
        result_type,
        signature,
        into: true,
    }
}

impl Module for CoreModule {
    fn id(&self) -> &'static str {
        "core"
    }

    fn operations(&self) -> Vec<OpDef> {
        vec![
            pure_op(
                "STATS",
                Kind::Struct,
                vec![Param::typed("SOURCE", Kind::Text)],
            ),
            pure_op(
                "FIND_TEXT",
                Kind::Offset,
                vec![
                    Param::typed("SOURCE", Kind::Text),
                    Param::typed("NEEDLE", Kind::Text),
                    Param::enumerated("MODE", &["FIRST", "LAST"]),
                    Param::typed("IGNORE_CASE", Kind::Bool),
                ],
            ),
            pure_op(
                "AFTER_TEXT",
                Kind::Offset,
                vec![
                    Param::typed("SOURCE", Kind::Text),
                    Param::typed("NEEDLE", Kind::Text),
                    Param::enumerated("MODE", &["FIRST", "LAST"]),
                    Param::typed("IGNORE_CASE", Kind::Bool),
                ],
            ),
            pure_op(
                "WINDOW_TEXT",
                Kind::Text,
                vec![
                    Param::typed("SOURCE", Kind::Text),
                    Param::typed("CENTER", Kind::Offset),
                    Param::typed("RADIUS", Kind::Int),
                ],
            ),
            pure_op(
                "SLICE_TEXT",
                Kind::Text,
                vec![
                    Param::typed("SOURCE", Kind::Text),
                    Param::typed("START", Kind::Offset),
                    Param::typed("END", Kind::Offset),
                ],
            ),
            pure_op(
                "FIND_REGEX",
                Kind::Span,
                vec![
                    Param::typed("SOURCE", Kind::Text),
                    Param::typed("PATTERN", Kind::Text),
                    Param::enumerated("MODE", &["FIRST", "LAST"]),
                ],
            ),
            pure_op(
                "JSON_PARSE",
                Kind::Json,
                vec![Param::typed("SOURCE", Kind::Text)],
            ),
            pure_op(
                "JSON_GET",
                Kind::Json,
                vec![
                    Param::typed("SOURCE", Kind::Json),
                    Param::typed("PATH", Kind::Text),
                ],
            ),
            pure_op(
                "GET_SPAN_START",
                Kind::Offset,
                vec![Param::typed("SOURCE", Kind::Span)],
            ),
            pure_op(
                "GET_SPAN_END",
                Kind::Offset,
                vec![Param::typed("SOURCE", Kind::Span)],
            ),
            pure_op(
                "CONCAT_TEXT",
                Kind::Text,
                vec![
                    Param::typed("A", Kind::Text),
                    Param::typed("B", Kind::Text),
                ],
            ),
            pure_op("TO_TEXT", Kind::Text, vec![Param::untyped("VALUE")]),
            pure_op("OFFSET", Kind::Offset, vec![Param::typed("VALUE", Kind::Int)]),
            pure_op(
                "OFFSET_ADD",
                Kind::Offset,
                vec![
                    Param::typed("OFFSET", Kind::Offset),
                    Param::typed("AMOUNT", Kind::Int),
                ],
            ),
            pure_op(
                "SPAN",
                Kind::Span,
                vec![
                    Param::typed("START", Kind::Offset),
                    Param::typed("END", Kind::Offset),
                ],
            ),
            pure_op(
                "AS_SPAN",
                Kind::Span,
                vec![
                    Param::typed("OFFSET", Kind::Offset),
                    Param::typed("LENGTH", Kind::Int),
                ],
            ),
            pure_op(
                "GET_FIELD",
                Kind::Json,
                vec![Param::untyped("SOURCE"), Param::typed("FIELD", Kind::String)],
            ),
            pure_op("GET_COST", Kind::Cost, vec![Param::untyped("RESULT")]),
            pure_op(
                "SELECT_FIELDS",
                Kind::Rows,
                vec![
                    Param::typed("SOURCE", Kind::Rows),
                    Param::typed("FIELDS", Kind::List),
                ],
            ),
            pure_op(
                "FILTER_ROWS",
                Kind::Rows,
                vec![
                    Param::typed("SOURCE", Kind::Rows),
                    Param::typed("KEY", Kind::String),
                    Param::enumerated("OP", &["EQ", "NE", "GT", "LT"]),
                    Param::untyped("VALUE"),
                ],
            ),
            pure_op(
                "AGGREGATE_ROWS",
                Kind::Rows,
                vec![
                    Param::typed("SOURCE", Kind::Rows),
                    Param::typed("GROUP_BY", Kind::String),
                    Param::enumerated("COMPUTE", &["COUNT"]),
                ],
            ),
            OpDef {
                name: "SUBCALL".to_string(),
                capabilities: vec!["llm".to_string()],
                result_type: Kind::Json,
                signature: vec![
                    Param::typed("SOURCE", Kind::Text),
                    Param::typed("TASK", Kind::Text),
                    Param::typed("DEPTH_COST", Kind::Int),
                ],
                into: true,
            },
        ]
    }

    fn handlers(&self) -> Vec<(&'static str, Handler)> {
        vec![
            ("STATS", text::stats),
            ("FIND_TEXT", text::find_text),
            ("AFTER_TEXT", text::after_text),
            ("WINDOW_TEXT", text::window_text),
            ("SLICE_TEXT", text::slice_text),
            ("FIND_REGEX", text::find_regex),
            ("JSON_PARSE", json::json_parse),
            ("JSON_GET", json::json_get),
            ("GET_SPAN_START", text::get_span_start),
            ("GET_SPAN_END", text::get_span_end),
            ("CONCAT_TEXT", text::concat_text),
            ("TO_TEXT", text::to_text),
            ("OFFSET", text::offset),
            ("OFFSET_ADD", text::offset_add),
            ("SPAN", text::span),
            ("AS_SPAN", text::as_span),
            ("GET_FIELD", fields::get_field),
            ("GET_COST", fields::get_cost),
            ("SELECT_FIELDS", rows::select_fields),
            ("FILTER_ROWS", rows::filter_rows),
            ("AGGREGATE_ROWS", rows::aggregate_rows),
            ("SUBCALL", subcall),
        ]
    }
}

fn subcall(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let source = args[0]
        .as_text()
        .ok_or_else(|| ExecError::runtime("SUBCALL: SOURCE must be TEXT"))?
        .clone();
    let task = text_of(s, &args[1])?;
    let depth_cost = args[2].as_int().unwrap_or(0).max(0) as u64;
    s.subcall(source, task, depth_cost)
}
