//! Type-checking linter.
//!
//! Walks a program building a forward symbol table: input declarations seed
//! it, each op's `INTO` defines the kind of its binding, identifiers inherit
//! the source binding's kind. Findings carry a stable code, a location, a
//! human-readable hint, and (for clause-order findings) the canonical
//! statement template.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use envllm_contracts::{CAP_PURE, PROMPT_ALIAS};

use crate::ast::{BodyItem, Expr, OpStmt, Program, Stmt};
use crate::ops::Table;
use crate::parse::Mode;
use crate::trace::{Decision, Phase, Sink, TraceStep};

/// Reserved meta-names models tend to hallucinate references to.
const META_NAMES: &[&str] = &["steps", "json", "response"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintCode {
    UnknownOp,
    ArgCount,
    ClauseOrder,
    TypeMismatch,
    MissingInto,
    UndefinedVar,
    VarReuseForbidden,
    NoMeta,
    DotAccessForbidden,
    MissingRequires,
    OffsetArithmeticForbidden,
    JsonUsedForStructuralData,
}

impl LintCode {
    pub fn as_str(self) -> &'static str {
        match self {
            LintCode::UnknownOp => "LINT_UNKNOWN_OP",
            LintCode::ArgCount => "LINT_ARG_COUNT",
            LintCode::ClauseOrder => "LINT_CLAUSE_ORDER",
            LintCode::TypeMismatch => "LINT_TYPE_MISMATCH",
            LintCode::MissingInto => "LINT_MISSING_INTO",
            LintCode::UndefinedVar => "LINT_UNDEFINED_VAR",
            LintCode::VarReuseForbidden => "LINT_VAR_REUSE_FORBIDDEN",
            LintCode::NoMeta => "LINT_NO_META",
            LintCode::DotAccessForbidden => "LINT_DOT_ACCESS_FORBIDDEN",
            LintCode::MissingRequires => "LINT_MISSING_REQUIRES",
            LintCode::OffsetArithmeticForbidden => "LINT_OFFSET_ARITHMETIC_FORBIDDEN",
            LintCode::JsonUsedForStructuralData => "LINT_JSON_USED_FOR_STRUCTURAL_DATA",
        }
    }
}

impl fmt::Display for LintCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LintError {
    pub code: LintCode,
    pub message: String,
    pub loc: Option<crate::token::Loc>,
    pub hint: Option<String>,
    pub expected_template: Option<String>,
}

impl LintError {
    fn new(code: LintCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            loc: None,
            hint: None,
            expected_template: None,
        }
    }

    fn at(mut self, loc: &crate::token::Loc) -> Self {
        self.loc = Some(loc.clone());
        self
    }

    fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    fn template(mut self, template: impl Into<String>) -> Self {
        self.expected_template = Some(template.into());
        self
    }
}

pub struct Linter<'a> {
    table: &'a Table,
    mode: Mode,
    sink: Option<&'a mut dyn Sink>,
}

impl<'a> Linter<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self {
            table,
            mode: Mode::Compat,
            sink: None,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_sink(mut self, sink: &'a mut dyn Sink) -> Self {
        self.sink = Some(sink);
        self
    }

    fn emit(&mut self, step: TraceStep) {
        if let Some(sink) = &mut self.sink {
            let _ = sink.emit(step);
        }
    }

    pub fn lint(&mut self, prog: &Program) -> Vec<LintError> {
        let mut errs = Vec::new();
        let Some(task) = &prog.task else {
            return errs;
        };

        let mut symbols: BTreeMap<String, String> = BTreeMap::new();
        let mut declared_caps: BTreeSet<String> = BTreeSet::new();

        for input in &task.inputs {
            symbols.insert(input.name.clone(), input.ty.clone());
        }

        self.lint_body(&task.body, &mut symbols, &mut declared_caps, &mut errs);

        if let Some(output) = &task.output {
            if !symbols.contains_key(output) {
                let err = LintError::new(
                    LintCode::UndefinedVar,
                    format!("task output variable {output:?} not defined"),
                )
                .at(&task.loc);
                self.emit(
                    TraceStep::new(Phase::Lint, Decision::Reject)
                        .with_error(err.code.as_str(), &err.message),
                );
                errs.push(err);
            }
        }

        if errs.is_empty() {
            self.emit(TraceStep::new(Phase::Lint, Decision::Accept));
        }
        errs
    }

    fn lint_body(
        &mut self,
        body: &[BodyItem],
        symbols: &mut BTreeMap<String, String>,
        caps: &mut BTreeSet<String>,
        errs: &mut Vec<LintError>,
    ) {
        for item in body {
            match item {
                BodyItem::Requires(req) => {
                    caps.insert(req.capability.clone());
                }
                BodyItem::Cell(cell) => {
                    for stmt in &cell.stmts {
                        self.lint_stmt(stmt, symbols, caps, errs);
                    }
                }
                BodyItem::If(ifs) => {
                    self.lint_expr(&ifs.cond, Some("BOOL"), symbols, errs);
                    // Branches are mutually exclusive at runtime, so each
                    // gets its own scope; both may bind the same name.
                    let mut then_scope = symbols.clone();
                    self.lint_body(&ifs.then_body, &mut then_scope, caps, errs);
                    let mut else_scope = symbols.clone();
                    self.lint_body(&ifs.else_body, &mut else_scope, caps, errs);
                    for (name, ty) in then_scope.into_iter().chain(else_scope) {
                        symbols.entry(name).or_insert(ty);
                    }
                }
                BodyItem::Stmt(stmt) => self.lint_stmt(stmt, symbols, caps, errs),
            }
        }
    }

    fn lint_stmt(
        &mut self,
        stmt: &Stmt,
        symbols: &mut BTreeMap<String, String>,
        caps: &mut BTreeSet<String>,
        errs: &mut Vec<LintError>,
    ) {
        match stmt {
            Stmt::Op(op) => {
                let result_type = self.lint_op_stmt(op, symbols, caps, errs);
                if let Some(into) = &op.into {
                    if symbols.contains_key(into) {
                        errs.push(
                            LintError::new(
                                LintCode::VarReuseForbidden,
                                format!("variable {into:?} already defined"),
                            )
                            .at(&op.loc)
                            .hint(format!(
                                "Rename to {into}_2 or {into}_step{}",
                                symbols.len()
                            )),
                        );
                    } else {
                        symbols
                            .insert(into.clone(), result_type.unwrap_or_else(|| "UNKNOWN".into()));
                    }
                }
            }
            Stmt::SetFinal(s) => self.lint_expr(&s.source, None, symbols, errs),
            Stmt::Print(s) => self.lint_expr(&s.source, None, symbols, errs),
            Stmt::Assert(s) => self.lint_expr(&s.cond, Some("BOOL"), symbols, errs),
            Stmt::ForEach(fe) => {
                match symbols.get(&fe.collection) {
                    None => errs.push(
                        LintError::new(
                            LintCode::UndefinedVar,
                            format!("undefined variable: {}", fe.collection),
                        )
                        .at(&fe.loc),
                    ),
                    Some(ty) if ty != "ROWS" && ty != "UNKNOWN" => errs.push(
                        LintError::new(
                            LintCode::TypeMismatch,
                            format!("FOR_EACH expects ROWS, got {ty}"),
                        )
                        .at(&fe.loc),
                    ),
                    Some(_) => {}
                }
                // The iterator shadows inside the loop body only.
                let mut scoped = symbols.clone();
                scoped.insert(fe.iterator.clone(), "STRUCT".to_string());
                for inner in &fe.body {
                    self.lint_stmt(inner, &mut scoped, caps, errs);
                }
                // Bindings introduced inside the loop stay visible after it,
                // minus the iterator itself.
                scoped.remove(&fe.iterator);
                for (name, ty) in scoped {
                    symbols.entry(name).or_insert(ty);
                }
            }
        }
    }

    fn lint_op_stmt(
        &mut self,
        op: &OpStmt,
        symbols: &mut BTreeMap<String, String>,
        caps: &BTreeSet<String>,
        errs: &mut Vec<LintError>,
    ) -> Option<String> {
        let Some(def) = self.table.get(&op.name) else {
            errs.push(
                LintError::new(LintCode::UnknownOp, format!("unknown operation: {}", op.name))
                    .at(&op.loc),
            );
            return None;
        };

        for cap in &def.capabilities {
            if cap == CAP_PURE {
                continue;
            }
            if !caps.contains(cap) {
                let err = LintError::new(
                    LintCode::MissingRequires,
                    format!(
                        "operation {} requires capability {cap:?} but it was not declared with REQUIRES",
                        op.name
                    ),
                )
                .at(&op.loc)
                .hint(format!(
                    "Add 'REQUIRES capability=\"{cap}\"' to the top of your program."
                ));
                self.emit(
                    TraceStep::new(Phase::Lint, Decision::Reject)
                        .with_op(&op.name)
                        .with_error(err.code.as_str(), &err.message)
                        .with_rule("RULE_MISSING_REQUIRES")
                        .with_hint(err.hint.as_deref().unwrap_or_default()),
                );
                errs.push(err);
            }
        }

        if op.args.len() != def.signature.len() {
            errs.push(
                LintError::new(
                    LintCode::ArgCount,
                    format!(
                        "{}: expected {} arguments, got {}",
                        op.name,
                        def.signature.len(),
                        op.args.len()
                    ),
                )
                .at(&op.loc),
            );
        } else {
            for (i, arg) in op.args.iter().enumerate() {
                let param = &def.signature[i];

                // STRUCT data read through the JSON accessor is a misuse of
                // the weaker type even when it happens to work.
                if op.name == "JSON_GET" && param.kw == "SOURCE" {
                    if let Some(name) = arg.value.as_ident() {
                        if symbols.get(name).map(String::as_str) == Some("STRUCT") {
                            errs.push(
                                LintError::new(
                                    LintCode::JsonUsedForStructuralData,
                                    format!("JSON_GET used on STRUCT variable {name:?}"),
                                )
                                .at(&op.loc)
                                .hint(
                                    "Use GET_FIELD or a specialized getter (e.g. GET_COST) instead.",
                                ),
                            );
                        }
                    }
                }

                if arg.keyword != param.kw {
                    let template = def.canonical_template();
                    errs.push(
                        LintError::new(
                            LintCode::ClauseOrder,
                            format!(
                                "{}: clause {} must be {}, got {}",
                                op.name,
                                i + 1,
                                param.kw,
                                arg.keyword
                            ),
                        )
                        .at(&op.loc)
                        .hint(format!(
                            "Reorder clauses to match canonical form: {template}"
                        ))
                        .template(template),
                    );
                }

                let is_enum_bareword = !param.variants.is_empty()
                    && arg
                        .value
                        .as_ident()
                        .is_some_and(|name| param.variants.iter().any(|v| v == name));

                if !is_enum_bareword {
                    let expected = param.ty.map(|t| t.as_str());
                    self.lint_expr(&arg.value, expected, symbols, errs);
                }

                if self.mode == Mode::Strict
                    && op.name == "OFFSET_ADD"
                    && param.kw == "AMOUNT"
                    && matches!(arg.value, Expr::Int { .. })
                {
                    errs.push(
                        LintError::new(
                            LintCode::OffsetArithmeticForbidden,
                            "literal offset arithmetic (+7, -3) is forbidden in STRICT mode",
                        )
                        .at(&op.loc)
                        .hint(
                            "Use AFTER_TEXT or FIND_REGEX groups instead of hardcoding character counts.",
                        ),
                    );
                }
            }
        }

        if def.into && op.into.is_none() {
            errs.push(
                LintError::new(
                    LintCode::MissingInto,
                    format!("{}: mandatory INTO clause missing", op.name),
                )
                .at(&op.loc),
            );
        }

        if let Some(annotation) = &op.into_type {
            if annotation != def.result_type.as_str() {
                errs.push(
                    LintError::new(
                        LintCode::TypeMismatch,
                        format!(
                            "{}: INTO type annotation mismatch: expected {}, got {annotation}",
                            op.name, def.result_type
                        ),
                    )
                    .at(&op.loc),
                );
            }
        }

        Some(def.result_type.as_str().to_string())
    }

    fn lint_expr(
        &mut self,
        expr: &Expr,
        expected: Option<&str>,
        symbols: &BTreeMap<String, String>,
        errs: &mut Vec<LintError>,
    ) {
        let actual: String = match expr {
            Expr::Ident { name, loc } => {
                if self.mode == Mode::Strict && name.contains('.') {
                    let err = self.dot_access_error(name, loc);
                    self.emit(
                        TraceStep::new(Phase::Lint, Decision::Reject)
                            .with_op(name)
                            .with_error(err.code.as_str(), &err.message)
                            .with_rule("RULE_DOT_ACCESS_TO_GETTER")
                            .with_hint(err.hint.as_deref().unwrap_or_default()),
                    );
                    errs.push(err);
                    return;
                }

                match symbols.get(name) {
                    Some(ty) => ty.clone(),
                    None if name == PROMPT_ALIAS => "TEXT".to_string(),
                    None => {
                        if META_NAMES.contains(&name.as_str()) {
                            errs.push(
                                LintError::new(
                                    LintCode::NoMeta,
                                    format!("forbidden reference to meta-object: {name}"),
                                )
                                .at(loc)
                                .hint(
                                    "Do not attempt to inspect internal DSL state. Only use variables you defined via INTO.",
                                ),
                            );
                        } else {
                            errs.push(
                                LintError::new(
                                    LintCode::UndefinedVar,
                                    format!("undefined variable: {name}"),
                                )
                                .at(loc),
                            );
                        }
                        return;
                    }
                }
            }
            Expr::Str { .. } => "TEXT".to_string(),
            Expr::Int { .. } => "INT".to_string(),
            Expr::Bool { .. } => "BOOL".to_string(),
            Expr::Null { .. } => "NULL".to_string(),
        };

        let Some(expected) = expected else { return };
        if expected.is_empty() || actual == "UNKNOWN" || actual == "NULL" || expected == actual {
            return;
        }
        // STRING literals satisfy TEXT parameters through dispatch promotion.
        if expected == "TEXT" && actual == "STRING" {
            return;
        }

        let subject = expr.as_ident().unwrap_or("value");
        let hint = match (expected, actual.as_str()) {
            ("TEXT", _) => Some(format!("Use TO_TEXT VALUE {subject} to convert.")),
            ("OFFSET", "INT") => Some(format!("Use OFFSET VALUE {subject} to create a position.")),
            ("STRUCT", "SPAN") => Some(
                "SPAN is not a STRUCT. Use GET_SPAN_START or GET_SPAN_END to get offsets from a SPAN."
                    .to_string(),
            ),
            ("OFFSET", "SPAN") => Some(
                "You passed a SPAN where an OFFSET was expected. Use GET_SPAN_START or GET_SPAN_END."
                    .to_string(),
            ),
            _ => None,
        };

        let mut err = LintError::new(
            LintCode::TypeMismatch,
            format!("type mismatch: expected {expected}, got {actual}"),
        )
        .at(expr.loc());
        if let Some(hint) = hint {
            err = err.hint(hint);
        }
        errs.push(err);
    }

    fn dot_access_error(&self, name: &str, loc: &crate::token::Loc) -> LintError {
        let mut parts = name.splitn(2, '.');
        let obj = parts.next().unwrap_or(name);
        let prop = parts.next().unwrap_or("");

        let hint = match prop {
            "cost" => format!("Use GET_COST RESULT {obj} INTO cost: COST"),
            "start" => format!("Use GET_SPAN_START SOURCE {obj} INTO start: OFFSET"),
            "end" => format!("Use GET_SPAN_END SOURCE {obj} INTO end: OFFSET"),
            _ => format!("Use GET_FIELD SOURCE {obj} FIELD \"{prop}\" INTO val: JSON"),
        };

        LintError::new(
            LintCode::DotAccessForbidden,
            format!("dot access ({name}) is not allowed in STRICT mode"),
        )
        .at(loc)
        .hint(hint.clone())
        .template(hint)
    }
}

/// Convenience wrapper for one-shot linting.
pub fn lint_program(table: &Table, prog: &Program, mode: Mode) -> Vec<LintError> {
    Linter::new(table).with_mode(mode).lint(prog)
}
