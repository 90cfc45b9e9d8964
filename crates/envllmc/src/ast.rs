//! AST for EnvLLM programs.
//!
//! Nodes are owned enums carrying source locations but no identity. Rewrite
//! rules build replacement statement lists and swap them at the cell boundary
//! instead of patching nodes behind references.

use std::collections::BTreeMap;

use crate::token::Loc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub version: Option<String>,
    pub dialect: Option<String>,
    pub extensions: BTreeMap<String, String>,
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Task {
    pub loc: Loc,
    pub name: String,
    pub inputs: Vec<InputDecl>,
    pub body: Vec<BodyItem>,
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputDecl {
    pub loc: Loc,
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyItem {
    Requires(Requirement),
    Cell(Cell),
    If(IfStmt),
    /// Legacy compat shape: a statement outside any cell.
    Stmt(Stmt),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requirement {
    pub loc: Loc,
    pub capability: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    pub loc: Loc,
    pub name: String,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub loc: Loc,
    pub cond: Expr,
    pub then_body: Vec<BodyItem>,
    pub else_body: Vec<BodyItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Op(OpStmt),
    SetFinal(SetFinalStmt),
    Assert(AssertStmt),
    Print(PrintStmt),
    ForEach(ForEachStmt),
}

impl Stmt {
    pub fn loc(&self) -> &Loc {
        match self {
            Stmt::Op(s) => &s.loc,
            Stmt::SetFinal(s) => &s.loc,
            Stmt::Assert(s) => &s.loc,
            Stmt::Print(s) => &s.loc,
            Stmt::ForEach(s) => &s.loc,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpStmt {
    pub loc: Loc,
    pub name: String,
    pub args: Vec<KwArg>,
    pub into: Option<String>,
    pub into_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KwArg {
    pub keyword: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetFinalStmt {
    pub loc: Loc,
    pub source: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssertStmt {
    pub loc: Loc,
    pub cond: Expr,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintStmt {
    pub loc: Loc,
    pub source: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForEachStmt {
    pub loc: Loc,
    pub iterator: String,
    pub collection: String,
    pub limit: i64,
    pub body: Vec<Stmt>,
}

/// Expressions are leaves only: identifier, string, integer, boolean, null.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident { loc: Loc, name: String },
    Str { loc: Loc, value: String },
    Int { loc: Loc, value: i64 },
    Bool { loc: Loc, value: bool },
    Null { loc: Loc },
}

impl Expr {
    pub fn loc(&self) -> &Loc {
        match self {
            Expr::Ident { loc, .. }
            | Expr::Str { loc, .. }
            | Expr::Int { loc, .. }
            | Expr::Bool { loc, .. }
            | Expr::Null { loc } => loc,
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident {
            loc: Loc::default(),
            name: name.into(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Str {
            loc: Loc::default(),
            value: value.into(),
        }
    }
}

/// Visits every op statement in the program, including those nested in
/// if-bodies and loop bodies.
pub fn walk_ops(prog: &Program, f: &mut dyn FnMut(&OpStmt)) {
    let Some(task) = &prog.task else { return };
    walk_body_ops(&task.body, f);
}

fn walk_body_ops(body: &[BodyItem], f: &mut dyn FnMut(&OpStmt)) {
    for item in body {
        match item {
            BodyItem::Requires(_) => {}
            BodyItem::Cell(cell) => walk_stmt_ops(&cell.stmts, f),
            BodyItem::If(ifs) => {
                walk_body_ops(&ifs.then_body, f);
                walk_body_ops(&ifs.else_body, f);
            }
            BodyItem::Stmt(stmt) => walk_stmt_ops(std::slice::from_ref(stmt), f),
        }
    }
}

fn walk_stmt_ops(stmts: &[Stmt], f: &mut dyn FnMut(&OpStmt)) {
    for stmt in stmts {
        match stmt {
            Stmt::Op(op) => f(op),
            Stmt::ForEach(fe) => walk_stmt_ops(&fe.body, f),
            _ => {}
        }
    }
}

/// Visits every expression in the program.
pub fn walk_exprs(prog: &Program, f: &mut dyn FnMut(&Expr)) {
    let Some(task) = &prog.task else { return };
    walk_body_exprs(&task.body, f);
}

fn walk_body_exprs(body: &[BodyItem], f: &mut dyn FnMut(&Expr)) {
    for item in body {
        match item {
            BodyItem::Requires(_) => {}
            BodyItem::Cell(cell) => walk_stmt_exprs(&cell.stmts, f),
            BodyItem::If(ifs) => {
                f(&ifs.cond);
                walk_body_exprs(&ifs.then_body, f);
                walk_body_exprs(&ifs.else_body, f);
            }
            BodyItem::Stmt(stmt) => walk_stmt_exprs(std::slice::from_ref(stmt), f),
        }
    }
}

/// Visits every expression in one statement, including loop bodies.
pub fn stmt_exprs(stmt: &Stmt, f: &mut dyn FnMut(&Expr)) {
    walk_stmt_exprs(std::slice::from_ref(stmt), f);
}

fn walk_stmt_exprs(stmts: &[Stmt], f: &mut dyn FnMut(&Expr)) {
    for stmt in stmts {
        match stmt {
            Stmt::Op(op) => {
                for arg in &op.args {
                    f(&arg.value);
                }
            }
            Stmt::SetFinal(s) => f(&s.source),
            Stmt::Assert(s) => f(&s.cond),
            Stmt::Print(s) => f(&s.source),
            Stmt::ForEach(fe) => walk_stmt_exprs(&fe.body, f),
        }
    }
}

/// Mutable expression walk over a statement, used by rewrites that swap
/// references after inserting getter ops.
pub fn rewrite_stmt_exprs(stmt: &mut Stmt, f: &mut dyn FnMut(&mut Expr)) {
    match stmt {
        Stmt::Op(op) => {
            for arg in &mut op.args {
                f(&mut arg.value);
            }
        }
        Stmt::SetFinal(s) => f(&mut s.source),
        Stmt::Assert(s) => f(&mut s.cond),
        Stmt::Print(s) => f(&mut s.source),
        Stmt::ForEach(fe) => {
            for inner in &mut fe.body {
                rewrite_stmt_exprs(inner, f);
            }
        }
    }
}
