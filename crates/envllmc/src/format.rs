//! Canonical strict-mode formatter.
//!
//! `format` is idempotent and round-trips: parsing its output yields a
//! structurally equal program. Cells indent statements by two spaces, loop
//! bodies by four; if/else/end sit at body level.

use std::fmt::Write;

use crate::ast::{BodyItem, Cell, Expr, ForEachStmt, IfStmt, Program, Stmt};

pub fn format(prog: &Program) -> String {
    let mut out = String::new();

    if let Some(version) = &prog.version {
        let _ = writeln!(out, "RLMDSL {version}");
    }
    if let Some(dialect) = &prog.dialect {
        match dialect.split_once('=') {
            Some((name, value)) => {
                let _ = writeln!(out, "DIALECT {name} = {value}");
            }
            None => {
                let _ = writeln!(out, "DIALECT {dialect}");
            }
        }
    }
    for (name, version) in &prog.extensions {
        let _ = writeln!(out, "EXT {name} = {version}");
    }

    let Some(task) = &prog.task else {
        return out;
    };

    let _ = writeln!(out, "TASK {}:", task.name);
    for input in &task.inputs {
        let _ = writeln!(out, "INPUT {}: {}", input.name, input.ty);
    }
    format_body(&mut out, &task.body);
    if let Some(output) = &task.output {
        let _ = writeln!(out, "OUTPUT {output}");
    }

    out
}

fn format_body(out: &mut String, body: &[BodyItem]) {
    for item in body {
        match item {
            BodyItem::Requires(req) => {
                let _ = writeln!(out, "REQUIRES capability={}", quote(&req.capability));
            }
            BodyItem::Cell(cell) => format_cell(out, cell),
            BodyItem::If(ifs) => format_if(out, ifs),
            BodyItem::Stmt(stmt) => {
                format_stmt(out, stmt, 0);
            }
        }
    }
}

fn format_cell(out: &mut String, cell: &Cell) {
    let _ = writeln!(out, "CELL {}:", cell.name);
    for stmt in &cell.stmts {
        format_stmt(out, stmt, 2);
    }
}

fn format_if(out: &mut String, ifs: &IfStmt) {
    let _ = write!(out, "IF ");
    format_expr(out, &ifs.cond);
    out.push_str(":\n");
    format_body(out, &ifs.then_body);
    if !ifs.else_body.is_empty() {
        out.push_str("ELSE:\n");
        format_body(out, &ifs.else_body);
    }
    out.push_str("END\n");
}

fn format_stmt(out: &mut String, stmt: &Stmt, indent: usize) {
    for _ in 0..indent {
        out.push(' ');
    }
    match stmt {
        Stmt::Op(op) => {
            out.push_str(&op.name);
            for arg in &op.args {
                out.push(' ');
                out.push_str(&arg.keyword);
                out.push(' ');
                format_expr(out, &arg.value);
            }
            if let Some(into) = &op.into {
                let _ = write!(out, " INTO {into}");
                if let Some(ty) = &op.into_type {
                    let _ = write!(out, ": {ty}");
                }
            }
            out.push('\n');
        }
        Stmt::SetFinal(s) => {
            out.push_str("SET_FINAL SOURCE ");
            format_expr(out, &s.source);
            out.push('\n');
        }
        Stmt::Assert(s) => {
            out.push_str("ASSERT COND ");
            format_expr(out, &s.cond);
            let _ = write!(out, " MESSAGE {}", quote(&s.message));
            out.push('\n');
        }
        Stmt::Print(s) => {
            out.push_str("PRINT SOURCE ");
            format_expr(out, &s.source);
            out.push('\n');
        }
        Stmt::ForEach(fe) => format_for_each(out, fe, indent),
    }
}

fn format_for_each(out: &mut String, fe: &ForEachStmt, indent: usize) {
    let _ = writeln!(
        out,
        "FOR_EACH {} IN {} LIMIT {}:",
        fe.iterator, fe.collection, fe.limit
    );
    for stmt in &fe.body {
        format_stmt(out, stmt, indent + 2);
    }
}

fn format_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Ident { name, .. } => out.push_str(name),
        Expr::Str { value, .. } => out.push_str(&quote(value)),
        Expr::Int { value, .. } => {
            let _ = write!(out, "{value}");
        }
        Expr::Bool { value, .. } => out.push_str(if *value { "true" } else { "false" }),
        Expr::Null { .. } => out.push_str("null"),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse, Mode};

    const PROGRAM: &str = "RLMDSL 0.2\nTASK extract:\nINPUT PROMPT: TEXT\nREQUIRES capability=\"llm\"\nCELL locate:\n  FIND_TEXT SOURCE PROMPT NEEDLE \"a \\\"quoted\\\" bit\" MODE FIRST IGNORE_CASE false INTO pos: OFFSET\n  FOR_EACH row IN rows LIMIT 3:\n    PRINT SOURCE row\n  ASSERT COND true MESSAGE \"line\\nbreak\"\nIF true:\nCELL yes:\n  TO_TEXT VALUE 1 INTO a: TEXT\nELSE:\nCELL no:\n  TO_TEXT VALUE 2 INTO b: TEXT\nEND\nOUTPUT pos\n";

    #[test]
    fn format_round_trips_structurally() {
        let prog = parse("t", PROGRAM, Mode::Compat).unwrap();
        let formatted = format(&prog);
        let reparsed = parse("t", &formatted, Mode::Compat).unwrap();
        assert_eq!(clear_locs(prog), clear_locs(reparsed));
    }

    #[test]
    fn format_is_idempotent() {
        let prog = parse("t", PROGRAM, Mode::Compat).unwrap();
        let once = format(&prog);
        let twice = format(&parse("t", &once, Mode::Compat).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn formatted_output_parses_in_strict_mode() {
        let src = "TASK t:\nCELL main:\n    TO_TEXT    VALUE 1 INTO x\nOUTPUT x\n";
        let compat = parse("t", src, Mode::Compat).unwrap();
        // Strict needs annotations; fill before formatting.
        let ops = crate::ops::Registry::with_builtin_modules();
        let engine = crate::rewrite::Engine::new(crate::rewrite::Registry::with_default_rules(
            std::rc::Rc::new(ops.table().clone()),
        ));
        let (repaired, _) = engine.auto_repair(compat).unwrap();
        let formatted = format(&repaired);
        assert!(parse("t", &formatted, Mode::Strict).is_ok(), "{formatted}");
    }

    /// Structural equality modulo source locations.
    fn clear_locs(mut prog: crate::ast::Program) -> crate::ast::Program {
        use crate::ast::*;
        use crate::token::Loc;

        fn fix_expr(e: &mut Expr) {
            match e {
                Expr::Ident { loc, .. }
                | Expr::Str { loc, .. }
                | Expr::Int { loc, .. }
                | Expr::Bool { loc, .. }
                | Expr::Null { loc } => *loc = Loc::default(),
            }
        }

        fn fix_stmt(s: &mut Stmt) {
            match s {
                Stmt::Op(op) => {
                    op.loc = Loc::default();
                    for arg in &mut op.args {
                        fix_expr(&mut arg.value);
                    }
                }
                Stmt::SetFinal(x) => {
                    x.loc = Loc::default();
                    fix_expr(&mut x.source);
                }
                Stmt::Assert(x) => {
                    x.loc = Loc::default();
                    fix_expr(&mut x.cond);
                }
                Stmt::Print(x) => {
                    x.loc = Loc::default();
                    fix_expr(&mut x.source);
                }
                Stmt::ForEach(x) => {
                    x.loc = Loc::default();
                    for inner in &mut x.body {
                        fix_stmt(inner);
                    }
                }
            }
        }

        fn fix_body(body: &mut [BodyItem]) {
            for item in body {
                match item {
                    BodyItem::Requires(r) => r.loc = Loc::default(),
                    BodyItem::Cell(c) => {
                        c.loc = Loc::default();
                        for stmt in &mut c.stmts {
                            fix_stmt(stmt);
                        }
                    }
                    BodyItem::If(i) => {
                        i.loc = Loc::default();
                        fix_expr(&mut i.cond);
                        fix_body(&mut i.then_body);
                        fix_body(&mut i.else_body);
                    }
                    BodyItem::Stmt(s) => fix_stmt(s),
                }
            }
        }

        if let Some(task) = &mut prog.task {
            task.loc = Loc::default();
            for input in &mut task.inputs {
                input.loc = Loc::default();
            }
            fix_body(&mut task.body);
        }
        prog
    }
}
