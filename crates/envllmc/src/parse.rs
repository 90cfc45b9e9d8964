//! Two-mode recursive-descent parser.
//!
//! Compat and strict share one body. Compat additionally accepts the legacy
//! top-level shape (requirements followed by cells, wrapped into a synthetic
//! task named `default`) and tolerates missing `INTO` type annotations and
//! free indentation. Strict requires a `TASK` block, `INTO name: TYPE` on
//! every op statement, cell statements at the cell column + 2, and loop
//! bodies at column 5.
//!
//! The parser does not recover; migration and repair belong to the rewrite
//! engine.

use std::fmt;

use crate::ast::{
    AssertStmt, BodyItem, Cell, Expr, ForEachStmt, IfStmt, InputDecl, KwArg, OpStmt, PrintStmt,
    Program, Requirement, SetFinalStmt, Stmt, Task,
};
use crate::lexer::Lexer;
use crate::token::{Loc, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Compat,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub loc: Loc,
    pub message: String,
}

impl ParseError {
    fn new(loc: &Loc, message: impl Into<String>) -> Self {
        Self {
            loc: loc.clone(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.loc, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses `src` under the given mode.
pub fn parse(file: &str, src: &str, mode: Mode) -> Result<Program, ParseError> {
    Parser::new(file, src, mode).parse()
}

pub struct Parser {
    cur: Token,
    peek: Token,
    lexer: Lexer,
    mode: Mode,
}

impl Parser {
    pub fn new(file: &str, src: &str, mode: Mode) -> Self {
        let mut lexer = Lexer::new(file, src);
        let cur = lexer.next_token();
        let peek = lexer.next_token();
        Self {
            cur,
            peek,
            lexer,
            mode,
        }
    }

    fn bump(&mut self) {
        self.cur = std::mem::replace(&mut self.peek, self.lexer.next_token());
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(&self.cur.loc, message)
    }

    fn unexpected(&self, what: &str) -> ParseError {
        self.err(format!(
            "expected {what}, got {} ({:?})",
            self.cur.kind, self.cur.value
        ))
    }

    pub fn parse(&mut self) -> Result<Program, ParseError> {
        let mut prog = Program::default();

        if self.cur.kind == TokenKind::Rlmdsl {
            self.bump();
            if self.cur.kind != TokenKind::Ident && self.cur.kind != TokenKind::Int {
                return Err(self.unexpected("version after RLMDSL"));
            }
            prog.version = Some(self.cur.value.clone());
            self.bump();
            self.expect_newline()?;
        }

        loop {
            match self.cur.kind {
                TokenKind::Newline => self.bump(),
                TokenKind::Dialect => self.parse_dialect(&mut prog)?,
                TokenKind::Ext => self.parse_ext(&mut prog)?,
                _ => break,
            }
        }

        if self.cur.kind == TokenKind::Task {
            prog.task = Some(self.parse_task()?);
        } else if self.mode == Mode::Compat {
            prog.task = Some(self.parse_legacy_task()?);
        } else {
            return Err(self.err("expected TASK in STRICT mode"));
        }

        check_unique_cell_names(prog.task.as_ref())?;
        Ok(prog)
    }

    /// Legacy top-level shape: requirements followed by cells, wrapped into a
    /// synthetic task named `default`. Anything else is rejected rather than
    /// silently normalized.
    fn parse_legacy_task(&mut self) -> Result<Task, ParseError> {
        let mut task = Task {
            loc: self.cur.loc.clone(),
            name: "default".to_string(),
            ..Default::default()
        };
        while self.cur.kind == TokenKind::Requires {
            let req = self.parse_requirement()?;
            task.body.push(BodyItem::Requires(req));
        }
        while self.cur.kind != TokenKind::Eof {
            match self.cur.kind {
                TokenKind::Newline => self.bump(),
                TokenKind::Cell => {
                    let cell = self.parse_cell()?;
                    task.body.push(BodyItem::Cell(cell));
                }
                _ => return Err(self.unexpected("CELL")),
            }
        }
        Ok(task)
    }

    fn parse_task(&mut self) -> Result<Task, ParseError> {
        let mut task = Task {
            loc: self.cur.loc.clone(),
            ..Default::default()
        };
        self.bump(); // TASK

        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("task name"));
        }
        task.name = self.cur.value.clone();
        self.bump();

        if self.cur.kind != TokenKind::Colon {
            return Err(self.unexpected("':' after task name"));
        }
        self.bump();
        self.expect_newline()?;

        loop {
            match self.cur.kind {
                TokenKind::Newline => self.bump(),
                TokenKind::Input => {
                    let input = self.parse_input()?;
                    task.inputs.push(input);
                }
                _ => break,
            }
        }

        while self.cur.kind != TokenKind::Output && self.cur.kind != TokenKind::Eof {
            if self.cur.kind == TokenKind::Newline {
                self.bump();
                continue;
            }
            let item = self.parse_body_item()?;
            task.body.push(item);
        }

        if self.cur.kind != TokenKind::Output {
            return Err(self.unexpected("OUTPUT declaration"));
        }
        self.bump();

        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("output identifier"));
        }
        task.output = Some(self.cur.value.clone());
        self.bump();
        self.expect_newline()?;

        Ok(task)
    }

    fn parse_input(&mut self) -> Result<InputDecl, ParseError> {
        let loc = self.cur.loc.clone();
        self.bump(); // INPUT

        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("input name"));
        }
        let name = self.cur.value.clone();
        self.bump();

        if self.cur.kind != TokenKind::Colon {
            return Err(self.unexpected("':' after input name"));
        }
        self.bump();

        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("input type"));
        }
        let ty = self.cur.value.clone();
        self.bump();
        self.expect_newline()?;

        Ok(InputDecl { loc, name, ty })
    }

    fn parse_body_item(&mut self) -> Result<BodyItem, ParseError> {
        match self.cur.kind {
            TokenKind::Requires => Ok(BodyItem::Requires(self.parse_requirement()?)),
            TokenKind::Cell => Ok(BodyItem::Cell(self.parse_cell()?)),
            TokenKind::If => Ok(BodyItem::If(self.parse_if()?)),
            TokenKind::SetFinal
            | TokenKind::Assert
            | TokenKind::Print
            | TokenKind::ForEach
            | TokenKind::Ident => Ok(BodyItem::Stmt(self.parse_statement()?)),
            _ => Err(self.unexpected("body item")),
        }
    }

    fn parse_if(&mut self) -> Result<IfStmt, ParseError> {
        let loc = self.cur.loc.clone();
        self.bump(); // IF

        let cond = self.parse_expr()?;

        if self.cur.kind != TokenKind::Colon {
            return Err(self.unexpected("':' after IF condition"));
        }
        self.bump();
        self.expect_newline()?;

        let mut then_body = Vec::new();
        while !matches!(
            self.cur.kind,
            TokenKind::Else | TokenKind::End | TokenKind::Eof
        ) {
            if self.cur.kind == TokenKind::Newline {
                self.bump();
                continue;
            }
            then_body.push(self.parse_body_item()?);
        }

        let mut else_body = Vec::new();
        if self.cur.kind == TokenKind::Else {
            self.bump();
            if self.cur.kind != TokenKind::Colon {
                return Err(self.unexpected("':' after ELSE"));
            }
            self.bump();
            self.expect_newline()?;

            while !matches!(self.cur.kind, TokenKind::End | TokenKind::Eof) {
                if self.cur.kind == TokenKind::Newline {
                    self.bump();
                    continue;
                }
                else_body.push(self.parse_body_item()?);
            }
        }

        if self.cur.kind != TokenKind::End {
            return Err(self.unexpected("END after IF block"));
        }
        self.bump();
        self.expect_newline()?;

        Ok(IfStmt {
            loc,
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_requirement(&mut self) -> Result<Requirement, ParseError> {
        let loc = self.cur.loc.clone();
        self.bump(); // REQUIRES

        if self.cur.kind != TokenKind::Capability {
            return Err(self.unexpected("'capability' after REQUIRES"));
        }
        self.bump();

        if self.cur.kind != TokenKind::Eq {
            return Err(self.unexpected("'=' after capability"));
        }
        self.bump();

        if self.cur.kind != TokenKind::Str {
            return Err(self.unexpected("capability name as string"));
        }
        let capability = self.cur.value.clone();
        self.bump();
        self.expect_newline()?;

        Ok(Requirement { loc, capability })
    }

    fn parse_cell(&mut self) -> Result<Cell, ParseError> {
        let loc = self.cur.loc.clone();
        let cell_col = loc.col;
        self.bump(); // CELL

        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("cell name"));
        }
        let name = self.cur.value.clone();
        self.bump();

        if self.cur.kind != TokenKind::Colon {
            return Err(self.unexpected("':' after cell name"));
        }
        self.bump();
        self.expect_newline()?;

        let mut stmts = Vec::new();
        while !matches!(
            self.cur.kind,
            TokenKind::Cell
                | TokenKind::Output
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::End
                | TokenKind::Eof
        ) {
            if self.cur.kind == TokenKind::Newline {
                self.bump();
                continue;
            }

            if self.mode == Mode::Strict && self.cur.loc.col != cell_col + 2 {
                return Err(self.err(format!(
                    "expected exactly {} spaces of indentation for statement",
                    cell_col + 1
                )));
            }

            stmts.push(self.parse_statement()?);
        }

        Ok(Cell { loc, name, stmts })
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.cur.kind {
            TokenKind::SetFinal => Ok(Stmt::SetFinal(self.parse_set_final()?)),
            TokenKind::Assert => Ok(Stmt::Assert(self.parse_assert()?)),
            TokenKind::Print => Ok(Stmt::Print(self.parse_print()?)),
            TokenKind::ForEach => Ok(Stmt::ForEach(self.parse_for_each()?)),
            TokenKind::Ident => Ok(Stmt::Op(self.parse_op_statement()?)),
            _ => Err(self.unexpected("statement")),
        }
    }

    fn parse_op_statement(&mut self) -> Result<OpStmt, ParseError> {
        let mut stmt = OpStmt {
            loc: self.cur.loc.clone(),
            name: self.cur.value.clone(),
            ..Default::default()
        };
        self.bump();

        // Argument keywords may collide with reserved words (e.g. an op with
        // an END or LIMIT clause), so a few keyword kinds are accepted here.
        while matches!(
            self.cur.kind,
            TokenKind::Ident
                | TokenKind::Task
                | TokenKind::Input
                | TokenKind::Output
                | TokenKind::End
                | TokenKind::Limit
        ) {
            let keyword = self.cur.value.clone();
            self.bump();
            let value = self.parse_expr()?;
            stmt.args.push(KwArg { keyword, value });
        }

        if self.cur.kind != TokenKind::Into {
            return Err(self.unexpected("INTO"));
        }
        self.bump();

        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("identifier after INTO"));
        }
        stmt.into = Some(self.cur.value.clone());
        self.bump();

        if self.cur.kind == TokenKind::Colon {
            self.bump();
            if self.cur.kind != TokenKind::Ident {
                return Err(self.unexpected("type after ':'"));
            }
            stmt.into_type = Some(self.cur.value.clone());
            self.bump();
        } else if self.mode == Mode::Strict {
            return Err(self.err("mandatory type annotation ': <Type>' missing in STRICT mode"));
        }

        self.expect_newline()?;
        Ok(stmt)
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let loc = self.cur.loc.clone();
        let expr = match self.cur.kind {
            TokenKind::Ident => Expr::Ident {
                loc,
                name: self.cur.value.clone(),
            },
            TokenKind::Str => Expr::Str {
                loc,
                value: self.cur.value.clone(),
            },
            TokenKind::Int => {
                let value = self
                    .cur
                    .value
                    .parse::<i64>()
                    .map_err(|_| self.err(format!("integer out of range: {}", self.cur.value)))?;
                Expr::Int { loc, value }
            }
            TokenKind::Bool => Expr::Bool {
                loc,
                value: self.cur.value == "true",
            },
            TokenKind::Null => Expr::Null { loc },
            _ => return Err(self.unexpected("expression")),
        };
        self.bump();
        Ok(expr)
    }

    fn parse_set_final(&mut self) -> Result<SetFinalStmt, ParseError> {
        let loc = self.cur.loc.clone();
        self.bump();
        if self.cur.value != "SOURCE" {
            return Err(self.unexpected("SOURCE after SET_FINAL"));
        }
        self.bump();
        let source = self.parse_expr()?;
        self.expect_newline()?;
        Ok(SetFinalStmt { loc, source })
    }

    fn parse_assert(&mut self) -> Result<AssertStmt, ParseError> {
        let loc = self.cur.loc.clone();
        self.bump();
        if self.cur.value != "COND" {
            return Err(self.unexpected("COND after ASSERT"));
        }
        self.bump();
        let cond = self.parse_expr()?;
        if self.cur.value != "MESSAGE" {
            return Err(self.unexpected("MESSAGE after ASSERT COND"));
        }
        self.bump();
        if self.cur.kind != TokenKind::Str {
            return Err(self.unexpected("string message for ASSERT"));
        }
        let message = self.cur.value.clone();
        self.bump();
        self.expect_newline()?;
        Ok(AssertStmt { loc, cond, message })
    }

    fn parse_print(&mut self) -> Result<PrintStmt, ParseError> {
        let loc = self.cur.loc.clone();
        self.bump();
        if self.cur.value != "SOURCE" {
            return Err(self.unexpected("SOURCE after PRINT"));
        }
        self.bump();
        let source = self.parse_expr()?;
        self.expect_newline()?;
        Ok(PrintStmt { loc, source })
    }

    fn parse_for_each(&mut self) -> Result<ForEachStmt, ParseError> {
        let loc = self.cur.loc.clone();
        self.bump(); // FOR_EACH

        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("iterator identifier"));
        }
        let iterator = self.cur.value.clone();
        self.bump();

        if self.cur.kind != TokenKind::In {
            return Err(self.unexpected("IN"));
        }
        self.bump();

        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("collection identifier"));
        }
        let collection = self.cur.value.clone();
        self.bump();

        if self.cur.kind != TokenKind::Limit {
            return Err(self.unexpected("LIMIT"));
        }
        self.bump();

        if self.cur.kind != TokenKind::Int {
            return Err(self.unexpected("integer limit"));
        }
        let limit = self.cur.value.parse::<i64>().unwrap_or(0);
        self.bump();

        if self.cur.kind != TokenKind::Colon {
            return Err(self.unexpected("':' after limit"));
        }
        self.bump();
        self.expect_newline()?;

        let mut body = Vec::new();
        while !matches!(
            self.cur.kind,
            TokenKind::Eof
                | TokenKind::Cell
                | TokenKind::Output
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::End
        ) {
            if self.cur.kind == TokenKind::Newline {
                self.bump();
                continue;
            }

            // A dedent ends the loop; the statement belongs to the cell.
            if self.cur.loc.col < 5 {
                break;
            }
            // Loop bodies sit two levels in: cell indent plus loop indent.
            if self.mode == Mode::Strict && self.cur.loc.col != 5 {
                return Err(self.err("expected exactly 4 spaces of indentation for loop body"));
            }

            body.push(self.parse_statement()?);
        }

        Ok(ForEachStmt {
            loc,
            iterator,
            collection,
            limit,
            body,
        })
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        if self.cur.kind != TokenKind::Newline && self.cur.kind != TokenKind::Eof {
            return Err(self.unexpected("newline"));
        }
        if self.cur.kind == TokenKind::Newline {
            self.bump();
        }
        Ok(())
    }

    fn parse_dialect(&mut self, prog: &mut Program) -> Result<(), ParseError> {
        self.bump(); // DIALECT
        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("dialect name"));
        }
        let name = self.cur.value.clone();
        self.bump();
        if self.cur.kind != TokenKind::Eq {
            return Err(self.unexpected("'=' after dialect name"));
        }
        self.bump();
        if !matches!(
            self.cur.kind,
            TokenKind::Ident | TokenKind::Int | TokenKind::Str
        ) {
            return Err(self.unexpected("dialect version"));
        }
        prog.dialect = Some(format!("{}={}", name, self.cur.value));
        self.bump();
        self.expect_newline()
    }

    fn parse_ext(&mut self, prog: &mut Program) -> Result<(), ParseError> {
        self.bump(); // EXT
        if self.cur.kind != TokenKind::Ident {
            return Err(self.unexpected("extension name"));
        }
        let name = self.cur.value.clone();
        self.bump();
        if self.cur.kind != TokenKind::Eq {
            return Err(self.unexpected("'=' after extension name"));
        }
        self.bump();
        if !matches!(
            self.cur.kind,
            TokenKind::Ident | TokenKind::Int | TokenKind::Str
        ) {
            return Err(self.unexpected("extension version"));
        }
        prog.extensions.insert(name, self.cur.value.clone());
        self.bump();
        self.expect_newline()
    }
}

fn check_unique_cell_names(task: Option<&Task>) -> Result<(), ParseError> {
    fn visit(body: &[BodyItem], seen: &mut std::collections::BTreeSet<String>) -> Result<(), ParseError> {
        for item in body {
            match item {
                BodyItem::Cell(cell) => {
                    if !seen.insert(cell.name.clone()) {
                        return Err(ParseError::new(
                            &cell.loc,
                            format!("duplicate cell name: {}", cell.name),
                        ));
                    }
                }
                BodyItem::If(ifs) => {
                    visit(&ifs.then_body, seen)?;
                    visit(&ifs.else_body, seen)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    let Some(task) = task else { return Ok(()) };
    let mut seen = std::collections::BTreeSet::new();
    visit(&task.body, &mut seen)
}
