use std::collections::BTreeMap;

use crate::ast::{BodyItem, Expr, Program, Stmt};
use crate::rewrite::Rule;

/// Collapses `FIND_TEXT needle=N` followed by `OFFSET_ADD amount=len(N)` into
/// a single `AFTER_TEXT`: the arithmetic encodes "position after the needle",
/// which `AFTER_TEXT` states directly.
pub struct OffsetArithmeticRule;

impl OffsetArithmeticRule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OffsetArithmeticRule {
    fn default() -> Self {
        Self::new()
    }
}

struct FindInfo {
    args: Vec<crate::ast::KwArg>,
    needle_len: usize,
}

/// Pairs each collapsible `OFFSET_ADD` with its `FIND_TEXT` source. Only
/// literal needles qualify: the needle length must be knowable statically.
/// Scoped to the statements apply() rewrites.
fn collapsible(prog: &Program) -> bool {
    let Some(task) = &prog.task else {
        return false;
    };
    let mut finds: BTreeMap<String, usize> = BTreeMap::new();
    let mut found = false;

    fn scan(stmts: &[Stmt], finds: &mut BTreeMap<String, usize>, found: &mut bool) {
        for stmt in stmts {
            match stmt {
                Stmt::Op(op) => {
                    if op.name == "FIND_TEXT" {
                        if let (Some(into), Some(len)) = (&op.into, literal_needle_len(op)) {
                            finds.insert(into.clone(), len);
                        }
                    }
                    if op.name == "OFFSET_ADD" {
                        if let Some((target, amount)) = offset_add_parts(op) {
                            if finds.get(&target) == Some(&(amount as usize)) {
                                *found = true;
                            }
                        }
                    }
                }
                Stmt::ForEach(fe) => scan(&fe.body, finds, found),
                _ => {}
            }
        }
    }

    for item in &task.body {
        match item {
            BodyItem::Cell(cell) => scan(&cell.stmts, &mut finds, &mut found),
            BodyItem::Stmt(stmt) => scan(std::slice::from_ref(stmt), &mut finds, &mut found),
            _ => {}
        }
    }
    found
}

fn literal_needle_len(op: &crate::ast::OpStmt) -> Option<usize> {
    op.args.iter().find_map(|arg| {
        if arg.keyword != "NEEDLE" {
            return None;
        }
        match &arg.value {
            Expr::Str { value, .. } => Some(value.len()),
            _ => None,
        }
    })
}

fn offset_add_parts(op: &crate::ast::OpStmt) -> Option<(String, i64)> {
    let mut target = None;
    let mut amount = None;
    for arg in &op.args {
        match arg.keyword.as_str() {
            "OFFSET" => target = arg.value.as_ident().map(str::to_string),
            "AMOUNT" => {
                if let Expr::Int { value, .. } = &arg.value {
                    amount = Some(*value);
                }
            }
            _ => {}
        }
    }
    Some((target?, amount?))
}

fn rewrite_stmts(stmts: &mut [Stmt], finds: &mut BTreeMap<String, FindInfo>) {
    for stmt in stmts {
        match stmt {
            Stmt::Op(op) => {
                if op.name == "FIND_TEXT" {
                    if let (Some(into), Some(len)) = (&op.into, literal_needle_len(op)) {
                        finds.insert(
                            into.clone(),
                            FindInfo {
                                args: op.args.clone(),
                                needle_len: len,
                            },
                        );
                    }
                }
                if op.name == "OFFSET_ADD" {
                    if let Some((target, amount)) = offset_add_parts(op) {
                        if let Some(info) = finds.get(&target) {
                            if info.needle_len == amount as usize {
                                op.name = "AFTER_TEXT".to_string();
                                op.args = info.args.clone();
                                op.into_type = Some("OFFSET".to_string());
                            }
                        }
                    }
                }
            }
            Stmt::ForEach(fe) => rewrite_stmts(&mut fe.body, finds),
            _ => {}
        }
    }
}

impl Rule for OffsetArithmeticRule {
    fn id(&self) -> &'static str {
        "RULE_OFFSET_ARITHMETIC"
    }

    fn description(&self) -> &'static str {
        "Replace FIND_TEXT + OFFSET_ADD(len) with a single AFTER_TEXT operation."
    }

    fn matches(&self, prog: &Program) -> bool {
        collapsible(prog)
    }

    fn apply(&self, mut prog: Program) -> Result<Program, String> {
        let mut finds = BTreeMap::new();
        if let Some(task) = &mut prog.task {
            for item in &mut task.body {
                match item {
                    BodyItem::Cell(cell) => rewrite_stmts(&mut cell.stmts, &mut finds),
                    BodyItem::Stmt(stmt) => {
                        rewrite_stmts(std::slice::from_mut(stmt), &mut finds)
                    }
                    _ => {}
                }
            }
        }
        Ok(prog)
    }
}
