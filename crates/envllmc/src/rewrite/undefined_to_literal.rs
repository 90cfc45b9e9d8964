use std::collections::BTreeSet;
use std::rc::Rc;

use envllm_contracts::PROMPT_ALIAS;

use crate::ast::{BodyItem, Expr, Program, Stmt};
use crate::ops::Table;
use crate::rewrite::Rule;
use crate::value::Kind;

/// Rewrites undefined identifiers in text-expected argument slots to string
/// literals of their own spelling: a model that writes `NEEDLE secret` almost
/// always meant `NEEDLE "secret"`.
pub struct UndefinedToLiteralRule {
    table: Rc<Table>,
}

impl UndefinedToLiteralRule {
    pub fn new(table: Rc<Table>) -> Self {
        Self { table }
    }

    /// A rewrite happens exactly when apply() would change the program, so
    /// match by probing a copy; this keeps the two traversals in lockstep.
    fn collect_candidates(&self, prog: &Program) -> bool {
        match self.apply(prog.clone()) {
            Ok(rewritten) => rewritten != *prog,
            Err(_) => false,
        }
    }
}

fn initial_symbols(prog: &Program) -> BTreeSet<String> {
    let mut symbols = BTreeSet::new();
    symbols.insert(PROMPT_ALIAS.to_string());
    if let Some(task) = &prog.task {
        for input in &task.inputs {
            symbols.insert(input.name.clone());
        }
    }
    symbols
}

fn is_candidate(
    arg: &crate::ast::KwArg,
    param: &crate::ops::Param,
    symbols: &BTreeSet<String>,
) -> bool {
    if !param.variants.is_empty() {
        return false;
    }
    let text_slot = param.ty == Some(Kind::Text) || param.ty.is_none();
    if !text_slot {
        return false;
    }
    arg.value
        .as_ident()
        .is_some_and(|name| !name.contains('.') && !symbols.contains(name))
}

fn apply_stmts(stmts: &mut [Stmt], table: &Table, symbols: &mut BTreeSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Op(op) => {
                if let Some(def) = table.get(&op.name) {
                    if op.args.len() == def.signature.len() {
                        for (arg, param) in op.args.iter_mut().zip(&def.signature) {
                            if is_candidate(arg, param, symbols) {
                                let name = arg.value.as_ident().unwrap_or_default().to_string();
                                arg.value = Expr::string(name);
                            }
                        }
                    }
                }
                if let Some(into) = &op.into {
                    symbols.insert(into.clone());
                }
            }
            Stmt::ForEach(fe) => {
                symbols.insert(fe.iterator.clone());
                apply_stmts(&mut fe.body, table, symbols);
            }
            _ => {}
        }
    }
}

fn apply_body(body: &mut [BodyItem], table: &Table, symbols: &mut BTreeSet<String>) {
    for item in body {
        match item {
            BodyItem::Cell(cell) => apply_stmts(&mut cell.stmts, table, symbols),
            BodyItem::If(ifs) => {
                apply_body(&mut ifs.then_body, table, symbols);
                apply_body(&mut ifs.else_body, table, symbols);
            }
            BodyItem::Stmt(stmt) => apply_stmts(std::slice::from_mut(stmt), table, symbols),
            BodyItem::Requires(_) => {}
        }
    }
}

impl Rule for UndefinedToLiteralRule {
    fn id(&self) -> &'static str {
        "RULE_UNDEFINED_TO_LITERAL"
    }

    fn description(&self) -> &'static str {
        "Convert undefined identifiers used in text-expected slots to string literals."
    }

    fn matches(&self, prog: &Program) -> bool {
        self.collect_candidates(prog)
    }

    fn apply(&self, mut prog: Program) -> Result<Program, String> {
        let mut symbols = initial_symbols(&prog);
        let table = self.table.clone();
        if let Some(task) = &mut prog.task {
            apply_body(&mut task.body, &table, &mut symbols);
        }
        Ok(prog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Registry;
    use crate::parse::{parse, Mode};

    fn rule() -> UndefinedToLiteralRule {
        let ops = Registry::with_builtin_modules();
        UndefinedToLiteralRule::new(Rc::new(ops.table().clone()))
    }

    #[test]
    fn bareword_needle_becomes_string_literal() {
        let src = "TASK t:\nINPUT PROMPT: TEXT\nCELL main:\n  FIND_TEXT SOURCE PROMPT NEEDLE secret MODE FIRST IGNORE_CASE false INTO pos: OFFSET\nOUTPUT pos\n";
        let prog = parse("t", src, Mode::Compat).unwrap();
        let rule = rule();
        assert!(rule.matches(&prog));

        let repaired = rule.apply(prog).unwrap();
        let mut needle = None;
        crate::ast::walk_ops(&repaired, &mut |op| {
            needle = Some(op.args[1].value.clone());
        });
        assert_eq!(needle, Some(Expr::string("secret")));
        assert!(!rule.matches(&repaired));
    }

    #[test]
    fn defined_identifiers_are_left_alone() {
        let src = "TASK t:\nINPUT PROMPT: TEXT\nCELL main:\n  TO_TEXT VALUE 5 INTO needle: TEXT\n  FIND_TEXT SOURCE PROMPT NEEDLE needle MODE FIRST IGNORE_CASE false INTO pos: OFFSET\nOUTPUT pos\n";
        let prog = parse("t", src, Mode::Compat).unwrap();
        assert!(!rule().matches(&prog));
    }
}
