use std::collections::BTreeMap;

use crate::ast::{rewrite_stmt_exprs, BodyItem, Expr, Program, Stmt};
use crate::rewrite::Rule;

/// Renames reused `INTO` symbols to unique variants and redirects subsequent
/// references to the renamed binding.
pub struct VarRenameRule;

fn has_reuse(prog: &Program) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    let mut reused = false;
    crate::ast::walk_ops(prog, &mut |op| {
        if let Some(into) = &op.into {
            if !seen.insert(into.clone()) {
                reused = true;
            }
        }
    });
    reused
}

fn process_stmts(
    stmts: &mut [Stmt],
    seen: &mut BTreeMap<String, u32>,
    renames: &mut BTreeMap<String, String>,
) {
    for stmt in stmts {
        // References first: they point at the binding visible so far.
        rewrite_stmt_exprs(stmt, &mut |expr| {
            if let Expr::Ident { name, .. } = expr {
                if let Some(new_name) = renames.get(name.as_str()) {
                    *name = new_name.clone();
                }
            }
        });

        match stmt {
            Stmt::Op(op) => {
                if let Some(into) = op.into.clone() {
                    match seen.get_mut(into.as_str()) {
                        Some(count) => {
                            *count += 1;
                            let fresh = format!("{into}_{count}");
                            renames.insert(into, fresh.clone());
                            op.into = Some(fresh);
                        }
                        None => {
                            renames.remove(into.as_str());
                            seen.insert(into, 1);
                        }
                    }
                }
            }
            Stmt::ForEach(fe) => process_stmts(&mut fe.body, seen, renames),
            _ => {}
        }
    }
}

fn process_body(
    body: &mut [BodyItem],
    seen: &mut BTreeMap<String, u32>,
    renames: &mut BTreeMap<String, String>,
) {
    for item in body {
        match item {
            BodyItem::Cell(cell) => process_stmts(&mut cell.stmts, seen, renames),
            BodyItem::If(ifs) => {
                process_body(&mut ifs.then_body, seen, renames);
                process_body(&mut ifs.else_body, seen, renames);
            }
            BodyItem::Stmt(stmt) => process_stmts(std::slice::from_mut(stmt), seen, renames),
            BodyItem::Requires(_) => {}
        }
    }
}

impl Rule for VarRenameRule {
    fn id(&self) -> &'static str {
        "RULE_VAR_REUSE"
    }

    fn description(&self) -> &'static str {
        "Rename reused variables to ensure unique names."
    }

    fn matches(&self, prog: &Program) -> bool {
        has_reuse(prog)
    }

    fn apply(&self, mut prog: Program) -> Result<Program, String> {
        let mut seen = BTreeMap::new();
        let mut renames = BTreeMap::new();
        if let Some(task) = &mut prog.task {
            process_body(&mut task.body, &mut seen, &mut renames);
            if let Some(output) = &task.output {
                if let Some(new_name) = renames.get(output.as_str()) {
                    task.output = Some(new_name.clone());
                }
            }
        }
        Ok(prog)
    }
}
