use std::rc::Rc;

use crate::ast::{BodyItem, Program, Stmt};
use crate::ops::Table;
use crate::rewrite::Rule;

/// Fills omitted `INTO` type annotations from the op table.
pub struct MissingTypesRule {
    table: Rc<Table>,
}

impl MissingTypesRule {
    pub fn new(table: Rc<Table>) -> Self {
        Self { table }
    }

    fn wants_annotation(&self, prog: &Program) -> bool {
        let mut found = false;
        crate::ast::walk_ops(prog, &mut |op| {
            if op.into.is_some() && op.into_type.is_none() && self.table.get(&op.name).is_some() {
                found = true;
            }
        });
        found
    }
}

impl Rule for MissingTypesRule {
    fn id(&self) -> &'static str {
        "RULE_MISSING_TYPES"
    }

    fn description(&self) -> &'static str {
        "Add mandatory type annotations to INTO clauses based on operation definitions."
    }

    fn matches(&self, prog: &Program) -> bool {
        self.wants_annotation(prog)
    }

    fn apply(&self, mut prog: Program) -> Result<Program, String> {
        let table = self.table.clone();
        let Some(task) = &mut prog.task else {
            return Ok(prog);
        };

        fn fill(stmts: &mut [Stmt], table: &Table) {
            for stmt in stmts {
                match stmt {
                    Stmt::Op(op) => {
                        if op.into.is_some() && op.into_type.is_none() {
                            if let Some(def) = table.get(&op.name) {
                                op.into_type = Some(def.result_type.as_str().to_string());
                            }
                        }
                    }
                    Stmt::ForEach(fe) => fill(&mut fe.body, table),
                    _ => {}
                }
            }
        }

        fn fill_body(body: &mut [BodyItem], table: &Table) {
            for item in body {
                match item {
                    BodyItem::Cell(cell) => fill(&mut cell.stmts, table),
                    BodyItem::If(ifs) => {
                        fill_body(&mut ifs.then_body, table);
                        fill_body(&mut ifs.else_body, table);
                    }
                    BodyItem::Stmt(stmt) => fill(std::slice::from_mut(stmt), table),
                    BodyItem::Requires(_) => {}
                }
            }
        }

        fill_body(&mut task.body, &table);
        Ok(prog)
    }
}
