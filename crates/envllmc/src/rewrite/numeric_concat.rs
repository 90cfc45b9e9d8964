use std::collections::BTreeSet;

use crate::ast::{BodyItem, Expr, KwArg, OpStmt, Program, Stmt};
use crate::rewrite::{bound_names, Rule};
use crate::token::Loc;

/// Wraps literal non-text operands of `CONCAT_TEXT` in an inserted `TO_TEXT`.
pub struct NumericConcatRule;

impl NumericConcatRule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NumericConcatRule {
    fn default() -> Self {
        Self::new()
    }
}

fn needs_wrapping(expr: &Expr) -> bool {
    matches!(expr, Expr::Int { .. } | Expr::Bool { .. })
}

// Scoped to cell statements, the only place apply() rewrites.
fn rule_matches(prog: &Program) -> bool {
    let Some(task) = &prog.task else {
        return false;
    };
    task.body.iter().any(|item| {
        let BodyItem::Cell(cell) = item else {
            return false;
        };
        cell.stmts.iter().any(|stmt| {
            let Stmt::Op(op) = stmt else { return false };
            op.name == "CONCAT_TEXT"
                && op.args.iter().any(|arg| {
                    (arg.keyword == "A" || arg.keyword == "B") && needs_wrapping(&arg.value)
                })
        })
    })
}

fn fresh_name(taken: &mut BTreeSet<String>) -> String {
    let mut seq = 1;
    loop {
        let candidate = format!("text_val_{seq}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        seq += 1;
    }
}

impl Rule for NumericConcatRule {
    fn id(&self) -> &'static str {
        "RULE_NUMERIC_CONCAT_TO_TEXT"
    }

    fn description(&self) -> &'static str {
        "Convert numeric operands to TEXT before using them in CONCAT_TEXT."
    }

    fn matches(&self, prog: &Program) -> bool {
        rule_matches(prog)
    }

    fn apply(&self, mut prog: Program) -> Result<Program, String> {
        let mut taken = bound_names(&prog);
        let Some(task) = &mut prog.task else {
            return Ok(prog);
        };

        for item in &mut task.body {
            let BodyItem::Cell(cell) = item else { continue };
            let stmts = std::mem::take(&mut cell.stmts);
            let mut out = Vec::with_capacity(stmts.len());
            for mut stmt in stmts {
                if let Stmt::Op(op) = &mut stmt {
                    if op.name == "CONCAT_TEXT" {
                        for arg in &mut op.args {
                            if (arg.keyword == "A" || arg.keyword == "B")
                                && needs_wrapping(&arg.value)
                            {
                                let name = fresh_name(&mut taken);
                                let literal =
                                    std::mem::replace(&mut arg.value, Expr::ident(name.clone()));
                                out.push(Stmt::Op(OpStmt {
                                    loc: Loc::default(),
                                    name: "TO_TEXT".to_string(),
                                    args: vec![KwArg {
                                        keyword: "VALUE".to_string(),
                                        value: literal,
                                    }],
                                    into: Some(name),
                                    into_type: Some("TEXT".to_string()),
                                }));
                            }
                        }
                    }
                }
                out.push(stmt);
            }
            cell.stmts = out;
        }
        Ok(prog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse, Mode};

    #[test]
    fn wraps_integer_operand_in_to_text() {
        let src = "TASK t:\nCELL main:\n  TO_TEXT VALUE \"n=\" INTO label: TEXT\n  CONCAT_TEXT A label B 42 INTO joined: TEXT\nOUTPUT joined\n";
        let prog = parse("t", src, Mode::Compat).unwrap();
        let rule = NumericConcatRule::new();
        assert!(rule.matches(&prog));

        let repaired = rule.apply(prog).unwrap();
        let task = repaired.task.as_ref().unwrap();
        let BodyItem::Cell(cell) = &task.body[0] else {
            panic!("expected cell");
        };
        assert_eq!(cell.stmts.len(), 3);
        let Stmt::Op(wrapper) = &cell.stmts[1] else {
            panic!("expected TO_TEXT wrapper");
        };
        assert_eq!(wrapper.name, "TO_TEXT");
        let Stmt::Op(concat) = &cell.stmts[2] else {
            panic!("expected concat");
        };
        assert_eq!(concat.args[1].value.as_ident(), wrapper.into.as_deref());
        assert!(!rule.matches(&repaired));
    }
}
