use std::collections::BTreeSet;

use crate::ast::{
    rewrite_stmt_exprs, BodyItem, Cell, Expr, KwArg, OpStmt, Program, Stmt,
};
use crate::rewrite::{bound_names, Rule};
use crate::token::Loc;

/// Replaces dot access (`stats.cost`) with an inserted getter op and a
/// renamed reference. `cost`, `start`, and `end` map to their specialized
/// getters; everything else goes through `GET_FIELD`.
pub struct DotAccessRule;

impl DotAccessRule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DotAccessRule {
    fn default() -> Self {
        Self::new()
    }
}

// Scoped to cell statements, the only place apply() rewrites.
fn has_dot_access(prog: &Program) -> bool {
    let Some(task) = &prog.task else {
        return false;
    };
    let mut found = false;
    for item in &task.body {
        let BodyItem::Cell(cell) = item else { continue };
        for stmt in &cell.stmts {
            crate::ast::stmt_exprs(stmt, &mut |expr| {
                if expr.as_ident().is_some_and(|name| name.contains('.')) {
                    found = true;
                }
            });
        }
    }
    found
}

fn getter_for(obj: &str, field: &str, into: &str) -> OpStmt {
    let (name, args, into_type) = match field {
        "cost" => (
            "GET_COST",
            vec![KwArg {
                keyword: "RESULT".to_string(),
                value: Expr::ident(obj),
            }],
            "COST",
        ),
        "start" => (
            "GET_SPAN_START",
            vec![KwArg {
                keyword: "SOURCE".to_string(),
                value: Expr::ident(obj),
            }],
            "OFFSET",
        ),
        "end" => (
            "GET_SPAN_END",
            vec![KwArg {
                keyword: "SOURCE".to_string(),
                value: Expr::ident(obj),
            }],
            "OFFSET",
        ),
        _ => (
            "GET_FIELD",
            vec![
                KwArg {
                    keyword: "SOURCE".to_string(),
                    value: Expr::ident(obj),
                },
                KwArg {
                    keyword: "FIELD".to_string(),
                    value: Expr::string(field),
                },
            ],
            "JSON",
        ),
    };

    OpStmt {
        loc: Loc::default(),
        name: name.to_string(),
        args,
        into: Some(into.to_string()),
        into_type: Some(into_type.to_string()),
    }
}

fn pick_name(field: &str, obj: &str, taken: &mut BTreeSet<String>) -> String {
    if taken.insert(field.to_string()) {
        return field.to_string();
    }
    let mut seq = 1;
    loop {
        let candidate = format!("{obj}_{field}_{seq}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        seq += 1;
    }
}

fn rewrite_stmts(stmts: Vec<Stmt>, taken: &mut BTreeSet<String>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for mut stmt in stmts {
        // One getter per distinct dotted reference in this statement.
        let mut replacements: Vec<(String, String)> = Vec::new();
        rewrite_stmt_exprs(&mut stmt, &mut |expr| {
            let Expr::Ident { name, loc } = expr else {
                return;
            };
            let Some((obj, field)) = name.split_once('.') else {
                return;
            };
            let fresh = match replacements.iter().find(|(dotted, _)| dotted == name) {
                Some((_, existing)) => existing.clone(),
                None => {
                    let picked = pick_name(field, obj, taken);
                    replacements.push((name.clone(), picked.clone()));
                    picked
                }
            };
            *expr = Expr::Ident {
                loc: loc.clone(),
                name: fresh,
            };
        });

        for (dotted, fresh) in &replacements {
            let (obj, field) = dotted.split_once('.').unwrap_or((dotted.as_str(), ""));
            out.push(Stmt::Op(getter_for(obj, field, fresh)));
        }
        out.push(stmt);
    }
    out
}

impl Rule for DotAccessRule {
    fn id(&self) -> &'static str {
        "RULE_DOT_ACCESS_TO_GETTER"
    }

    fn description(&self) -> &'static str {
        "Convert dot access (e.g. stats.cost) to explicit getter calls."
    }

    fn matches(&self, prog: &Program) -> bool {
        has_dot_access(prog)
    }

    fn apply(&self, mut prog: Program) -> Result<Program, String> {
        let mut taken = bound_names(&prog);
        let Some(task) = &mut prog.task else {
            return Ok(prog);
        };

        let body = std::mem::take(&mut task.body);
        task.body = body
            .into_iter()
            .map(|item| match item {
                BodyItem::Cell(cell) => BodyItem::Cell(Cell {
                    loc: cell.loc,
                    name: cell.name,
                    stmts: rewrite_stmts(cell.stmts, &mut taken),
                }),
                other => other,
            })
            .collect();
        Ok(prog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse, Mode};

    #[test]
    fn stats_cost_becomes_get_cost() {
        let src = "TASK t:\nINPUT PROMPT: TEXT\nCELL main:\n  STATS SOURCE PROMPT INTO stats: STRUCT\n  TO_TEXT VALUE stats.cost INTO rendered: TEXT\nOUTPUT rendered\n";
        let prog = parse("t", src, Mode::Compat).unwrap();
        let rule = DotAccessRule::new();
        assert!(rule.matches(&prog));

        let repaired = rule.apply(prog).unwrap();
        let task = repaired.task.as_ref().unwrap();
        let BodyItem::Cell(cell) = &task.body[0] else {
            panic!("expected cell");
        };
        assert_eq!(cell.stmts.len(), 3);

        let Stmt::Op(getter) = &cell.stmts[1] else {
            panic!("expected inserted getter");
        };
        assert_eq!(getter.name, "GET_COST");
        assert_eq!(getter.args[0].keyword, "RESULT");
        assert_eq!(getter.args[0].value.as_ident(), Some("stats"));
        assert_eq!(getter.into.as_deref(), Some("cost"));
        assert_eq!(getter.into_type.as_deref(), Some("COST"));

        let Stmt::Op(user) = &cell.stmts[2] else {
            panic!("expected rewritten op");
        };
        assert_eq!(user.args[0].value.as_ident(), Some("cost"));

        assert!(!rule.matches(&repaired));
    }

    #[test]
    fn span_fields_use_specialized_getters() {
        let src = "TASK t:\nINPUT PROMPT: TEXT\nCELL main:\n  FIND_REGEX SOURCE PROMPT PATTERN \"[a-z]+\" MODE FIRST INTO m: SPAN\n  SLICE_TEXT SOURCE PROMPT START m.start END m.end INTO hit: TEXT\nOUTPUT hit\n";
        let prog = parse("t", src, Mode::Compat).unwrap();
        let repaired = DotAccessRule::new().apply(prog).unwrap();
        let task = repaired.task.as_ref().unwrap();
        let BodyItem::Cell(cell) = &task.body[0] else {
            panic!("expected cell");
        };
        let names: Vec<&str> = cell
            .stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Op(op) => Some(op.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec!["FIND_REGEX", "GET_SPAN_START", "GET_SPAN_END", "SLICE_TEXT"]
        );
    }

    #[test]
    fn unknown_field_goes_through_get_field() {
        let src = "TASK t:\nINPUT PROMPT: TEXT\nCELL main:\n  STATS SOURCE PROMPT INTO stats: STRUCT\n  TO_TEXT VALUE stats.lines INTO rendered: TEXT\nOUTPUT rendered\n";
        let repaired = DotAccessRule::new()
            .apply(parse("t", src, Mode::Compat).unwrap())
            .unwrap();
        let task = repaired.task.as_ref().unwrap();
        let BodyItem::Cell(cell) = &task.body[0] else {
            panic!("expected cell");
        };
        let Stmt::Op(getter) = &cell.stmts[1] else {
            panic!("expected getter");
        };
        assert_eq!(getter.name, "GET_FIELD");
        assert_eq!(getter.into.as_deref(), Some("lines"));
    }
}
