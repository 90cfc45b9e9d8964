use std::collections::BTreeSet;
use std::rc::Rc;

use envllm_contracts::CAP_PURE;

use crate::ast::{walk_ops, BodyItem, Program, Requirement};
use crate::ops::Table;
use crate::rewrite::Rule;
use crate::token::Loc;

/// Injects `REQUIRES` declarations for every non-pure capability used by the
/// program's operations.
pub struct MissingRequiresRule {
    table: Rc<Table>,
}

impl MissingRequiresRule {
    pub fn new(table: Rc<Table>) -> Self {
        Self { table }
    }

    fn missing(&self, prog: &Program) -> BTreeSet<String> {
        let Some(task) = &prog.task else {
            return BTreeSet::new();
        };

        let mut declared = BTreeSet::new();
        for item in &task.body {
            if let BodyItem::Requires(req) = item {
                declared.insert(req.capability.clone());
            }
        }

        let mut missing = BTreeSet::new();
        walk_ops(prog, &mut |op| {
            if let Some(def) = self.table.get(&op.name) {
                for cap in &def.capabilities {
                    if cap != CAP_PURE && !declared.contains(cap) {
                        missing.insert(cap.clone());
                    }
                }
            }
        });
        missing
    }
}

impl Rule for MissingRequiresRule {
    fn id(&self) -> &'static str {
        "RULE_MISSING_REQUIRES"
    }

    fn description(&self) -> &'static str {
        "Add missing REQUIRES declarations for operations used in the program."
    }

    fn matches(&self, prog: &Program) -> bool {
        !self.missing(prog).is_empty()
    }

    fn apply(&self, mut prog: Program) -> Result<Program, String> {
        let missing = self.missing(&prog);
        if let Some(task) = &mut prog.task {
            let mut body: Vec<BodyItem> = missing
                .into_iter()
                .map(|capability| {
                    BodyItem::Requires(Requirement {
                        loc: Loc::default(),
                        capability,
                    })
                })
                .collect();
            body.append(&mut task.body);
            task.body = body;
        }
        Ok(prog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Registry;
    use crate::parse::{parse, Mode};

    fn rule() -> MissingRequiresRule {
        let ops = Registry::with_builtin_modules();
        MissingRequiresRule::new(Rc::new(ops.table().clone()))
    }

    #[test]
    fn inserts_requirements_at_the_top_of_the_body() {
        let src = "TASK t:\nCELL main:\n  READ_FILE PATH \"/tmp/a\" INTO a: TEXT\n  WRITE_FILE PATH \"/tmp/b\" SOURCE a INTO ok: BOOL\nOUTPUT ok\n";
        let prog = parse("t", src, Mode::Compat).unwrap();
        let rule = rule();
        assert!(rule.matches(&prog));

        let repaired = rule.apply(prog).unwrap();
        let task = repaired.task.as_ref().unwrap();
        let caps: Vec<&str> = task
            .body
            .iter()
            .filter_map(|item| match item {
                BodyItem::Requires(r) => Some(r.capability.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(caps, vec!["fs_read", "fs_write"]);
        assert!(!rule.matches(&repaired));
    }

    #[test]
    fn pure_programs_do_not_match() {
        let src = "TASK t:\nCELL main:\n  TO_TEXT VALUE 1 INTO x: TEXT\nOUTPUT x\n";
        let prog = parse("t", src, Mode::Compat).unwrap();
        assert!(!rule().matches(&prog));
    }
}
