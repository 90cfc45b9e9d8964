use crate::ast::Program;
use crate::rewrite::Rule;

/// Defaults a missing `OUTPUT` to the last bound name.
pub struct MissingOutputRule;

fn last_bound(prog: &Program) -> Option<String> {
    let mut last = None;
    crate::ast::walk_ops(prog, &mut |op| {
        if let Some(into) = &op.into {
            last = Some(into.clone());
        }
    });
    last
}

impl Rule for MissingOutputRule {
    fn id(&self) -> &'static str {
        "RULE_MISSING_OUTPUT"
    }

    fn description(&self) -> &'static str {
        "Ensure the TASK has a valid OUTPUT variable."
    }

    fn matches(&self, prog: &Program) -> bool {
        prog.task
            .as_ref()
            .is_some_and(|t| t.output.is_none())
            && last_bound(prog).is_some()
    }

    fn apply(&self, mut prog: Program) -> Result<Program, String> {
        let last = last_bound(&prog);
        if let Some(task) = &mut prog.task {
            if task.output.is_none() {
                task.output = last;
            }
        }
        Ok(prog)
    }
}
