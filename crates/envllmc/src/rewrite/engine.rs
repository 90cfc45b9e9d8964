use crate::ast::Program;
use crate::rewrite::Registry;

/// Auto-repair restarts after every application; idempotent rules make this
/// converge, and the iteration cap bounds it regardless.
const MAX_REPAIR_ITERATIONS: usize = 10;

pub struct Engine {
    registry: Registry,
}

impl Engine {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Applies the named rules, in the order given; unknown ids are skipped.
    pub fn apply_rules(&self, mut prog: Program, rule_ids: &[&str]) -> Result<Program, String> {
        for id in rule_ids {
            let Some(rule) = self.registry.find(id) else {
                continue;
            };
            if rule.matches(&prog) {
                prog = rule.apply(prog)?;
            }
        }
        Ok(prog)
    }

    /// Matches and applies rules in registration order until a fixed point,
    /// restarting after every application. Returns the repaired program and
    /// the ids applied, in application order.
    pub fn auto_repair(&self, mut prog: Program) -> Result<(Program, Vec<String>), String> {
        let mut applied = Vec::new();

        for _ in 0..MAX_REPAIR_ITERATIONS {
            let mut matched = false;
            for rule in self.registry.list() {
                if rule.matches(&prog) {
                    prog = rule.apply(prog)?;
                    applied.push(rule.id().to_string());
                    matched = true;
                    break;
                }
            }
            if !matched {
                break;
            }
        }

        Ok((prog, applied))
    }
}
