//! Rule-based AST transformations for auto-repair and migration.
//!
//! Rules implement a match/apply protocol over whole programs and must be
//! idempotent: applying a rule to its own output changes nothing. Rules
//! produce new statement lists and swap them at the cell boundary rather
//! than patching nodes in place.

mod dot_access;
mod engine;
mod missing_output;
mod missing_requires;
mod missing_types;
mod numeric_concat;
mod offset_arithmetic;
mod undefined_to_literal;
mod var_rename;

pub use dot_access::DotAccessRule;
pub use engine::Engine;
pub use missing_output::MissingOutputRule;
pub use missing_requires::MissingRequiresRule;
pub use missing_types::MissingTypesRule;
pub use numeric_concat::NumericConcatRule;
pub use offset_arithmetic::OffsetArithmeticRule;
pub use undefined_to_literal::UndefinedToLiteralRule;
pub use var_rename::VarRenameRule;

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::ast::Program;
use crate::ops::Table;

pub trait Rule {
    fn id(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// True when the rule would change the program.
    fn matches(&self, prog: &Program) -> bool;
    /// Applies the transformation. Only called after a positive match.
    fn apply(&self, prog: Program) -> Result<Program, String>;
}

/// Registration-ordered rule registry.
pub struct Registry {
    rules: Vec<Rc<dyn Rule>>,
}

impl Registry {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// The default rule set, in auto-repair application order.
    pub fn with_default_rules(table: Rc<Table>) -> Self {
        let mut r = Self::new();
        r.register(Rc::new(MissingRequiresRule::new(table.clone())));
        r.register(Rc::new(DotAccessRule::new()));
        r.register(Rc::new(NumericConcatRule::new()));
        r.register(Rc::new(MissingTypesRule::new(table.clone())));
        r.register(Rc::new(MissingOutputRule));
        r.register(Rc::new(VarRenameRule));
        r.register(Rc::new(OffsetArithmeticRule::new()));
        r.register(Rc::new(UndefinedToLiteralRule::new(table)));
        r
    }

    pub fn register(&mut self, rule: Rc<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn find(&self, id: &str) -> Option<Rc<dyn Rule>> {
        self.rules.iter().find(|r| r.id() == id).cloned()
    }

    pub fn list(&self) -> &[Rc<dyn Rule>] {
        &self.rules
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Names already taken anywhere in the program: inputs plus every `INTO`.
pub(crate) fn bound_names(prog: &Program) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    if let Some(task) = &prog.task {
        for input in &task.inputs {
            names.insert(input.name.clone());
        }
    }
    crate::ast::walk_ops(prog, &mut |op| {
        if let Some(into) = &op.into {
            names.insert(into.clone());
        }
    });
    names
}
