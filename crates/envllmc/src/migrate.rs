//! Version migration.
//!
//! 0.1 → 0.2 is exactly the auto-repair loop followed by rewriting the
//! version tag: the 0.2 canon forbids what the default rules repair.

use std::rc::Rc;

use envllm_contracts::ENVLLM_LANG_VERSION;

use crate::ops::Table;
use crate::parse::{parse, Mode, ParseError};
use crate::rewrite::{Engine, Registry};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    /// Rewrite rule ids, in application order.
    pub changes: Vec<String>,
}

pub struct Migrator {
    engine: Engine,
}

impl Migrator {
    pub fn new(table: Rc<Table>) -> Self {
        Self {
            engine: Engine::new(Registry::with_default_rules(table)),
        }
    }

    pub fn migrate(
        &self,
        prog: crate::ast::Program,
    ) -> Result<(crate::ast::Program, Report), String> {
        let (mut prog, changes) = self.engine.auto_repair(prog)?;
        prog.version = Some(ENVLLM_LANG_VERSION.to_string());
        Ok((prog, Report { changes }))
    }
}

/// Parses legacy source permissively, migrates, and renders canonical form.
pub fn migrate_source(file: &str, src: &str, table: Rc<Table>) -> Result<(String, Report), MigrateError> {
    let prog = parse(file, src, Mode::Compat).map_err(MigrateError::Parse)?;
    let (migrated, report) = Migrator::new(table)
        .migrate(prog)
        .map_err(MigrateError::Rewrite)?;
    Ok((crate::format::format(&migrated), report))
}

#[derive(Debug)]
pub enum MigrateError {
    Parse(ParseError),
    Rewrite(String),
}

impl std::fmt::Display for MigrateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrateError::Parse(e) => write!(f, "{e}"),
            MigrateError::Rewrite(e) => write!(f, "migration failed during rewrite: {e}"),
        }
    }
}

impl std::error::Error for MigrateError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Registry as OpRegistry;
    use crate::parse::{parse, Mode};

    #[test]
    fn migrates_legacy_program_to_canonical_strict_form() {
        let ops = OpRegistry::with_builtin_modules();
        let table = Rc::new(ops.table().clone());
        let src = "RLMDSL 0.1\nCELL main:\n  READ_FILE PATH \"/tmp/x\" INTO data\n";
        let (formatted, report) = migrate_source("legacy.rlm", src, table).unwrap();

        assert!(formatted.starts_with("RLMDSL 0.2\n"), "{formatted}");
        assert!(formatted.contains("REQUIRES capability=\"fs_read\""));
        assert!(formatted.contains("INTO data: TEXT"));
        assert!(formatted.contains("OUTPUT data"));
        assert!(!report.changes.is_empty());

        // Canonical output is strict-parseable.
        assert!(parse("m", &formatted, Mode::Strict).is_ok(), "{formatted}");
    }
}
