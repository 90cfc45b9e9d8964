//! EnvLLM core toolchain.
//!
//! Pipeline: source string → lexer → parser → AST → (rewrite engine) →
//! linter → session → observation. The façade in this module wires the
//! stages together the way the CLI and embedders consume them; each stage is
//! usable on its own.

pub mod ast;
pub mod env;
pub mod error;
pub mod format;
pub mod lexer;
pub mod lint;
pub mod migrate;
pub mod ops;
pub mod parse;
pub mod policy;
pub mod result;
pub mod rewrite;
pub mod session;
pub mod store;
pub mod token;
pub mod trace;
pub mod value;

pub const ENVLLMC_VERSION: &str = env!("CARGO_PKG_VERSION");

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{ObsError, ObsLoc};
use crate::lint::Linter;
use crate::parse::{Mode, ParseError};
use crate::policy::Policy;
use crate::result::{Observation, Status};
use crate::session::{CancelToken, Host, Session};
use crate::value::Value;

/// A compiled program: parsed, optionally auto-repaired, not yet linted.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub ast: ast::Program,
    pub mode: Mode,
}

/// Compiles source into a program under the given parse mode.
pub fn compile(file: &str, src: &str, mode: Mode) -> Result<Program, ParseError> {
    let ast = parse::parse(file, src, mode)?;
    Ok(Program { ast, mode })
}

/// Everything an execution needs besides the program itself.
pub struct ExecOptions {
    pub policy: Policy,
    pub inputs: BTreeMap<String, Value>,
    /// Raw text inputs, interned into the session store before binding.
    pub text_inputs: BTreeMap<String, String>,
    pub registry: Option<Rc<ops::Registry>>,
    pub host: Option<Rc<RefCell<dyn Host>>>,
    pub trace: Option<Box<dyn trace::Sink>>,
    pub cancel: Option<CancelToken>,
    /// Auto-repair before linting.
    pub repair: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            inputs: BTreeMap::new(),
            text_inputs: BTreeMap::new(),
            registry: None,
            host: None,
            trace: None,
            cancel: None,
            repair: false,
        }
    }
}

impl ExecOptions {
    pub fn with_policy(policy: Policy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }
}

impl Program {
    /// Lints, optionally repairs, executes, and materializes the observation.
    /// Terminal errors become structured observations; the only `Err` here is
    /// an embedder mistake (e.g. rebinding an input).
    pub fn execute(&self, opt: ExecOptions) -> Result<Observation, String> {
        let registry = opt
            .registry
            .unwrap_or_else(|| Rc::new(ops::Registry::with_builtin_modules()));

        let mut ast = self.ast.clone();
        if opt.repair {
            let engine = rewrite::Engine::new(rewrite::Registry::with_default_rules(Rc::new(
                registry.table().clone(),
            )));
            let (repaired, _applied) = engine.auto_repair(ast)?;
            ast = repaired;
        }

        let mut session = Session::new(opt.policy).with_registry(registry.clone());
        if let Some(host) = opt.host {
            session = session.with_host(host);
        }
        if let Some(sink) = opt.trace {
            session = session.with_trace(sink);
        }
        if let Some(token) = opt.cancel {
            session = session.with_cancel(token);
        }

        let findings = Linter::new(registry.table())
            .with_mode(self.mode)
            .lint(&ast);
        if !findings.is_empty() {
            return Ok(Observation::lint_failure(session::lint_errors_to_obs(
                &findings,
            )));
        }

        for (name, text) in &opt.text_inputs {
            session.bind_text_input(name, text).map_err(|e| e.to_string())?;
        }
        for (name, value) in &opt.inputs {
            session.bind_input(name, value.clone()).map_err(|e| e.to_string())?;
        }

        let Some(task) = &ast.task else {
            return Ok(session.observation(Status::Ok, Vec::new()));
        };

        match session.execute_task(task) {
            Ok(()) => Ok(session.observation(Status::Ok, Vec::new())),
            Err(err) => Ok(session.observation_for_error(&err)),
        }
    }
}

/// Renders a parse failure as a compile-error observation.
pub fn parse_error_observation(err: &ParseError) -> Observation {
    Observation::compile_error(vec![ObsError {
        code: "PARSE_ERROR".to_string(),
        message: err.message.clone(),
        loc: Some(ObsLoc::from(&err.loc)),
        hint: None,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_and_execute_end_to_end() {
        let src = "TASK t:\nINPUT PROMPT: TEXT\nCELL main:\n  FIND_TEXT SOURCE PROMPT NEEDLE \"world\" MODE FIRST IGNORE_CASE false INTO pos: OFFSET\nOUTPUT pos\n";
        let prog = compile("t.rlm", src, Mode::Strict).unwrap();

        let mut opt = ExecOptions::with_policy(Policy::permissive());
        opt.text_inputs
            .insert("PROMPT".to_string(), "hello world".to_string());
        let obs = prog.execute(opt).unwrap();

        assert_eq!(obs.status, Status::Ok);
        assert_eq!(obs.r#final, Some(Value::Offset(6)));
        assert_eq!(obs.vars_delta.get("pos"), Some(&Value::Offset(6)));
    }

    #[test]
    fn lint_findings_block_execution() {
        let src = "TASK t:\nCELL main:\n  FROBNICATE VALUE 1 INTO x: TEXT\nOUTPUT x\n";
        let prog = compile("t.rlm", src, Mode::Compat).unwrap();
        let obs = prog.execute(ExecOptions::default()).unwrap();
        assert_eq!(obs.status, Status::Error);
        assert_eq!(obs.errors[0].code, "LINT_UNKNOWN_OP");
    }

    #[test]
    fn repair_option_fixes_before_linting() {
        let src = "CELL main:\n  READ_FILE PATH \"/tmp/x\" INTO data\n";
        let prog = compile("t.rlm", src, Mode::Compat).unwrap();
        let mut opt = ExecOptions::with_policy(
            Policy {
                allowed_read_paths: vec!["/tmp".into()],
                ..Policy::permissive()
            }
            .allow_capability("fs_read"),
        );
        opt.repair = true;
        let obs = prog.execute(opt).unwrap();
        // The file may not exist; what matters is that lint passed and the
        // failure (if any) is a runtime error, not a lint report.
        assert!(obs.errors.iter().all(|e| !e.code.starts_with("LINT_")));
    }
}
