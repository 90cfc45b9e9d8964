//! Operation registry and dispatcher.
//!
//! The registry aggregates static modules (core, filesystem, web), each
//! contributing definitions and handlers. Dispatch is the only path from an
//! op statement to an implementation and performs, in order: lookup, arity
//! check, argument evaluation (with enum-bareword resolution and
//! STRING→TEXT promotion), signature validation, capability check, handler
//! call, and a result-kind post-check.

use envllm_contracts::CAP_PURE;

use crate::ast::KwArg;
use crate::error::ExecError;
use crate::ops::table::{OpDef, Table};
use crate::ops::{core, fs, web};
use crate::session::Session;
use crate::value::{Kind, Value};

pub type Handler = fn(&mut Session, &[Value]) -> Result<Value, ExecError>;

/// A static bundle of op definitions plus their implementations.
pub trait Module {
    fn id(&self) -> &'static str;
    fn operations(&self) -> Vec<OpDef>;
    fn handlers(&self) -> Vec<(&'static str, Handler)>;
}

pub struct Registry {
    table: Table,
    impls: std::collections::BTreeMap<String, Handler>,
}

impl Registry {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            impls: std::collections::BTreeMap::new(),
        }
    }

    /// The default registry: core, filesystem, and web modules.
    pub fn with_builtin_modules() -> Self {
        let mut r = Self::new(Table::new(envllm_contracts::OP_TABLE_SCHEMA_VERSION));
        r.register_module(&core::CoreModule);
        r.register_module(&fs::FsModule);
        r.register_module(&web::WebModule);
        r
    }

    pub fn register_module(&mut self, module: &dyn Module) {
        for op in module.operations() {
            self.table.insert(op);
        }
        for (name, handler) in module.handlers() {
            self.impls.insert(name.to_string(), handler);
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Replaces definitions with those from an externally loaded table while
    /// keeping the registered handlers.
    pub fn override_table(&mut self, table: Table) {
        self.table = table;
    }

    pub fn dispatch(
        &self,
        session: &mut Session,
        name: &str,
        args: &[KwArg],
    ) -> Result<Value, ExecError> {
        let def = self
            .table
            .get(name)
            .ok_or_else(|| ExecError::runtime(format!("unknown operation: {name}")))?;

        if args.len() != def.signature.len() {
            return Err(ExecError::runtime(format!(
                "{name}: expected {} arguments, got {}",
                def.signature.len(),
                args.len()
            )));
        }

        let mut evaluated: Vec<(String, Value)> = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let param = &def.signature[i];

            // Enum parameters accept a bareword whose spelling is the enum
            // value; the identifier is taken literally instead of resolved.
            let mut value = if !param.variants.is_empty() {
                arg.value
                    .as_ident()
                    .map(|ident| Value::Str(ident.to_string()))
            } else {
                None
            };

            if value.is_none() {
                value = Some(session.eval_expr(&arg.value)?);
            }
            let mut value = value.unwrap_or(Value::Null);

            // Promote raw strings to interned text when the signature demands it.
            if param.ty == Some(Kind::Text) {
                if let Value::Str(s) = &value {
                    let handle = session.store_mut().add(s);
                    value = Value::Text(handle);
                }
            }

            evaluated.push((arg.keyword.clone(), value));
        }

        let def = self
            .table
            .validate_signature(name, &evaluated)
            .map_err(ExecError::runtime)?;

        self.check_capabilities(session, def)?;

        let handler = self
            .impls
            .get(name)
            .ok_or_else(|| ExecError::runtime(format!("operation {name:?} has no implementation")))?;

        let positional: Vec<Value> = evaluated.into_iter().map(|(_, v)| v).collect();
        let result = handler(session, &positional)?;

        if result.kind() != def.result_type {
            return Err(ExecError::runtime(format!(
                "{name}: result type mismatch: expected {}, got {}",
                def.result_type,
                result.kind()
            )));
        }

        Ok(result)
    }

    fn check_capabilities(&self, session: &Session, def: &OpDef) -> Result<(), ExecError> {
        for cap in &def.capabilities {
            if cap == CAP_PURE {
                continue;
            }
            if !session.policy().allowed_capabilities.contains(cap) {
                return Err(ExecError::capability(format!(
                    "capability {cap:?} denied by policy"
                )));
            }
        }
        Ok(())
    }
}
