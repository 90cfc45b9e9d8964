//! Execution session.
//!
//! A session runs one task on a single thread. The environment is
//! single-assignment; loop iterators rebind through a scoped overlay. Budgets
//! are enforced after every statement, cancellation is checked before every
//! statement, and terminal errors are converted into structured observations
//! rather than propagated as panics.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::ast::{BodyItem, Cell, Expr, ForEachStmt, IfStmt, Stmt, Task};
use crate::env::Env;
use crate::error::{ExecError, ObsError, ObsLoc};
use crate::ops::Registry;
use crate::policy::Policy;
use crate::result::{BudgetStats, CellInfo, Event, Observation, Status, TruncationFlags};
use crate::store::TextStore;
use crate::trace::{Decision, Phase, Sink, TraceStep};
use crate::value::{Kind, TextHandle, Value};

#[derive(Debug, Clone)]
pub struct SubcallRequest {
    pub source: TextHandle,
    pub task: String,
    pub depth_cost: u64,
    /// Remaining budgets handed down to the next level.
    pub budgets: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct SubcallResponse {
    pub result: Value,
    pub stats: BTreeMap<String, i64>,
}

/// The host produces next-level observations for `SUBCALL`. Synchronous from
/// the session's vantage; an async embedder awaits internally.
pub trait Host {
    fn subcall(&mut self, req: SubcallRequest) -> Result<SubcallResponse, String>;
}

/// Cooperative cancellation flag checked before each statement dispatch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct Session {
    env: Env,
    store: TextStore,
    policy: Policy,

    stmts_executed: u64,
    started: Option<Instant>,
    recursion_depth: u64,
    subcall_count: u64,

    current_cell: String,
    cell_index: usize,

    final_value: Option<Value>,
    vars_delta: BTreeMap<String, Value>,
    events: Vec<Event>,

    trace_seq: u64,
    trace: Option<Box<dyn Sink>>,
    registry: Option<Rc<Registry>>,
    host: Option<Rc<RefCell<dyn Host>>>,
    cancel: Option<CancelToken>,
}

impl Session {
    pub fn new(policy: Policy) -> Self {
        Self {
            env: Env::new(),
            store: TextStore::new(),
            policy,
            stmts_executed: 0,
            started: None,
            recursion_depth: 0,
            subcall_count: 0,
            current_cell: String::new(),
            cell_index: 0,
            final_value: None,
            vars_delta: BTreeMap::new(),
            events: Vec::new(),
            trace_seq: 0,
            trace: None,
            registry: None,
            host: None,
            cancel: None,
        }
    }

    pub fn with_registry(mut self, registry: Rc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_host(mut self, host: Rc<RefCell<dyn Host>>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_trace(mut self, sink: Box<dyn Sink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn store(&self) -> &TextStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TextStore {
        &mut self.store
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn final_value(&self) -> Option<&Value> {
        self.final_value.as_ref()
    }

    pub fn subcall_count(&self) -> u64 {
        self.subcall_count
    }

    pub fn recursion_depth(&self) -> u64 {
        self.recursion_depth
    }

    /// Pre-binds an input before execution. Inputs do not appear in the
    /// observation's `vars_delta`.
    pub fn bind_input(&mut self, name: &str, value: Value) -> Result<(), ExecError> {
        self.env.define(name, value).map_err(ExecError::runtime)
    }

    /// Interns text and binds it as a TEXT input in one step.
    pub fn bind_text_input(&mut self, name: &str, text: &str) -> Result<(), ExecError> {
        let handle = self.store.add(text);
        self.bind_input(name, Value::Text(handle))
    }

    fn define_var(&mut self, name: &str, value: Value) -> Result<(), ExecError> {
        self.env
            .define(name, value.clone())
            .map_err(ExecError::runtime)?;
        self.vars_delta.insert(name.to_string(), value);
        Ok(())
    }

    pub fn eval_expr(&self, expr: &Expr) -> Result<Value, ExecError> {
        match expr {
            Expr::Ident { name, .. } => self
                .env
                .get(name)
                .cloned()
                .ok_or_else(|| ExecError::runtime(format!("undefined variable: {name}"))),
            Expr::Str { value, .. } => Ok(Value::Str(value.clone())),
            Expr::Int { value, .. } => Ok(Value::Int(*value)),
            Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
            Expr::Null { .. } => Ok(Value::Null),
        }
    }

    fn emit_trace(&mut self, step: TraceStep) {
        if let Some(sink) = &mut self.trace {
            let mut step = step;
            self.trace_seq += 1;
            step.seq = self.trace_seq;
            let _ = sink.emit(step);
        }
    }

    pub fn execute_task(&mut self, task: &Task) -> Result<(), ExecError> {
        self.started = Some(Instant::now());

        // Inputs are expected to have been pre-bound by the embedder.
        self.execute_body(&task.body)?;

        if let Some(output) = &task.output {
            let value = self
                .env
                .get(output)
                .cloned()
                .ok_or_else(|| {
                    ExecError::runtime(format!("task output {output:?} not found in environment"))
                })?;
            self.final_value = Some(value);
        }

        Ok(())
    }

    fn execute_body(&mut self, body: &[BodyItem]) -> Result<(), ExecError> {
        for item in body {
            self.execute_body_item(item)?;
        }
        Ok(())
    }

    fn execute_body_item(&mut self, item: &BodyItem) -> Result<(), ExecError> {
        match item {
            // Requirements are metadata for the linter; the runtime gate is
            // the dispatcher's policy check.
            BodyItem::Requires(_) => Ok(()),
            BodyItem::Cell(cell) => self.execute_cell(cell),
            BodyItem::If(ifs) => self.execute_if(ifs),
            BodyItem::Stmt(stmt) => self.execute_stmt(stmt),
        }
    }

    fn execute_if(&mut self, stmt: &IfStmt) -> Result<(), ExecError> {
        let cond = self.eval_expr(&stmt.cond)?;
        let Some(flag) = cond.as_bool() else {
            return Err(ExecError::runtime(format!(
                "IF condition must be BOOL, got {}",
                cond.kind()
            )));
        };
        if flag {
            self.execute_body(&stmt.then_body)
        } else {
            self.execute_body(&stmt.else_body)
        }
    }

    pub fn execute_cell(&mut self, cell: &Cell) -> Result<(), ExecError> {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        if !self.current_cell.is_empty() {
            self.cell_index += 1;
        }
        self.current_cell = cell.name.clone();

        for stmt in &cell.stmts {
            self.execute_stmt(stmt)?;
        }
        Ok(())
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> Result<(), ExecError> {
        self.check_cancelled()?;
        self.stmts_executed += 1;

        match stmt {
            Stmt::SetFinal(s) => {
                let value = self.eval_expr(&s.source)?;
                self.final_value = Some(value);
            }
            Stmt::Print(s) => {
                let value = self.eval_expr(&s.source)?;
                let detail = self.print_detail(&value);
                self.events.push(Event::print(detail));
            }
            Stmt::Assert(s) => {
                let value = self.eval_expr(&s.cond)?;
                let Some(flag) = value.as_bool() else {
                    return Err(ExecError::runtime(format!(
                        "{}: ASSERT COND must be BOOL, got {}",
                        s.loc,
                        value.kind()
                    )));
                };
                if !flag {
                    return Err(ExecError::runtime(format!(
                        "assertion failed: {}",
                        s.message
                    )));
                }
            }
            Stmt::ForEach(s) => self.execute_for_each(s)?,
            Stmt::Op(op) => {
                let registry = self
                    .registry
                    .clone()
                    .ok_or_else(|| ExecError::runtime("no operation dispatcher configured"))?;

                let op_started = Instant::now();
                match registry.dispatch(self, &op.name, &op.args) {
                    Ok(result) => {
                        if let Some(into) = &op.into {
                            self.define_var(into, result)?;
                        }
                        let ms = op_started.elapsed().as_millis() as u64;
                        self.events.push(Event::op(&op.name, op.into.as_deref(), ms));
                        let step = TraceStep::new(Phase::Exec, Decision::Accept).with_op(&op.name);
                        self.emit_trace(step);
                    }
                    Err(err) => {
                        let step = TraceStep::new(Phase::Exec, Decision::Reject)
                            .with_op(&op.name)
                            .with_error("EXEC_ERROR", err.message());
                        self.emit_trace(step);
                        return Err(err);
                    }
                }
            }
        }

        self.check_budgets()
    }

    fn execute_for_each(&mut self, stmt: &ForEachStmt) -> Result<(), ExecError> {
        let collection = self
            .env
            .get(&stmt.collection)
            .cloned()
            .ok_or_else(|| {
                ExecError::runtime(format!("undefined collection: {}", stmt.collection))
            })?;
        if collection.kind() != Kind::Rows {
            return Err(ExecError::runtime(format!(
                "FOR_EACH expects ROWS, got {}",
                collection.kind()
            )));
        }
        let Value::Rows(rows) = collection else {
            unreachable!("kind checked above");
        };

        let limit = (stmt.limit.max(0) as usize).min(rows.len());
        for row in rows.into_iter().take(limit) {
            self.env
                .bind_iterator(&stmt.iterator, Value::Struct(row));
            for inner in &stmt.body {
                if let Err(err) = self.execute_stmt(inner) {
                    self.env.unbind_iterator(&stmt.iterator);
                    return Err(err);
                }
            }
        }
        self.env.unbind_iterator(&stmt.iterator);
        Ok(())
    }

    fn print_detail(&self, value: &Value) -> String {
        if let Value::Text(handle) = value {
            if let Some(text) = self.store.get(handle) {
                return text.to_string();
            }
        }
        value.display_string()
    }

    fn check_cancelled(&self) -> Result<(), ExecError> {
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return Err(ExecError::Cancelled("execution cancelled".to_string()));
            }
        }
        Ok(())
    }

    fn check_budgets(&self) -> Result<(), ExecError> {
        if self.policy.max_stmts_per_cell > 0 && self.stmts_executed > self.policy.max_stmts_per_cell
        {
            return Err(ExecError::budget(format!(
                "max statements per cell ({}) exceeded",
                self.policy.max_stmts_per_cell
            )));
        }
        if let (Some(limit), Some(started)) = (self.policy.max_wall_time(), self.started) {
            if started.elapsed() > limit {
                return Err(ExecError::budget(format!(
                    "max wall time ({}ms) exceeded",
                    self.policy.max_wall_time_ms
                )));
            }
        }
        Ok(())
    }

    /// Recursive host call. Both budgets are pre-charged: the call is refused
    /// before the host is consulted when either would exceed policy.
    pub fn subcall(
        &mut self,
        source: TextHandle,
        task: String,
        depth_cost: u64,
    ) -> Result<Value, ExecError> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| ExecError::runtime("SUBCALL failed: no host configured"))?;

        if self.policy.max_subcalls > 0 && self.subcall_count + 1 > self.policy.max_subcalls {
            return Err(ExecError::budget("max subcalls reached"));
        }
        if self.policy.max_recursion_depth > 0
            && self.recursion_depth + depth_cost > self.policy.max_recursion_depth
        {
            return Err(ExecError::budget(format!(
                "recursion depth limit reached (cost {depth_cost})"
            )));
        }
        self.subcall_count += 1;
        self.recursion_depth += depth_cost;

        let mut budgets = BTreeMap::new();
        if self.policy.max_subcalls > 0 {
            budgets.insert(
                "subcalls".to_string(),
                self.policy.max_subcalls - self.subcall_count,
            );
        }
        if self.policy.max_recursion_depth > 0 {
            budgets.insert(
                "recursion_depth".to_string(),
                self.policy.max_recursion_depth.saturating_sub(self.recursion_depth),
            );
        }

        let req = SubcallRequest {
            source,
            task: task.clone(),
            depth_cost,
            budgets,
        };
        let response = host
            .borrow_mut()
            .subcall(req)
            .map_err(|e| ExecError::runtime(format!("host subcall failed: {e}")))?;

        self.events.push(Event::subcall(task));
        Ok(response.result)
    }

    /// Clears the per-turn delta and event log. Bindings persist; used by
    /// REPL-style embedders that run many cells against one environment.
    pub fn reset_turn(&mut self) {
        self.vars_delta.clear();
        self.events.clear();
    }

    /// Materializes the observation for this execution.
    pub fn observation(&self, status: Status, errors: Vec<ObsError>) -> Observation {
        let mut budgets = BTreeMap::new();
        budgets.insert(
            "stmts".to_string(),
            BudgetStats {
                used: self.stmts_executed,
                limit: self.policy.max_stmts_per_cell,
            },
        );
        budgets.insert(
            "subcalls".to_string(),
            BudgetStats {
                used: self.subcall_count,
                limit: self.policy.max_subcalls,
            },
        );
        budgets.insert(
            "recursion_depth".to_string(),
            BudgetStats {
                used: self.recursion_depth,
                limit: self.policy.max_recursion_depth,
            },
        );
        if self.policy.max_wall_time_ms > 0 {
            budgets.insert(
                "wall_time_ms".to_string(),
                BudgetStats {
                    used: self
                        .started
                        .map(|s| s.elapsed().as_millis() as u64)
                        .unwrap_or(0),
                    limit: self.policy.max_wall_time_ms,
                },
            );
        }

        let mut obs = Observation {
            schema_version: envllm_contracts::OBS_SCHEMA_VERSION.to_string(),
            cell: CellInfo {
                name: self.current_cell.clone(),
                index: self.cell_index,
            },
            status,
            vars_delta: self.vars_delta.clone(),
            r#final: self.final_value.clone(),
            result: None,
            budgets,
            events: self.events.clone(),
            errors,
            truncated: TruncationFlags::default(),
        };

        obs.truncated.previews = self.values_have_cut_previews();
        self.enforce_obs_budget(&mut obs);
        obs
    }

    fn values_have_cut_previews(&self) -> bool {
        fn cut(value: &Value) -> bool {
            match value {
                Value::Text(h) => h.preview_bytes.is_some_and(|p| p < h.bytes),
                Value::List(items) => items.iter().any(cut),
                _ => false,
            }
        }
        self.vars_delta.values().any(cut) || self.final_value.as_ref().is_some_and(cut)
    }

    /// Shrinks the observation to the policy's byte budget by dropping print
    /// events first, then the remaining event log.
    fn enforce_obs_budget(&self, obs: &mut Observation) {
        let limit = self.policy.max_total_bytes;
        if limit == 0 {
            return;
        }
        let size = |o: &Observation| o.to_json().map(|s| s.len() as u64).unwrap_or(0);

        if size(obs) <= limit {
            return;
        }
        obs.truncated.obs = true;

        let before = obs.events.len();
        obs.events.retain(|e| e.t != "print");
        if obs.events.len() != before {
            obs.truncated.prints = true;
        }
        if size(obs) > limit {
            obs.events.clear();
        }
    }

    /// Converts a terminal error into the observation for this run.
    pub fn observation_for_error(&self, err: &ExecError) -> Observation {
        let status = match err {
            ExecError::BudgetExceeded(_) => Status::BudgetExceeded,
            ExecError::CapabilityDenied(_) => Status::CapabilityDenied,
            ExecError::Cancelled(_) | ExecError::Runtime(_) => Status::Error,
        };
        let code = match err {
            ExecError::BudgetExceeded(_) => "BUDGET_EXCEEDED",
            ExecError::CapabilityDenied(_) => "CAPABILITY_DENIED",
            ExecError::Cancelled(_) => "CANCELLED",
            ExecError::Runtime(_) => "EXEC_ERROR",
        };
        self.observation(
            status,
            vec![ObsError {
                code: code.to_string(),
                message: err.message().to_string(),
                loc: None,
                hint: None,
            }],
        )
    }
}

/// Lint findings become observation errors with their own codes.
pub fn lint_errors_to_obs(findings: &[crate::lint::LintError]) -> Vec<ObsError> {
    findings
        .iter()
        .map(|f| ObsError {
            code: f.code.as_str().to_string(),
            message: f.message.clone(),
            loc: f.loc.as_ref().map(ObsLoc::from),
            hint: f.hint.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ast::{AssertStmt, KwArg, OpStmt, PrintStmt, SetFinalStmt};
    use crate::token::Loc;

    fn cell_of(stmts: Vec<Stmt>) -> Cell {
        Cell {
            loc: Loc::default(),
            name: "test".into(),
            stmts,
        }
    }

    #[test]
    fn set_final_print_and_assert() {
        let mut s = Session::new(Policy::permissive());
        let cell = cell_of(vec![
            Stmt::Print(PrintStmt {
                loc: Loc::default(),
                source: Expr::string("hello"),
            }),
            Stmt::Assert(AssertStmt {
                loc: Loc::default(),
                cond: Expr::Bool {
                    loc: Loc::default(),
                    value: true,
                },
                message: "ok".into(),
            }),
            Stmt::SetFinal(SetFinalStmt {
                loc: Loc::default(),
                source: Expr::Int {
                    loc: Loc::default(),
                    value: 42,
                },
            }),
        ]);
        s.execute_cell(&cell).unwrap();
        assert_eq!(s.final_value(), Some(&Value::Int(42)));
        assert_eq!(s.events.len(), 1);
        assert_eq!(s.events[0].t, "print");
    }

    #[test]
    fn assert_failure_carries_authored_message() {
        let mut s = Session::new(Policy::permissive());
        let cell = cell_of(vec![Stmt::Assert(AssertStmt {
            loc: Loc::default(),
            cond: Expr::Bool {
                loc: Loc::default(),
                value: false,
            },
            message: "the needle must exist".into(),
        })]);
        let err = s.execute_cell(&cell).unwrap_err();
        assert_eq!(err.message(), "assertion failed: the needle must exist");
    }

    #[test]
    fn statement_budget_stops_execution() {
        let mut s = Session::new(Policy {
            max_stmts_per_cell: 1,
            ..Default::default()
        });
        let cell = cell_of(vec![
            Stmt::Print(PrintStmt {
                loc: Loc::default(),
                source: Expr::string("one"),
            }),
            Stmt::Print(PrintStmt {
                loc: Loc::default(),
                source: Expr::string("two"),
            }),
        ]);
        let err = s.execute_cell(&cell).unwrap_err();
        assert!(matches!(err, ExecError::BudgetExceeded(_)), "{err}");
    }

    #[test]
    fn cancellation_preempts_statements() {
        let token = CancelToken::new();
        token.cancel();
        let mut s = Session::new(Policy::permissive()).with_cancel(token);
        let cell = cell_of(vec![Stmt::Print(PrintStmt {
            loc: Loc::default(),
            source: Expr::string("never"),
        })]);
        let err = s.execute_cell(&cell).unwrap_err();
        assert!(matches!(err, ExecError::Cancelled(_)));
    }

    #[test]
    fn op_without_dispatcher_is_a_runtime_error() {
        let mut s = Session::new(Policy::permissive());
        let cell = cell_of(vec![Stmt::Op(OpStmt {
            loc: Loc::default(),
            name: "TO_TEXT".into(),
            args: vec![KwArg {
                keyword: "VALUE".into(),
                value: Expr::string("x"),
            }],
            into: Some("x".into()),
            into_type: None,
        })]);
        let err = s.execute_cell(&cell).unwrap_err();
        assert!(err.message().contains("no operation dispatcher"));
    }

    struct CountingHost {
        calls: usize,
    }

    impl Host for CountingHost {
        fn subcall(&mut self, _req: SubcallRequest) -> Result<SubcallResponse, String> {
            self.calls += 1;
            Ok(SubcallResponse {
                result: Value::Json(json!({"answer": 7})),
                stats: BTreeMap::new(),
            })
        }
    }

    #[test]
    fn subcall_pre_charges_and_refuses_over_budget() {
        let host = Rc::new(RefCell::new(CountingHost { calls: 0 }));
        let mut s = Session::new(Policy {
            max_subcalls: 1,
            max_recursion_depth: 4,
            ..Policy::permissive()
        })
        .with_host(host.clone());

        let source = s.store_mut().add("ctx");
        s.subcall(source.clone(), "first".into(), 1).unwrap();
        let err = s.subcall(source, "second".into(), 1).unwrap_err();
        assert!(matches!(err, ExecError::BudgetExceeded(_)), "{err}");
        // The refused call never reached the host.
        assert_eq!(host.borrow().calls, 1);
        assert_eq!(s.subcall_count(), 1);
    }

    #[test]
    fn subcall_refuses_excess_depth_cost() {
        let host = Rc::new(RefCell::new(CountingHost { calls: 0 }));
        let mut s = Session::new(Policy {
            max_subcalls: 10,
            max_recursion_depth: 2,
            ..Policy::permissive()
        })
        .with_host(host.clone());
        let source = s.store_mut().add("ctx");
        let err = s.subcall(source, "deep".into(), 3).unwrap_err();
        assert!(matches!(err, ExecError::BudgetExceeded(_)));
        assert_eq!(host.borrow().calls, 0);
    }

    #[test]
    fn observation_reports_budgets_and_delta() {
        let mut s = Session::new(Policy::permissive());
        s.bind_text_input("PROMPT", "hello world").unwrap();
        let cell = cell_of(vec![Stmt::SetFinal(SetFinalStmt {
            loc: Loc::default(),
            source: Expr::ident("PROMPT"),
        })]);
        s.execute_cell(&cell).unwrap();
        let obs = s.observation(Status::Ok, vec![]);
        assert_eq!(obs.status, Status::Ok);
        assert_eq!(obs.cell.name, "test");
        // Inputs are pre-bound, not part of the delta.
        assert!(obs.vars_delta.is_empty());
        assert_eq!(obs.budgets["stmts"].used, 1);
        assert!(obs.r#final.is_some());
    }

    #[test]
    fn oversized_observation_drops_prints_and_flags_truncation() {
        let mut s = Session::new(Policy {
            max_total_bytes: 400,
            ..Policy::permissive()
        });
        let cell = cell_of(
            (0..20)
                .map(|i| {
                    Stmt::Print(PrintStmt {
                        loc: Loc::default(),
                        source: Expr::string(format!("line {i} {}", "x".repeat(50))),
                    })
                })
                .collect(),
        );
        s.execute_cell(&cell).unwrap();
        let obs = s.observation(Status::Ok, vec![]);
        assert!(obs.truncated.obs);
        assert!(obs.truncated.prints);
        assert!(obs.events.iter().all(|e| e.t != "print"));
    }
}
