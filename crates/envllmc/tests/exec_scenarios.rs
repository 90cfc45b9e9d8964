//! End-to-end execution scenarios.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::json;

use envllmc::parse::Mode;
use envllmc::policy::Policy;
use envllmc::result::Status;
use envllmc::session::{Host, SubcallRequest, SubcallResponse};
use envllmc::value::{Kind, Value};
use envllmc::{compile, ExecOptions};

fn text_input(name: &str, text: &str) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert(name.to_string(), text.to_string());
    m
}

#[test]
fn text_extraction_window_around_needle() {
    let src = "TASK extract:\nINPUT PROMPT: TEXT\nCELL locate:\n  FIND_TEXT SOURCE PROMPT NEEDLE \"12345\" MODE FIRST IGNORE_CASE false INTO pos: OFFSET\n  WINDOW_TEXT SOURCE PROMPT CENTER pos RADIUS 5 INTO snippet: TEXT\n  SET_FINAL SOURCE snippet\nOUTPUT snippet\n";
    let prog = compile("extract.rlm", src, Mode::Strict).unwrap();

    let mut opt = ExecOptions::with_policy(Policy::permissive());
    opt.text_inputs = text_input("PROMPT", "The secret code is 12345. Use it wisely.");
    let obs = prog.execute(opt).unwrap();

    assert_eq!(obs.status, Status::Ok);
    let Some(Value::Text(handle)) = &obs.r#final else {
        panic!("expected TEXT final, got {:?}", obs.r#final);
    };
    assert_eq!(handle.preview.as_deref(), Some("e is 12345"));
    assert_eq!(handle.bytes, 10);
    assert_eq!(obs.vars_delta.get("pos"), Some(&Value::Offset(19)));
}

#[test]
fn capability_denied_when_policy_grants_nothing() {
    let src = "TASK read:\nREQUIRES capability=\"fs_read\"\nCELL work:\n  READ_FILE PATH \"/tmp/anything\" INTO data: TEXT\nOUTPUT data\n";
    let prog = compile("read.rlm", src, Mode::Strict).unwrap();

    let obs = prog
        .execute(ExecOptions::with_policy(Policy::permissive()))
        .unwrap();
    assert_eq!(obs.status, Status::CapabilityDenied);
    assert_eq!(obs.errors.len(), 1);
    assert!(obs.errors[0].message.contains("fs_read"));
}

struct StubHost {
    calls: RefCell<usize>,
}

impl Host for StubHost {
    fn subcall(&mut self, _req: SubcallRequest) -> Result<SubcallResponse, String> {
        *self.calls.borrow_mut() += 1;
        Ok(SubcallResponse {
            result: Value::Json(json!({"ok": true})),
            stats: BTreeMap::new(),
        })
    }
}

#[test]
fn second_subcall_exceeds_budget() {
    let src = "TASK recurse:\nINPUT PROMPT: TEXT\nREQUIRES capability=\"llm\"\nCELL work:\n  SUBCALL SOURCE PROMPT TASK \"summarize\" DEPTH_COST 1 INTO first: JSON\n  SUBCALL SOURCE PROMPT TASK \"summarize again\" DEPTH_COST 1 INTO second: JSON\nOUTPUT first\n";
    let prog = compile("recurse.rlm", src, Mode::Strict).unwrap();

    let mut opt = ExecOptions::with_policy(
        Policy {
            max_subcalls: 1,
            ..Policy::permissive()
        }
        .allow_capability("llm"),
    );
    opt.text_inputs = text_input("PROMPT", "context");
    opt.host = Some(Rc::new(RefCell::new(StubHost {
        calls: RefCell::new(0),
    })));
    let obs = prog.execute(opt).unwrap();

    assert_eq!(obs.status, Status::BudgetExceeded);
    assert_eq!(obs.budgets["subcalls"].used, 1);
    assert_eq!(obs.budgets["subcalls"].limit, 1);
    // The first call completed and bound its result.
    assert!(obs.vars_delta.contains_key("first"));
    assert!(!obs.vars_delta.contains_key("second"));
}

#[test]
fn regex_span_extraction() {
    let src = "TASK mail:\nINPUT PROMPT: TEXT\nCELL locate:\n  FIND_REGEX SOURCE PROMPT PATTERN \"[a-z]+@[a-z.]+\" MODE FIRST INTO hit: SPAN\n  GET_SPAN_START SOURCE hit INTO start: OFFSET\n  SET_FINAL SOURCE hit\nOUTPUT hit\n";
    let prog = compile("mail.rlm", src, Mode::Strict).unwrap();

    let mut opt = ExecOptions::with_policy(Policy::permissive());
    opt.text_inputs = text_input("PROMPT", "My email is test@example.com.");
    let obs = prog.execute(opt).unwrap();

    assert_eq!(obs.status, Status::Ok);
    assert_eq!(obs.vars_delta.get("start"), Some(&Value::Offset(12)));
    let Some(Value::Span(span)) = obs.vars_delta.get("hit") else {
        panic!("expected SPAN binding");
    };
    assert_eq!(span.start, 12);
}

#[test]
fn if_branches_select_on_condition() {
    let src = "TASK branch:\nINPUT flag: BOOL\nCELL setup:\n  TO_TEXT VALUE 0 INTO seed: TEXT\nIF flag:\nCELL yes:\n  TO_TEXT VALUE \"then\" INTO chosen: TEXT\nELSE:\nCELL no:\n  TO_TEXT VALUE \"else\" INTO chosen: TEXT\nEND\nOUTPUT chosen\n";
    let prog = compile("branch.rlm", src, Mode::Strict).unwrap();

    let mut opt = ExecOptions::with_policy(Policy::permissive());
    opt.inputs.insert("flag".to_string(), Value::Bool(false));
    let obs = prog.execute(opt).unwrap();
    assert_eq!(obs.status, Status::Ok);
    let Some(Value::Text(h)) = obs.vars_delta.get("chosen") else {
        panic!("expected chosen binding");
    };
    assert_eq!(h.preview.as_deref(), Some("else"));
}

#[test]
fn for_each_iterates_rows_up_to_limit() {
    let src = "TASK looped:\nINPUT rows: ROWS\nCELL work:\n  FOR_EACH row IN rows LIMIT 2:\n    PRINT SOURCE row\n  TO_TEXT VALUE \"done\" INTO done: TEXT\nOUTPUT done\n";
    let prog = compile("looped.rlm", src, Mode::Strict).unwrap();

    let rows: Vec<BTreeMap<String, serde_json::Value>> = (0..5)
        .map(|i| {
            let mut row = BTreeMap::new();
            row.insert("n".to_string(), json!(i));
            row
        })
        .collect();

    let mut opt = ExecOptions::with_policy(Policy::permissive());
    opt.inputs.insert("rows".to_string(), Value::Rows(rows));
    let obs = prog.execute(opt).unwrap();

    assert_eq!(obs.status, Status::Ok);
    let prints = obs.events.iter().filter(|e| e.t == "print").count();
    assert_eq!(prints, 2);
    // The iterator is not part of the single-assignment delta.
    assert!(!obs.vars_delta.contains_key("row"));
}

#[test]
fn assertion_failure_surfaces_authored_message() {
    let src = "TASK guarded:\nCELL work:\n  TO_TEXT VALUE 1 INTO x: TEXT\n  ASSERT COND false MESSAGE \"expected the needle\"\nOUTPUT x\n";
    let prog = compile("guarded.rlm", src, Mode::Strict).unwrap();
    let obs = prog
        .execute(ExecOptions::with_policy(Policy::permissive()))
        .unwrap();
    assert_eq!(obs.status, Status::Error);
    assert_eq!(obs.errors[0].message, "assertion failed: expected the needle");
}

#[test]
fn budget_monotonicity_no_statement_after_exhaustion() {
    let src = "TASK capped:\nCELL work:\n  TO_TEXT VALUE 1 INTO a: TEXT\n  TO_TEXT VALUE 2 INTO b: TEXT\n  TO_TEXT VALUE 3 INTO c: TEXT\nOUTPUT a\n";
    let prog = compile("capped.rlm", src, Mode::Strict).unwrap();
    let obs = prog
        .execute(ExecOptions::with_policy(Policy {
            max_stmts_per_cell: 1,
            ..Default::default()
        }))
        .unwrap();
    assert_eq!(obs.status, Status::BudgetExceeded);
    // Exactly the offending statement ran past the limit; nothing after it.
    assert_eq!(obs.budgets["stmts"].used, 2);
    assert!(obs.vars_delta.contains_key("a"));
    assert!(obs.vars_delta.contains_key("b"));
    assert!(!obs.vars_delta.contains_key("c"));
}

#[test]
fn capability_soundness_on_success() {
    // A successful run of an fs program implies the capability was granted.
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("note.txt");
    std::fs::write(&file, "hello from disk").unwrap();

    let src = format!(
        "TASK read:\nREQUIRES capability=\"fs_read\"\nCELL work:\n  READ_FILE PATH \"{}\" INTO data: TEXT\nOUTPUT data\n",
        file.display()
    );
    let prog = compile("read.rlm", &src, Mode::Strict).unwrap();

    let policy = Policy {
        allowed_read_paths: vec![dir.path().to_path_buf()],
        ..Policy::permissive()
    }
    .allow_capability("fs_read");
    let obs = prog.execute(ExecOptions::with_policy(policy)).unwrap();

    assert_eq!(obs.status, Status::Ok);
    let Some(Value::Text(h)) = obs.vars_delta.get("data") else {
        panic!("expected TEXT binding");
    };
    assert_eq!(h.preview.as_deref(), Some("hello from disk"));
}

#[test]
fn observation_shape_matches_schema() {
    let src = "TASK t:\nINPUT PROMPT: TEXT\nCELL main:\n  STATS SOURCE PROMPT INTO stats: STRUCT\nOUTPUT stats\n";
    let prog = compile("t.rlm", src, Mode::Strict).unwrap();
    let mut opt = ExecOptions::with_policy(Policy::permissive());
    opt.text_inputs = text_input("PROMPT", "two\nlines");
    let obs = prog.execute(opt).unwrap();

    let encoded: serde_json::Value = serde_json::from_str(&obs.to_json().unwrap()).unwrap();
    assert_eq!(encoded["schema_version"], "obs-0.1");
    assert_eq!(encoded["status"], "ok");
    assert_eq!(encoded["cell"]["name"], "main");
    assert_eq!(encoded["vars_delta"]["stats"]["kind"], "STRUCT");
    assert_eq!(encoded["vars_delta"]["stats"]["v"]["lines"], json!(2));
    assert!(encoded["budgets"]["stmts"]["limit"].is_u64());
    assert_eq!(encoded["truncated"]["obs"], json!(false));
}

#[test]
fn value_kind_stays_typed_through_execution() {
    // OFFSET and INT are distinct kinds even when structurally identical.
    let src = "TASK typed:\nCELL main:\n  OFFSET VALUE 7 INTO at: OFFSET\n  OFFSET_ADD OFFSET at AMOUNT 3 INTO moved: OFFSET\nOUTPUT moved\n";
    let prog = compile("typed.rlm", src, Mode::Compat).unwrap();
    let obs = prog
        .execute(ExecOptions::with_policy(Policy::permissive()))
        .unwrap();
    assert_eq!(obs.status, Status::Ok);
    let moved = &obs.vars_delta["moved"];
    assert_eq!(moved.kind(), Kind::Offset);
    assert_eq!(moved, &Value::Offset(10));
}
