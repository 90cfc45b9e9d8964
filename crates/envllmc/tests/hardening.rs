//! Malformed input must produce errors, never panics, in any stage.

use envllmc::parse::{parse, Mode};
use envllmc::policy::Policy;
use envllmc::value::Value;
use envllmc::{compile, ExecOptions};

const MALFORMED_PROGRAMS: &[&str] = &[
    "RLMDSL",
    "RLMDSL \"quoted\"",
    "TASK",
    "TASK :",
    "TASK t",
    "TASK t:\n",
    "TASK t:\nOUTPUT\n",
    "TASK t:\nINPUT\nOUTPUT x\n",
    "TASK t:\nINPUT a b\nOUTPUT x\n",
    "CELL\n",
    "CELL :\n",
    "CELL a\n  OP INTO x\n",
    "TASK t:\nCELL a:\n  INTO x\nOUTPUT x\n",
    "TASK t:\nCELL a:\n  FIND_TEXT SOURCE\nOUTPUT x\n",
    "TASK t:\nCELL a:\n  TO_TEXT VALUE 1 INTO\nOUTPUT x\n",
    "TASK t:\nCELL a:\n  TO_TEXT VALUE 1 INTO x:\nOUTPUT x\n",
    "TASK t:\nREQUIRES\nOUTPUT x\n",
    "TASK t:\nREQUIRES capability\nOUTPUT x\n",
    "TASK t:\nREQUIRES capability=\nOUTPUT x\n",
    "TASK t:\nREQUIRES capability=fs_read\nOUTPUT x\n",
    "TASK t:\nIF:\nEND\nOUTPUT x\n",
    "TASK t:\nIF true\nEND\nOUTPUT x\n",
    "TASK t:\nIF true:\nOUTPUT x\n",
    "TASK t:\nCELL a:\n  FOR_EACH IN rows LIMIT 2:\nOUTPUT x\n",
    "TASK t:\nCELL a:\n  FOR_EACH r rows LIMIT 2:\nOUTPUT x\n",
    "TASK t:\nCELL a:\n  FOR_EACH r IN rows LIMIT:\nOUTPUT x\n",
    "TASK t:\nCELL a:\n  ASSERT COND true\nOUTPUT x\n",
    "TASK t:\nCELL a:\n  SET_FINAL 1\nOUTPUT x\n",
    "TASK t:\nCELL a:\n  PRINT 1\nOUTPUT x\n",
    "DIALECT\nTASK t:\nOUTPUT x\n",
    "EXT =1\nTASK t:\nOUTPUT x\n",
    "@ # $ %\n",
    "\"unterminated",
    "TASK t:\nCELL a:\n  TO_TEXT VALUE \"unterminated INTO x\nOUTPUT x\n",
    "TASK t:\nCELL dup:\n  TO_TEXT VALUE 1 INTO a: TEXT\nCELL dup:\n  TO_TEXT VALUE 2 INTO b: TEXT\nOUTPUT a\n",
];

#[test]
fn malformed_programs_error_in_both_modes() {
    for (i, src) in MALFORMED_PROGRAMS.iter().enumerate() {
        for mode in [Mode::Compat, Mode::Strict] {
            let result = parse("hardening.rlm", src, mode);
            assert!(
                result.is_err(),
                "case {i} ({mode:?}) unexpectedly parsed: {src:?}"
            );
        }
    }
}

#[test]
fn empty_source_is_a_legacy_program_in_compat_only() {
    for src in ["", "\n\n\n"] {
        let prog = parse("empty.rlm", src, Mode::Compat).unwrap();
        let task = prog.task.unwrap();
        assert_eq!(task.name, "default");
        assert!(task.body.is_empty());
        assert!(parse("empty.rlm", src, Mode::Strict).is_err());
    }
}

#[test]
fn parse_survives_byte_noise() {
    // Token soup built from the grammar's own alphabet plus strays.
    let fragments = [
        "TASK", "CELL", "INTO", ":", "=", "\"x\"", "-12", "FOR_EACH", "IF", "ELSE", "END",
        "OUTPUT", "\n", "é", "@", "stats.cost", "null", "true",
    ];
    let mut soup = String::new();
    for (i, frag) in fragments.iter().cycle().take(400).enumerate() {
        soup.push_str(frag);
        if i % 3 == 0 {
            soup.push(' ');
        }
    }
    // Either outcome is fine; the property is no panic and no hang.
    let _ = parse("soup.rlm", &soup, Mode::Compat);
    let _ = parse("soup.rlm", &soup, Mode::Strict);
}

#[test]
fn execution_errors_stay_structured() {
    // A program that lints clean but dies at runtime: the observation is
    // still well-formed JSON with a populated error list.
    let src = "TASK t:\nCELL a:\n  JSON_PARSE SOURCE \"{not json\" INTO doc: JSON\nOUTPUT doc\n";
    let prog = compile("t.rlm", src, Mode::Strict).unwrap();
    let obs = prog
        .execute(ExecOptions::with_policy(Policy::permissive()))
        .unwrap();
    assert_eq!(obs.errors.len(), 1);
    assert!(obs.errors[0].message.contains("JSON_PARSE failed"));
    let encoded: serde_json::Value = serde_json::from_str(&obs.to_json().unwrap()).unwrap();
    assert_eq!(encoded["status"], "error");
}

#[test]
fn value_decoding_rejects_mismatched_payloads() {
    let cases = [
        r#"{"kind":"INT","v":"not a number"}"#,
        r#"{"kind":"SPAN","v":{"start":"a","end":2}}"#,
        r#"{"kind":"TEXT","v":7}"#,
        r#"{"kind":"ROWS","v":{"not":"a list"}}"#,
        r#"{"kind":"BOOL","v":null}"#,
        r#"{"v":1}"#,
        r#"[]"#,
    ];
    for case in cases {
        assert!(
            serde_json::from_str::<Value>(case).is_err(),
            "decoded unexpectedly: {case}"
        );
    }
}
