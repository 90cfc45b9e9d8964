use std::io::{BufRead, Write};
use std::rc::Rc;

use anyhow::Result;

use envllmc::error::ObsError;
use envllmc::ops::Registry;
use envllmc::parse::{parse, Mode};
use envllmc::policy::Policy;
use envllmc::result::Status;
use envllmc::session::Session;

const PROMPT: &str = "envllm> ";

pub fn start() -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    run(stdin.lock(), stdout.lock())
}

/// One persistent session per REPL: bindings accumulate across lines, the
/// delta and events reset each turn.
fn run(input: impl BufRead, mut out: impl Write) -> Result<()> {
    let registry = Rc::new(Registry::with_builtin_modules());
    let mut session = Session::new(Policy::permissive()).with_registry(registry);

    writeln!(out, "EnvLLM REPL {}", envllm_contracts::ENVLLM_LANG_VERSION)?;
    writeln!(out, "Type 'exit' to quit.")?;

    let mut lines = input.lines();
    loop {
        write!(out, "{PROMPT}")?;
        out.flush()?;

        let Some(line) = lines.next() else {
            return Ok(());
        };
        let line = line?;
        let line = line.trim();
        if line == "exit" {
            return Ok(());
        }
        if line.is_empty() {
            continue;
        }

        // Bare statements get a cell wrapper so the parser sees a program.
        let src = if line.starts_with("CELL") || line.starts_with("RLMDSL") {
            format!("{line}\n")
        } else {
            format!("CELL repl:\n  {line}\n")
        };

        let prog = match parse("repl.rlm", &src, Mode::Compat) {
            Ok(prog) => prog,
            Err(err) => {
                writeln!(out, "Parse error: {err}")?;
                continue;
            }
        };

        let Some(task) = &prog.task else { continue };
        let mut status = Status::Ok;
        let mut errors = Vec::new();
        for item in &task.body {
            let envllmc::ast::BodyItem::Cell(cell) = item else {
                continue;
            };
            if let Err(err) = session.execute_cell(cell) {
                status = Status::Error;
                errors.push(ObsError {
                    code: "EXEC_ERROR".to_string(),
                    message: err.to_string(),
                    loc: None,
                    hint: None,
                });
            }
        }

        let obs = session.observation(status, errors);
        writeln!(out, "{}", obs.to_json().map_err(anyhow::Error::msg)?)?;
        session.reset_turn();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_persist_across_lines() {
        let input = "TO_TEXT VALUE 1 INTO x\nTO_TEXT VALUE x INTO y\nexit\n";
        let mut out = Vec::new();
        run(input.as_bytes(), &mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();
        let ok_lines = rendered
            .lines()
            .filter(|l| l.contains("\"status\":\"ok\""))
            .count();
        assert_eq!(ok_lines, 2, "{rendered}");
    }

    #[test]
    fn parse_errors_do_not_kill_the_loop() {
        let input = "TO_TEXT VALUE\nTO_TEXT VALUE 1 INTO x\nexit\n";
        let mut out = Vec::new();
        run(input.as_bytes(), &mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("Parse error"), "{rendered}");
        assert!(rendered.contains("\"status\":\"ok\""), "{rendered}");
    }
}
