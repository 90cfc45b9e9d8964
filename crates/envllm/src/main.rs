use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use envllmc::ops::Registry;
use envllmc::parse::Mode;
use envllmc::policy::Policy;
use envllmc::result::Status;
use envllmc::trace::JsonlSink;
use envllmc::{compile, parse_error_observation, ExecOptions};

mod repl;
mod table_cmd;

#[derive(Parser, Debug)]
#[command(name = "envllm")]
#[command(about = "EnvLLM DSL toolchain.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a program and print the observation JSON.
    Run(RunArgs),
    /// Parse a program and report success or the parse error.
    Validate(FileArgs),
    /// Parse and lint a program; print findings as JSON.
    Check(FileArgs),
    /// Print the canonical form of a program.
    Fmt(FmtArgs),
    /// Migrate a legacy program to the current canon.
    Migrate(FmtArgs),
    /// Start an interactive session.
    Repl,
    /// Op table utilities.
    Table(table_cmd::TableArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab_case")]
enum ParseMode {
    Compat,
    Strict,
}

impl ParseMode {
    fn to_mode(self) -> Mode {
        match self {
            ParseMode::Compat => Mode::Compat,
            ParseMode::Strict => Mode::Strict,
        }
    }
}

#[derive(Debug, Args)]
struct FileArgs {
    /// Program file.
    file: PathBuf,

    #[arg(long, value_enum, default_value_t = ParseMode::Compat)]
    mode: ParseMode,
}

#[derive(Debug, Args)]
struct FmtArgs {
    /// Program file.
    file: PathBuf,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Program file.
    file: PathBuf,

    #[arg(long, value_enum, default_value_t = ParseMode::Compat)]
    mode: ParseMode,

    /// Maximum statements per cell.
    #[arg(long, value_name = "N", default_value_t = 100)]
    max_stmts: u64,

    /// Wall-clock budget, e.g. 500ms, 2s, 1m.
    #[arg(long, value_name = "D")]
    timeout: Option<String>,

    /// Append trace steps (JSON lines) to this file.
    #[arg(long, value_name = "PATH")]
    trace: Option<PathBuf>,

    /// Policy file (JSON). CLI flags override its limits.
    #[arg(long, value_name = "FILE")]
    policy: Option<PathBuf>,

    /// Bind a text input, repeatable: --input NAME=VALUE.
    #[arg(long, value_name = "NAME=VALUE")]
    input: Vec<String>,

    /// Auto-repair before linting.
    #[arg(long)]
    repair: bool,

    /// Load op definitions from a table file instead of the built-in bundle.
    #[arg(long, value_name = "FILE")]
    ops_table: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Run(args) => run(args),
        Command::Validate(args) => validate(args),
        Command::Check(args) => check(args),
        Command::Fmt(args) => fmt(args),
        Command::Migrate(args) => migrate(args),
        Command::Repl => {
            repl::start()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Table(args) => table_cmd::run(args),
    }
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn run(args: RunArgs) -> Result<ExitCode> {
    let src = read_source(&args.file)?;
    let file_name = args.file.display().to_string();

    let prog = match compile(&file_name, &src, args.mode.to_mode()) {
        Ok(prog) => prog,
        Err(err) => {
            let obs = parse_error_observation(&err);
            println!("{}", obs.to_json().map_err(anyhow::Error::msg)?);
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut policy = match &args.policy {
        Some(path) => {
            let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
            serde_json::from_slice::<Policy>(&data)
                .with_context(|| format!("parse policy {}", path.display()))?
        }
        None => Policy::default(),
    };
    policy.max_stmts_per_cell = args.max_stmts;
    if let Some(spec) = &args.timeout {
        policy.max_wall_time_ms = parse_duration_ms(spec)?;
    }

    let mut registry = Registry::with_builtin_modules();
    if let Some(path) = &args.ops_table {
        let table = envllmc::ops::Table::load(path).map_err(anyhow::Error::msg)?;
        registry.override_table(table);
    }

    let mut opt = ExecOptions::with_policy(policy);
    opt.registry = Some(Rc::new(registry));
    opt.repair = args.repair;
    opt.text_inputs = parse_inputs(&args.input)?;
    if let Some(path) = &args.trace {
        opt.trace = Some(Box::new(JsonlSink::create(path).map_err(anyhow::Error::msg)?));
    }

    let obs = prog.execute(opt).map_err(anyhow::Error::msg)?;
    println!("{}", obs.to_json().map_err(anyhow::Error::msg)?);

    Ok(if obs.status == Status::Ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate(args: FileArgs) -> Result<ExitCode> {
    let src = read_source(&args.file)?;
    let file_name = args.file.display().to_string();
    match compile(&file_name, &src, args.mode.to_mode()) {
        Ok(_) => {
            println!("Validation successful");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("Validation failed: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn check(args: FileArgs) -> Result<ExitCode> {
    let src = read_source(&args.file)?;
    let file_name = args.file.display().to_string();
    let mode = args.mode.to_mode();

    let prog = match compile(&file_name, &src, mode) {
        Ok(prog) => prog,
        Err(err) => {
            let obs = parse_error_observation(&err);
            println!("{}", obs.to_json().map_err(anyhow::Error::msg)?);
            return Ok(ExitCode::FAILURE);
        }
    };

    let registry = Registry::with_builtin_modules();
    let findings = envllmc::lint::lint_program(registry.table(), &prog.ast, mode);
    let report: Vec<serde_json::Value> = findings
        .iter()
        .map(|f| {
            serde_json::json!({
                "code": f.code.as_str(),
                "message": f.message,
                "loc": f.loc.as_ref().map(|l| l.to_string()),
                "hint": f.hint,
            })
        })
        .collect();
    println!(
        "{}",
        serde_json::json!({ "ok": findings.is_empty(), "findings": report })
    );

    Ok(if findings.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn fmt(args: FmtArgs) -> Result<ExitCode> {
    let src = read_source(&args.file)?;
    let file_name = args.file.display().to_string();
    match compile(&file_name, &src, Mode::Compat) {
        Ok(prog) => {
            print!("{}", envllmc::format::format(&prog.ast));
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn migrate(args: FmtArgs) -> Result<ExitCode> {
    let src = read_source(&args.file)?;
    let file_name = args.file.display().to_string();
    let registry = Registry::with_builtin_modules();
    let table = Rc::new(registry.table().clone());
    match envllmc::migrate::migrate_source(&file_name, &src, table) {
        Ok((formatted, report)) => {
            print!("{formatted}");
            if !report.changes.is_empty() {
                eprintln!("applied: {}", report.changes.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn parse_inputs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("invalid --input (expected NAME=VALUE): {pair}");
        };
        out.insert(name.to_string(), value.to_string());
    }
    Ok(out)
}

/// Accepts `150ms`, `2s`, `1m`, or a bare number of seconds.
fn parse_duration_ms(spec: &str) -> Result<u64> {
    let spec = spec.trim();
    let (digits, scale) = if let Some(n) = spec.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = spec.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = spec.strip_suffix('m') {
        (n, 60_000)
    } else {
        (spec, 1000)
    };
    let n: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid duration: {spec}"))?;
    Ok(n * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_suffixes() {
        assert_eq!(parse_duration_ms("150ms").unwrap(), 150);
        assert_eq!(parse_duration_ms("2s").unwrap(), 2000);
        assert_eq!(parse_duration_ms("1m").unwrap(), 60_000);
        assert_eq!(parse_duration_ms("3").unwrap(), 3000);
        assert!(parse_duration_ms("soon").is_err());
    }

    #[test]
    fn input_pairs_split_on_first_equals() {
        let parsed = parse_inputs(&["PROMPT=a=b".to_string()]).unwrap();
        assert_eq!(parsed["PROMPT"], "a=b");
        assert!(parse_inputs(&["MISSING".to_string()]).is_err());
    }
}
