use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use jsonschema::Draft;
use serde_json::Value;

const OPTABLE_SCHEMA_BYTES: &[u8] = include_bytes!("assets/optable.schema.json");

#[derive(Debug, Args)]
pub struct TableArgs {
    #[command(subcommand)]
    pub cmd: TableCommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum TableCommand {
    /// Validate an op table JSON file against the embedded schema.
    Check(TableCheckArgs),
    /// Print the built-in op table as JSON.
    Dump,
}

#[derive(Debug, Args)]
pub struct TableCheckArgs {
    /// Op table file.
    file: PathBuf,
}

pub fn run(args: TableArgs) -> Result<ExitCode> {
    match args.cmd {
        TableCommand::Check(check) => table_check(check),
        TableCommand::Dump => table_dump(),
    }
}

fn schema_violations(instance: &Value) -> Result<Vec<String>> {
    let schema: Value =
        serde_json::from_slice(OPTABLE_SCHEMA_BYTES).context("parse embedded op table schema")?;
    let validator = jsonschema::options()
        .with_draft(Draft::Draft7)
        .build(&schema)
        .context("build op table schema validator")?;

    Ok(validator
        .iter_errors(instance)
        .map(|e| format!("{}: {e}", e.instance_path))
        .collect())
}

fn table_check(args: TableCheckArgs) -> Result<ExitCode> {
    let data = std::fs::read(&args.file)
        .with_context(|| format!("read {}", args.file.display()))?;
    let instance: Value = serde_json::from_slice(&data)
        .with_context(|| format!("parse {}", args.file.display()))?;

    let mut violations = schema_violations(&instance)?;

    // Schema-valid tables must also load as definitions.
    if violations.is_empty() {
        if let Err(err) = envllmc::ops::Table::from_json(&data) {
            violations.push(err);
        }
    }

    let ok = violations.is_empty();
    println!(
        "{}",
        serde_json::json!({ "ok": ok, "violations": violations })
    );
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn table_dump() -> Result<ExitCode> {
    let registry = envllmc::ops::Registry::with_builtin_modules();
    let table = registry.table();
    let ops: Vec<&envllmc::ops::OpDef> = table.ops().collect();
    let doc = serde_json::json!({
        "version": table.version,
        "ops": ops,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(ExitCode::SUCCESS)
}
