//! Run command
//!
//! Executes a TOML batch script:
//!
//! ```toml
//! [[command]]
//! name = "LoadRules"
//! args = { rules_file = "rules/demo.rle", scan_only = true }
//!
//! [[command]]
//! name = "RetrieveFile"
//! positional = ["Reports/journals.gz", "out/journals.txt"]
//! ```

use super::{build_engine, print_report, GlobalArgs, TerminalProgress};
use clap::Args;
use hfmcmd_core::{ExecutionMode, InvocationRequest};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Batch script (TOML)
    pub script: PathBuf,

    /// Stop at the first failing command
    #[arg(long)]
    pub abort_on_failure: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Script {
    #[serde(default)]
    command: Vec<ScriptCommand>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptCommand {
    name: String,
    #[serde(default)]
    args: BTreeMap<String, toml::Value>,
    #[serde(default)]
    positional: Vec<toml::Value>,
}

pub fn execute(global: &GlobalArgs, args: RunArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let requests = load_script(&args.script)?;
    let engine = build_engine(global)?;

    let mode = if args.abort_on_failure {
        ExecutionMode::AbortOnFirstFailure
    } else {
        ExecutionMode::ContinueOnFailure
    };
    tracing::info!(
        script = %args.script.display(),
        commands = requests.len(),
        ?mode,
        "Running script"
    );

    let report = engine
        .orchestrator()
        .with_mode(mode)
        .with_progress(Arc::new(TerminalProgress::default()))
        .run(requests);
    print_report(&report, args.json)
}

fn load_script(path: &Path) -> Result<Vec<InvocationRequest>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Unable to read script {}: {}", path.display(), e))?;
    parse_script(&text).map_err(|e| format!("Invalid script {}: {}", path.display(), e).into())
}

fn parse_script(text: &str) -> Result<Vec<InvocationRequest>, Box<dyn std::error::Error>> {
    let script: Script = toml::from_str(text)?;
    script
        .command
        .into_iter()
        .map(|command| {
            let mut request = InvocationRequest::new(command.name.as_str());
            for value in &command.positional {
                request = request.positional(raw_value(&command.name, value)?);
            }
            for (name, value) in &command.args {
                request = request.arg(name.as_str(), raw_value(&command.name, value)?);
            }
            Ok(request)
        })
        .collect()
}

/// Scalars become the raw string the binder converts
fn raw_value(command: &str, value: &toml::Value) -> Result<String, Box<dyn std::error::Error>> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(d) => Ok(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => Err(format!(
            "{}: argument values must be scalars, got {}",
            command,
            value.type_str()
        )
        .into()),
    }
}
