//! Exec command

use super::{build_engine, print_report, GlobalArgs, TerminalProgress};
use clap::Args;
use hfmcmd_core::InvocationRequest;
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Command name (case-insensitive)
    pub command: String,

    /// Arguments, each either `name=value` or a positional value
    pub args: Vec<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(global: &GlobalArgs, args: ExecArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let engine = build_engine(global)?;
    let request = parse_request(&args.command, &args.args);

    let report = engine
        .orchestrator()
        .with_progress(Arc::new(TerminalProgress::default()))
        .run(vec![request]);
    print_report(&report, args.json)
}

/// `name=value` is named only when `name` looks like a parameter name
fn parse_request(command: &str, raw: &[String]) -> InvocationRequest {
    raw.iter()
        .fold(InvocationRequest::new(command), |request, arg| {
            match arg.split_once('=') {
                Some((name, value)) if is_param_name(name) => request.arg(name, value),
                _ => request.positional(arg.as_str()),
            }
        })
}

fn is_param_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
