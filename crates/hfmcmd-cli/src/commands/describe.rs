//! Describe command

use super::{build_engine, GlobalArgs};
use clap::Args;

#[derive(Debug, Args)]
pub struct DescribeArgs {
    /// Command name (case-insensitive)
    pub command: String,
}

pub fn execute(
    global: &GlobalArgs,
    args: DescribeArgs,
) -> Result<bool, Box<dyn std::error::Error>> {
    let engine = build_engine(global)?;
    let definition = engine.catalog().lookup(&args.command)?;

    println!("{}", definition.name());
    println!("  {}", definition.description());
    if let Some(context) = definition.requires() {
        println!("  Requires: {}", context.name());
    }

    if definition.params().is_empty() {
        println!("  Parameters: none");
        return Ok(true);
    }
    println!("  Parameters:");
    for spec in definition.params() {
        let default = match spec.default() {
            None => "required".to_string(),
            Some(value) if value.to_string().is_empty() => "optional".to_string(),
            Some(value) => format!("default: {}", value),
        };
        println!("    {} <{}> ({})", spec.name(), spec.ty(), default);
        println!("        {}", spec.description());
    }
    Ok(true)
}
