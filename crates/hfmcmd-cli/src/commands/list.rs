//! List command

use super::{build_engine, GlobalArgs};
use clap::Args;

#[derive(Debug, Args)]
pub struct ListArgs {}

pub fn execute(global: &GlobalArgs, _args: ListArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let engine = build_engine(global)?;
    let catalog = engine.catalog();
    let width = catalog.iter().map(|d| d.name().len()).max().unwrap_or(0);

    for definition in catalog.iter() {
        println!(
            "{:<width$}  {}",
            definition.name(),
            definition.description(),
            width = width
        );
    }
    Ok(true)
}
