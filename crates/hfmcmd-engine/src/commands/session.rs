//! Session commands

use crate::context::Session;
use hfmcmd_core::{CatalogBuilder, CommandContext, CommandDefinition, CommandResult, Result};

pub fn register(catalog: &mut CatalogBuilder) -> Result<()> {
    catalog.register(
        CommandDefinition::builder("OpenApplication")
            .description("Opens the configured application, connecting to its cluster if needed")
            .requires::<Session>()
            .body(open_application),
    )?;
    Ok(())
}

fn open_application(ctx: &CommandContext<'_>) -> Result<CommandResult> {
    let session = ctx.context::<Session>()?;
    Ok(CommandResult::success().with_message(format!(
        "Opened application {} on {}",
        session.application(),
        session.cluster()
    )))
}
