//! Server file commands

use crate::context::FileTransfer;
use hfmcmd_core::params::{ParamType, ParamValue, ParameterSpec};
use hfmcmd_core::transfer::{TransferEngine, TransferPhase};
use hfmcmd_core::{CatalogBuilder, CommandContext, CommandDefinition, CommandResult, Result};

pub fn register(catalog: &mut CatalogBuilder) -> Result<()> {
    catalog.register(
        CommandDefinition::builder("RetrieveFile")
            .description("Retrieves a file from the application server's working folder")
            .param(ParameterSpec::new(
                "server_file",
                ParamType::String,
                "Path of the file on the server",
            ))
            .param(ParameterSpec::new(
                "target_path",
                ParamType::Path,
                "Local path to save the file to",
            ))
            .param(
                ParameterSpec::new(
                    "decompress",
                    ParamType::Boolean,
                    "Decompress a gzip-compressed server file while saving it",
                )
                .with_default(ParamValue::Bool(true)),
            )
            .requires::<FileTransfer>()
            .body(retrieve_file),
    )?;
    Ok(())
}

fn retrieve_file(ctx: &CommandContext<'_>) -> Result<CommandResult> {
    let params = ctx.params();
    let server_file = params.string("server_file")?;
    let target = params.path("target_path")?;
    let decompress = params.boolean("decompress")?;

    let transfer = ctx.context::<FileTransfer>()?;
    let state = TransferEngine::new(ctx.invoker().clone()).retrieve(
        transfer.surface(),
        server_file,
        target,
        decompress,
        ctx.progress(),
    )?;

    Ok(match state.phase {
        TransferPhase::Cancelled => CommandResult::success().with_warning(format!(
            "Retrieval of {} cancelled after {} bytes; {} is incomplete",
            server_file,
            state.bytes_read,
            state.destination.display()
        )),
        _ => CommandResult::success().with_message(format!(
            "Retrieved {} to {} ({} bytes)",
            server_file,
            state.destination.display(),
            state.bytes_written
        )),
    })
}
