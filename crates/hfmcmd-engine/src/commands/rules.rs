//! Rules and member-list commands

use super::{ensure_exists, ensure_writeable, log_path};
use crate::context::RulesLoad;
use crate::remote::{LoadFlags, RulesFormat};
use hfmcmd_core::params::{ParamType, ParamValue, ParameterSpec};
use hfmcmd_core::{
    CatalogBuilder, CommandContext, CommandDefinition, CommandResult, HfmError, Result,
};
use std::path::{Path, PathBuf};

fn optional_log_file(subject: &'static str) -> ParameterSpec {
    ParameterSpec::new("log_file", ParamType::Path, subject)
        .with_default(ParamValue::Path(PathBuf::new()))
}

fn flag(name: &'static str, description: &'static str) -> ParameterSpec {
    ParameterSpec::new(name, ParamType::Boolean, description).with_default(ParamValue::Bool(false))
}

pub fn register(catalog: &mut CatalogBuilder) -> Result<()> {
    catalog.register(
        CommandDefinition::builder("LoadRules")
            .description(
                "Loads an application's calculation rules from a native rule or \
                 Calculation Manager XML file",
            )
            .param(ParameterSpec::new(
                "rules_file",
                ParamType::Path,
                "Path to the source rules file",
            ))
            .param(optional_log_file(
                "Path to the load log file; \
                 defaults to the rules file path with a .log extension",
            ))
            .param(flag(
                "scan_only",
                "Scan the rules file for syntax errors rather than loading it",
            ))
            .param(flag(
                "check_integrity",
                "Check integrity of intercompany transactions following the rules load",
            ))
            .requires::<RulesLoad>()
            .body(load_rules),
    )?;

    catalog.register(
        CommandDefinition::builder("ExtractRules")
            .description("Extracts an application's rules to a native or Calculation Manager file")
            .param(ParameterSpec::new(
                "rules_file",
                ParamType::Path,
                "Path to the generated rules extract file",
            ))
            .param(optional_log_file(
                "Path to the extract log file; \
                 defaults to the extract file path with a .log extension",
            ))
            .param(
                ParameterSpec::new(
                    "rules_format",
                    ParamType::Enumeration(RulesFormat::VARIANTS),
                    "Format in which to extract rules",
                )
                .with_default(ParamValue::Enum(RulesFormat::Native.as_str())),
            )
            .requires::<RulesLoad>()
            .body(extract_rules),
    )?;

    catalog.register(
        CommandDefinition::builder("LoadMemberLists")
            .description("Loads an application's member list rules from a native member list file")
            .param(ParameterSpec::new(
                "member_list_file",
                ParamType::Path,
                "Path to the source member lists file",
            ))
            .param(optional_log_file(
                "Path to the load log file; \
                 defaults to the member list file path with a .log extension",
            ))
            .param(flag(
                "scan_only",
                "Scan the member list file for syntax errors rather than loading it",
            ))
            .requires::<RulesLoad>()
            .body(load_member_lists),
    )?;

    catalog.register(
        CommandDefinition::builder("ExtractMemberLists")
            .description("Extracts an application's member lists to a native member list file")
            .param(ParameterSpec::new(
                "member_list_file",
                ParamType::Path,
                "Path to the generated member list extract file",
            ))
            .param(optional_log_file(
                "Path to the extract log file; \
                 defaults to the extract file path with a .log extension",
            ))
            .requires::<RulesLoad>()
            .body(extract_member_lists),
    )?;

    Ok(())
}

/// Map load flags to a command status
fn load_outcome(flags: LoadFlags, subject: &str, log_file: &Path) -> CommandResult {
    if flags.errors {
        tracing::error!(log_file = %log_file.display(), "{} resulted in errors", subject);
        return CommandResult::failure(format!(
            "One or more error(s) were encountered during the {}",
            subject
        ))
        .with_message(format!("See {} for details", log_file.display()));
    }
    let mut result = CommandResult::success();
    if flags.warnings {
        result = result.with_warning(format!(
            "The {} resulted in warnings; check {} for details",
            subject,
            log_file.display()
        ));
    }
    if flags.info {
        result = result.with_message(format!(
            "Informational messages written to {}",
            log_file.display()
        ));
    }
    result
}

fn load_rules(ctx: &CommandContext<'_>) -> Result<CommandResult> {
    let params = ctx.params();
    let rules_file = params.path("rules_file")?;
    let log_file = log_path(rules_file, params.optional_path("log_file")?);
    let scan_only = params.boolean("scan_only")?;
    let check_integrity = params.boolean("check_integrity")?;

    ensure_exists(rules_file)?;
    ensure_writeable(&log_file)?;
    tracing::debug!(
        rules_file = %rules_file.display(),
        log_file = %log_file.display(),
        scan_only,
        check_integrity,
        "Rules load options"
    );

    let loader = ctx.context::<RulesLoad>()?;
    let flags = ctx.invoker().invoke("Loading rules", || {
        loader
            .surface()
            .load_calc_rules(rules_file, &log_file, scan_only, check_integrity)
    })?;
    Ok(load_outcome(flags, "rules load", &log_file))
}

fn extract_rules(ctx: &CommandContext<'_>) -> Result<CommandResult> {
    let params = ctx.params();
    let rules_file = params.path("rules_file")?;
    let log_file = log_path(rules_file, params.optional_path("log_file")?);
    let format: RulesFormat = params
        .enumeration("rules_format")?
        .parse()
        .map_err(|message| HfmError::Internal { message })?;

    ensure_writeable(rules_file)?;
    ensure_writeable(&log_file)?;

    let loader = ctx.context::<RulesLoad>()?;
    ctx.invoker().invoke("Extracting rules", || {
        loader
            .surface()
            .extract_calc_rules(rules_file, &log_file, format)
    })?;
    Ok(CommandResult::success().with_message(format!(
        "Rules extracted to {} ({})",
        rules_file.display(),
        format
    )))
}

fn load_member_lists(ctx: &CommandContext<'_>) -> Result<CommandResult> {
    let params = ctx.params();
    let member_list_file = params.path("member_list_file")?;
    let log_file = log_path(member_list_file, params.optional_path("log_file")?);
    let scan_only = params.boolean("scan_only")?;

    ensure_exists(member_list_file)?;
    ensure_writeable(&log_file)?;

    let loader = ctx.context::<RulesLoad>()?;
    let flags = ctx.invoker().invoke("Loading member lists", || {
        loader
            .surface()
            .load_member_lists(member_list_file, &log_file, scan_only)
    })?;
    Ok(load_outcome(flags, "member lists load", &log_file))
}

fn extract_member_lists(ctx: &CommandContext<'_>) -> Result<CommandResult> {
    let params = ctx.params();
    let member_list_file = params.path("member_list_file")?;
    let log_file = log_path(member_list_file, params.optional_path("log_file")?);

    ensure_writeable(member_list_file)?;
    ensure_writeable(&log_file)?;

    let loader = ctx.context::<RulesLoad>()?;
    ctx.invoker().invoke("Extracting member lists", || {
        loader
            .surface()
            .extract_member_lists(member_list_file, &log_file)
    })?;
    Ok(CommandResult::success().with_message(format!(
        "Member lists extracted to {}",
        member_list_file.display()
    )))
}
