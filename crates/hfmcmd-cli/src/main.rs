//! hfmcmd CLI
//!
//! Command-line front-end for the hfmcmd command catalog

use clap::{Parser, Subcommand};
use hfmcmd_core::logging_facility::{self, Profile};
use std::process::ExitCode;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "hfmcmd")]
#[command(about = "hfmcmd - Command-line automation for a consolidation server", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: commands::GlobalArgs,

    /// Logging profile: dev (human-readable, debug) or prod (JSON, info)
    #[arg(long, global = true, default_value = "prod")]
    log_profile: Profile,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List all commands
    List(commands::list::ListArgs),
    /// Show the parameters of one command
    Describe(commands::describe::DescribeArgs),
    /// Execute a single command
    Exec(commands::exec::ExecArgs),
    /// Execute a batch script of commands
    Run(commands::run::RunArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging_facility::init(cli.log_profile);

    let result = match cli.command {
        Commands::List(args) => commands::list::execute(&cli.global, args),
        Commands::Describe(args) => commands::describe::execute(&cli.global, args),
        Commands::Exec(args) => commands::exec::execute(&cli.global, args),
        Commands::Run(args) => commands::run::execute(&cli.global, args),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}
