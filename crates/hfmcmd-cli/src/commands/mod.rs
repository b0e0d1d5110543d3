//! CLI subcommands and the pieces they share

pub mod describe;
pub mod exec;
pub mod list;
pub mod run;

use clap::Args;
use hfmcmd_core::transfer::Flow;
use hfmcmd_core::{ExecutionReport, Outcome, Progress, ProgressSink};
use hfmcmd_engine::config::ClientConfig;
use hfmcmd_engine::loopback::LoopbackBackend;
use hfmcmd_engine::Engine;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Client configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Server working folder; overrides `server.root` from the config file
    #[arg(long, global = true)]
    pub server_root: Option<PathBuf>,
}

/// Load configuration and build the engine over the loopback backend
pub fn build_engine(global: &GlobalArgs) -> Result<Engine, Box<dyn std::error::Error>> {
    let config = ClientConfig::load(global.config.as_deref())?;
    let root = global
        .server_root
        .clone()
        .or_else(|| config.server.root.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    tracing::debug!(root = %root.display(), "Using loopback server root");
    let backend = Arc::new(LoopbackBackend::new(root, config.server.chunk_size));
    Ok(Engine::new(backend, &config)?)
}

/// Print a report, as JSON or one line per command; true when no command failed
pub fn print_report(
    report: &ExecutionReport,
    json: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(!report.has_errors());
    }

    for entry in &report.entries {
        match &entry.outcome {
            Outcome::Success { status, messages } => {
                println!("[OK] {} ({:?}, {} ms)", entry.command, status, entry.duration_ms);
                for message in messages {
                    println!("    {}", message);
                }
            }
            Outcome::Failed { error } => {
                println!("[FAILED] {} [{}] {}", entry.command, error.code(), error.message());
                for cause in error.causes() {
                    println!("    caused by: {}", cause);
                }
            }
        }
    }
    if report.aborted {
        println!("Run aborted after first failure");
    }
    println!(
        "{} succeeded, {} failed",
        report.success_count(),
        report.failure_count()
    );
    Ok(!report.has_errors())
}

/// Transfer progress on stderr
#[derive(Debug, Default)]
pub struct TerminalProgress {
    last_percent: AtomicU8,
}

impl ProgressSink for TerminalProgress {
    fn begin(&self, label: &str) {
        self.last_percent.store(0, Ordering::Relaxed);
        eprintln!("{}", label);
    }

    fn report(&self, progress: Progress) -> Flow {
        let mut stderr = std::io::stderr().lock();
        match progress {
            Progress::Percent(percent) => {
                if self.last_percent.swap(percent, Ordering::Relaxed) != percent {
                    let _ = write!(stderr, "\r  {:>3}%", percent);
                }
            }
            Progress::Indeterminate { bytes } => {
                let _ = write!(stderr, "\r  {} bytes", bytes);
            }
        }
        let _ = stderr.flush();
        Flow::Continue
    }

    fn end(&self) {
        eprintln!();
    }
}
