//! Batch execution of command invocations
//!
//! The orchestrator runs a sequence of [`InvocationRequest`]s against a
//! frozen catalog. For each request it looks the command up, resolves the
//! context object the command needs (building the chain into the run's
//! cache), binds the supplied arguments and runs the body. Every request
//! yields exactly one entry in the [`ExecutionReport`].
//!
//! The run's context cache is released once, in reverse construction
//! order, when the run ends, whether it ran to completion, aborted, or
//! unwound from a panicking body.

use crate::catalog::{CommandCatalog, CommandContext};
use crate::errors::{HfmError, NormalizedError, Result};
use crate::factory::{ContextCache, FactoryGraph};
use crate::invoker::ResilientInvoker;
use crate::params::{bind, InvocationRequest};
use crate::status::{CommandResult, CommandStatus};
use crate::transfer::{NoProgress, ProgressSink};
use crate::{log_op_end, log_op_error, log_op_start};
use hfmcmd_core_types::{RequestId, RunContext, RunId};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

const OP_RUN: &str = "run";
const OP_COMMAND: &str = "command";

/// What to do after a command fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Record the failure and go on with the next request
    #[default]
    ContinueOnFailure,
    /// Stop the batch after the first failure
    AbortOnFirstFailure,
}

/// Result of one request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        status: CommandStatus,
        messages: Vec<String>,
    },
    Failed {
        error: NormalizedError,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn error(&self) -> Option<&NormalizedError> {
        match self {
            Outcome::Failed { error } => Some(error),
            Outcome::Success { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub request_id: String,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Per-request outcomes of a run, in request order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub run_id: RunId,
    pub entries: Vec<CommandReport>,
    /// True when a failure stopped the batch early
    pub aborted: bool,
    /// Context objects released at the end of the run
    pub contexts_released: usize,
}

impl ExecutionReport {
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| !e.outcome.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.entries.len() - self.success_count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &NormalizedError> {
        self.entries.iter().filter_map(|e| e.outcome.error())
    }
}

/// Runs batches of requests
///
/// Holds only shared, read-only state, so one orchestrator can serve
/// concurrent runs; each run gets its own context cache.
#[derive(Clone)]
pub struct Orchestrator {
    catalog: Arc<CommandCatalog>,
    factories: Arc<FactoryGraph>,
    invoker: ResilientInvoker,
    mode: ExecutionMode,
    progress: Arc<dyn ProgressSink>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<CommandCatalog>,
        factories: Arc<FactoryGraph>,
        invoker: ResilientInvoker,
    ) -> Self {
        Self {
            catalog,
            factories,
            invoker,
            mode: ExecutionMode::default(),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sink handed to command bodies for long-running work
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    pub fn run(&self, requests: Vec<InvocationRequest>) -> ExecutionReport {
        self.run_with(RunContext::new(), requests)
    }

    /// Run a batch under an existing run context
    pub fn run_with(&self, ctx: RunContext, requests: Vec<InvocationRequest>) -> ExecutionReport {
        let span = tracing::info_span!(
            "run",
            run_id = %ctx.run_id,
            origin = ctx.origin.as_deref().unwrap_or("")
        );
        let _guard = span.enter();
        let start = Instant::now();
        log_op_start!(OP_RUN, requests = requests.len());

        let mut cache = ContextCache::new();
        let mut entries = Vec::with_capacity(requests.len());
        let mut aborted = false;
        let total = requests.len();

        for (i, request) in requests.into_iter().enumerate() {
            let entry = self.execute(&request, &mut cache);
            let failed = !entry.outcome.is_success();
            entries.push(entry);
            if failed && self.mode == ExecutionMode::AbortOnFirstFailure && i + 1 < total {
                aborted = true;
                tracing::warn!(
                    skipped = total - i - 1,
                    "Aborting run after command failure"
                );
                break;
            }
        }

        let contexts_released = cache.release_all();
        let report = ExecutionReport {
            run_id: ctx.run_id,
            entries,
            aborted,
            contexts_released,
        };
        log_op_end!(
            OP_RUN,
            duration_ms = start.elapsed().as_millis() as u64,
            succeeded = report.success_count(),
            failed = report.failure_count(),
            aborted = report.aborted,
        );
        report
    }

    fn execute(&self, request: &InvocationRequest, cache: &mut ContextCache) -> CommandReport {
        let request_id = RequestId::new();
        // Catalog spelling once found; the raw name only for an unknown command
        let command = self
            .catalog
            .lookup(&request.command)
            .map(|definition| definition.name().to_string())
            .unwrap_or_else(|_| request.command.clone());
        let span = tracing::info_span!(
            "command",
            command = command.as_str(),
            request_id = %request_id
        );
        let _guard = span.enter();
        let start = Instant::now();
        log_op_start!(OP_COMMAND, command = command.as_str());

        let outcome = self
            .execute_request(request, cache)
            .and_then(|result| self.settle(&command, result));
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match outcome {
            Ok(outcome) => {
                log_op_end!(
                    OP_COMMAND,
                    duration_ms = duration_ms,
                    command = command.as_str(),
                );
                outcome
            }
            Err(err) => {
                let error = NormalizedError::from(&err).with_command(command.clone());
                log_op_error!(
                    OP_COMMAND,
                    error,
                    duration_ms = duration_ms,
                    command = command.as_str(),
                );
                Outcome::Failed { error }
            }
        };

        CommandReport {
            command,
            request_id: request_id.to_string(),
            duration_ms,
            outcome,
        }
    }

    fn execute_request(
        &self,
        request: &InvocationRequest,
        cache: &mut ContextCache,
    ) -> Result<CommandResult> {
        let definition = self.catalog.lookup(&request.command)?;
        if let Some(key) = definition.requires() {
            self.factories.resolve_key(key, cache, &self.invoker)?;
        }
        let params = bind(definition.params(), request)?;

        let ctx = CommandContext::new(
            definition.name(),
            &params,
            cache,
            &self.invoker,
            self.progress.as_ref(),
        );
        let body = definition.body().as_ref();
        panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))).unwrap_or_else(|payload| {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HfmError::Internal {
                message: format!("command {} panicked: {}", definition.name(), detail),
            })
        })
    }

    /// Turn a body's status into an outcome; failure status becomes an error
    fn settle(&self, command: &str, result: CommandResult) -> Result<Outcome> {
        match result.status() {
            CommandStatus::Success => Ok(Outcome::Success {
                status: CommandStatus::Success,
                messages: result.into_messages(),
            }),
            CommandStatus::SuccessWithWarnings => {
                for warning in result.messages() {
                    tracing::warn!(
                        command = command,
                        warning = warning.as_str(),
                        "Command completed with warnings"
                    );
                }
                Ok(Outcome::Success {
                    status: CommandStatus::SuccessWithWarnings,
                    messages: result.into_messages(),
                })
            }
            CommandStatus::Failure => Err(HfmError::CommandFailed {
                messages: result.into_messages(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let ok = CommandReport {
            command: "A".into(),
            request_id: "r1".into(),
            duration_ms: 1,
            outcome: Outcome::Success {
                status: CommandStatus::Success,
                messages: vec![],
            },
        };
        let failed = CommandReport {
            command: "B".into(),
            request_id: "r2".into(),
            duration_ms: 1,
            outcome: Outcome::Failed {
                error: NormalizedError::from(&HfmError::CommandNotFound { name: "B".into() }),
            },
        };
        let report = ExecutionReport {
            run_id: RunId::new(),
            entries: vec![ok, failed],
            aborted: false,
            contexts_released: 0,
        };

        assert!(report.has_errors());
        assert_eq!(report.success_count(), 1);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = Outcome::Success {
            status: CommandStatus::SuccessWithWarnings,
            messages: vec!["check log".into()],
        };
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["outcome"], "success");
        assert_eq!(json["status"], "success_with_warnings");
    }
}
