//! hfmcmd Core - command catalog and execution kernel
//!
//! This crate provides the server-independent machinery that turns named,
//! loosely-typed invocations into calls against a remote financial
//! consolidation server:
//! - Parameter binding with strict, case-insensitive name matching
//! - Resilient invocation with a retry classification table
//! - A validated factory graph for run-scoped context objects
//! - Chunked file retrieval with streaming decompression and progress
//! - Batch orchestration with per-request outcome reporting
//!
//! The concrete server surface and the command set live in `hfmcmd-engine`.

pub mod catalog;
pub mod errors;
pub mod factory;
pub mod invoker;
pub mod logging_facility;
pub mod orchestrator;
pub mod params;
pub mod status;
pub mod transfer;

#[doc(hidden)]
pub use hfmcmd_core_types as core_types;

// Re-export commonly used types
pub use catalog::{CatalogBuilder, CommandCatalog, CommandContext, CommandDefinition};
pub use errors::{ErrorKind, HfmError, NormalizedError, RemoteFailure, Result};
pub use factory::{ContextCache, ContextKey, ContextObject, FactoryDefinition, FactoryGraph};
pub use invoker::{ResilientInvoker, RetryPolicy, RetrySettings};
pub use orchestrator::{ExecutionMode, ExecutionReport, Orchestrator, Outcome};
pub use params::{InvocationRequest, ParamType, ParamValue, ParameterSpec};
pub use status::{CommandResult, CommandStatus};
pub use transfer::{Progress, ProgressSink, RemoteFileTransfer, TransferEngine};
