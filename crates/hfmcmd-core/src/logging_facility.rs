//! Structured logging facility for hfmcmd
//!
//! This module provides:
//! - Single initialization point via `init(profile)`
//! - Structured logging macros (`log_op_start!`, `log_op_end!`, `log_op_error!`)
//! - Test capture mode for deterministic assertions
//!
//! Components do not hold loggers; they emit through `tracing` inside the
//! spans the orchestrator opens for each run and command.
//!
//! # Usage
//!
//! ```rust
//! use hfmcmd_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
