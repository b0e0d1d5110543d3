//! Boundary to the remote automation surface
//!
//! Everything the commands need from the consolidation server, expressed as
//! object-safe traits. Each call returns the raw [`RemoteFailure`] on error;
//! callers route calls through the resilient invoker. A backend for the
//! vendor automation library implements these traits outside this crate;
//! [`crate::loopback`] implements them over a local directory.

use crate::context::ConnectionSettings;
use hfmcmd_core::errors::RemoteFailure;
use hfmcmd_core::transfer::RemoteFileTransfer;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub type RemoteResult<T> = std::result::Result<T, RemoteFailure>;

/// Outcome flags of a rules or member-list load
///
/// The server reports problems in the log file and raises these flags
/// instead of failing the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags {
    pub errors: bool,
    pub warnings: bool,
    pub info: bool,
}

/// Format of an extracted rules file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RulesFormat {
    #[default]
    Native,
    CalcManager,
}

impl RulesFormat {
    /// Canonical spellings, in declaration order
    pub const VARIANTS: &'static [&'static str] = &["Native", "CalcManager"];

    pub fn as_str(&self) -> &'static str {
        match self {
            RulesFormat::Native => "Native",
            RulesFormat::CalcManager => "CalcManager",
        }
    }
}

impl FromStr for RulesFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(RulesFormat::Native),
            "calcmanager" => Ok(RulesFormat::CalcManager),
            other => Err(format!("unknown rules format '{}'", other)),
        }
    }
}

impl fmt::Display for RulesFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry point of a server implementation
pub trait ServerBackend: Send + Sync {
    fn connect(&self, settings: &ConnectionSettings) -> RemoteResult<Box<dyn ServerConnection>>;
}

/// An authenticated connection to a cluster
pub trait ServerConnection: Send + Sync {
    fn open_application(&self, application: &str) -> RemoteResult<Box<dyn ApplicationSession>>;

    fn close(&self) -> RemoteResult<()>;
}

/// A session on one application
pub trait ApplicationSession: Send + Sync {
    fn application(&self) -> &str;

    fn rules_loader(&self) -> RemoteResult<Box<dyn RulesLoadSurface>>;

    fn file_transfer(&self) -> RemoteResult<Box<dyn RemoteFileTransfer>>;

    fn close(&self) -> RemoteResult<()>;
}

/// Rules and member-list load/extract
pub trait RulesLoadSurface: Send + Sync {
    fn load_calc_rules(
        &self,
        rules_file: &Path,
        log_file: &Path,
        scan_only: bool,
        check_integrity: bool,
    ) -> RemoteResult<LoadFlags>;

    fn extract_calc_rules(
        &self,
        rules_file: &Path,
        log_file: &Path,
        format: RulesFormat,
    ) -> RemoteResult<()>;

    fn load_member_lists(
        &self,
        member_list_file: &Path,
        log_file: &Path,
        scan_only: bool,
    ) -> RemoteResult<LoadFlags>;

    fn extract_member_lists(&self, member_list_file: &Path, log_file: &Path) -> RemoteResult<()>;
}
