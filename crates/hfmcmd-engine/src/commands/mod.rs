//! Command manifest
//!
//! Every command the tool exposes is registered here, grouped by the
//! context object it runs against.

pub mod files;
pub mod rules;
pub mod session;

use hfmcmd_core::{CatalogBuilder, HfmError, Result};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

/// Register the full command set
///
/// # Errors
///
/// Fails on a duplicate command name or a malformed parameter default.
pub fn register_all(catalog: &mut CatalogBuilder) -> Result<()> {
    session::register(catalog)?;
    rules::register(catalog)?;
    files::register(catalog)?;
    Ok(())
}

/// Log file for a load or extract: the given path, or `file` with a `.log` extension
pub(crate) fn log_path(file: &Path, log_file: Option<&Path>) -> PathBuf {
    match log_file {
        Some(log_file) => log_file.to_path_buf(),
        None => file.with_extension("log"),
    }
}

pub(crate) fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(HfmError::io(
            path,
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        ))
    }
}

/// The file can be created or overwritten
pub(crate) fn ensure_writeable(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            return Err(HfmError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "directory does not exist"),
            ));
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(drop)
        .map_err(|e| HfmError::io(path, e))
}
