//! Loopback server backend
//!
//! Serves a local directory as the server working folder so the whole
//! pipeline can run without the vendor automation library:
//!
//! - file transfer reads files under the root in `chunk_size` pieces;
//! - a rules load copies the source file to `<root>/<application>.rle`
//!   (member lists to `<application>.lst`) and writes a load log; lines
//!   starting with `ERROR:` or `WARNING:` raise the matching load flag;
//! - an extract copies the stored file back out.

use crate::context::ConnectionSettings;
use crate::remote::{
    ApplicationSession, LoadFlags, RemoteResult, RulesFormat, RulesLoadSurface, ServerBackend,
    ServerConnection,
};
use hfmcmd_core::errors::RemoteFailure;
use hfmcmd_core::transfer::{Chunk, RemoteFileTransfer, TransferHandle};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// HRESULT for a missing file
const E_FILE_NOT_FOUND: u32 = 0x8007_0002;
/// HRESULT for access denied
const E_ACCESS_DENIED: u32 = 0x8007_0005;
/// Generic failure
const E_FAIL: u32 = 0x8000_4005;

fn io_failure(context: &str, err: io::Error) -> RemoteFailure {
    let code = match err.kind() {
        io::ErrorKind::NotFound => E_FILE_NOT_FOUND,
        io::ErrorKind::PermissionDenied => E_ACCESS_DENIED,
        _ => E_FAIL,
    };
    RemoteFailure::new(format!("{}: {}", context, err)).with_code(code)
}

/// Map a server path onto the root; anything escaping it is denied
fn resolve(root: &Path, server_path: &str) -> RemoteResult<PathBuf> {
    let relative = Path::new(server_path.trim_start_matches(&['/', '\\'][..]));
    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(
            RemoteFailure::new(format!("Access is denied: {}", server_path))
                .with_code(E_ACCESS_DENIED),
        );
    }
    Ok(root.join(relative))
}

#[derive(Debug, Clone)]
pub struct LoopbackBackend {
    root: PathBuf,
    chunk_size: usize,
}

impl LoopbackBackend {
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size: chunk_size.max(1),
        }
    }
}

impl ServerBackend for LoopbackBackend {
    fn connect(&self, settings: &ConnectionSettings) -> RemoteResult<Box<dyn ServerConnection>> {
        if !self.root.is_dir() {
            return Err(RemoteFailure::new(format!(
                "Cluster {} is unavailable: working folder {} does not exist",
                settings.cluster,
                self.root.display()
            ))
            .with_code(E_FAIL));
        }
        Ok(Box::new(LoopbackConnection {
            root: self.root.clone(),
            chunk_size: self.chunk_size,
        }))
    }
}

struct LoopbackConnection {
    root: PathBuf,
    chunk_size: usize,
}

impl ServerConnection for LoopbackConnection {
    fn open_application(&self, application: &str) -> RemoteResult<Box<dyn ApplicationSession>> {
        Ok(Box::new(LoopbackSession {
            root: self.root.clone(),
            application: application.to_string(),
            chunk_size: self.chunk_size,
        }))
    }

    fn close(&self) -> RemoteResult<()> {
        Ok(())
    }
}

struct LoopbackSession {
    root: PathBuf,
    application: String,
    chunk_size: usize,
}

impl ApplicationSession for LoopbackSession {
    fn application(&self) -> &str {
        &self.application
    }

    fn rules_loader(&self) -> RemoteResult<Box<dyn RulesLoadSurface>> {
        Ok(Box::new(LoopbackRules {
            rules: self.root.join(format!("{}.rle", self.application)),
            member_lists: self.root.join(format!("{}.lst", self.application)),
        }))
    }

    fn file_transfer(&self) -> RemoteResult<Box<dyn RemoteFileTransfer>> {
        Ok(Box::new(LoopbackTransfer {
            root: self.root.clone(),
            chunk_size: self.chunk_size,
            open: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }))
    }

    fn close(&self) -> RemoteResult<()> {
        Ok(())
    }
}

struct LoopbackRules {
    rules: PathBuf,
    member_lists: PathBuf,
}

impl LoopbackRules {
    fn load(
        &self,
        source: &Path,
        store: &Path,
        log_file: &Path,
        scan_only: bool,
    ) -> RemoteResult<LoadFlags> {
        let text = fs::read_to_string(source)
            .map_err(|e| io_failure(&format!("Unable to read {}", source.display()), e))?;

        let mut flags = LoadFlags::default();
        let mut log = vec![format!("Load of {} (scan only: {})", source.display(), scan_only)];
        for (number, line) in text.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("ERROR:") {
                flags.errors = true;
                log.push(format!("Line {}: {}", number + 1, trimmed));
            } else if trimmed.starts_with("WARNING:") {
                flags.warnings = true;
                log.push(format!("Line {}: {}", number + 1, trimmed));
            }
        }

        if !flags.errors && !scan_only {
            fs::copy(source, store)
                .map_err(|e| io_failure(&format!("Unable to store {}", store.display()), e))?;
            log.push(format!("{} line(s) loaded", text.lines().count()));
        }
        write_log(log_file, &log)?;
        Ok(flags)
    }

    fn extract(
        &self,
        store: &Path,
        target: &Path,
        log_file: &Path,
        what: &str,
    ) -> RemoteResult<String> {
        if !store.is_file() {
            return Err(
                RemoteFailure::new(format!("No {} have been loaded", what)).with_code(E_FAIL)
            );
        }
        let text = fs::read_to_string(store)
            .map_err(|e| io_failure(&format!("Unable to read {}", store.display()), e))?;
        write_log(
            log_file,
            &[format!("Extracted {} to {}", what, target.display())],
        )?;
        Ok(text)
    }
}

fn write_log(log_file: &Path, lines: &[String]) -> RemoteResult<()> {
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(log_file, text)
        .map_err(|e| io_failure(&format!("Unable to write log {}", log_file.display()), e))
}

fn write_target(target: &Path, text: &str) -> RemoteResult<()> {
    fs::write(target, text)
        .map_err(|e| io_failure(&format!("Unable to write {}", target.display()), e))
}

impl RulesLoadSurface for LoopbackRules {
    fn load_calc_rules(
        &self,
        rules_file: &Path,
        log_file: &Path,
        scan_only: bool,
        _check_integrity: bool,
    ) -> RemoteResult<LoadFlags> {
        self.load(rules_file, &self.rules, log_file, scan_only)
    }

    fn extract_calc_rules(
        &self,
        rules_file: &Path,
        log_file: &Path,
        format: RulesFormat,
    ) -> RemoteResult<()> {
        let text = self.extract(&self.rules, rules_file, log_file, "rules")?;
        let text = match format {
            RulesFormat::Native => text,
            RulesFormat::CalcManager => format!("<rules><![CDATA[{}]]></rules>\n", text),
        };
        write_target(rules_file, &text)
    }

    fn load_member_lists(
        &self,
        member_list_file: &Path,
        log_file: &Path,
        scan_only: bool,
    ) -> RemoteResult<LoadFlags> {
        self.load(member_list_file, &self.member_lists, log_file, scan_only)
    }

    fn extract_member_lists(&self, member_list_file: &Path, log_file: &Path) -> RemoteResult<()> {
        let text = self.extract(&self.member_lists, member_list_file, log_file, "member lists")?;
        write_target(member_list_file, &text)
    }
}

struct LoopbackTransfer {
    root: PathBuf,
    chunk_size: usize,
    open: Mutex<HashMap<u64, File>>,
    next_handle: AtomicU64,
}

impl LoopbackTransfer {
    fn poisoned() -> RemoteFailure {
        RemoteFailure::new("Transfer state is unavailable").with_code(E_FAIL)
    }

    fn unknown(handle: TransferHandle) -> RemoteFailure {
        RemoteFailure::new(format!("Invalid transfer handle {}", handle.0)).with_code(E_FAIL)
    }
}

impl RemoteFileTransfer for LoopbackTransfer {
    fn file_size(&self, path: &str) -> RemoteResult<Option<u64>> {
        let local = resolve(&self.root, path)?;
        let metadata = fs::metadata(&local).map_err(|e| io_failure(path, e))?;
        Ok(Some(metadata.len()))
    }

    fn begin_transfer(&self, path: &str) -> RemoteResult<TransferHandle> {
        let local = resolve(&self.root, path)?;
        let file = File::open(&local).map_err(|e| io_failure(path, e))?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.open
            .lock()
            .map_err(|_| Self::poisoned())?
            .insert(handle, file);
        Ok(TransferHandle(handle))
    }

    fn send_next_chunk(&self, handle: TransferHandle) -> RemoteResult<Chunk> {
        let mut open = self.open.lock().map_err(|_| Self::poisoned())?;
        let file = open.get_mut(&handle.0).ok_or_else(|| Self::unknown(handle))?;

        let mut bytes = vec![0; self.chunk_size];
        let mut filled = 0;
        while filled < bytes.len() {
            let n = file
                .read(&mut bytes[filled..])
                .map_err(|e| io_failure("Read failed", e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        bytes.truncate(filled);
        Ok(Chunk {
            end_of_stream: filled < self.chunk_size,
            bytes,
        })
    }

    fn end_transfer(&self, handle: TransferHandle) -> RemoteResult<()> {
        self.open
            .lock()
            .map_err(|_| Self::poisoned())?
            .remove(&handle.0)
            .map(drop)
            .ok_or_else(|| Self::unknown(handle))
    }

    fn delete(&self, path: &str) -> RemoteResult<()> {
        let local = resolve(&self.root, path)?;
        fs::remove_file(&local).map_err(|e| io_failure(path, e))
    }
}
