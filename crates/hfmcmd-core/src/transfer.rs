//! Chunked file retrieval from the server
//!
//! [`TransferEngine::retrieve`] pulls a server file chunk by chunk through a
//! [`RemoteFileTransfer`] surface, optionally gunzips it on the fly, and
//! reports progress to a [`ProgressSink`] after every chunk. The sink may
//! cancel; whatever has been written so far stays on disk.
//!
//! Once a transfer handle exists, `end_transfer` is called on every path out
//! of the loop. On completion the server copy is deleted as a courtesy; a
//! failed delete only warns.

use crate::errors::{HfmError, RemoteFailure, Result};
use crate::invoker::ResilientInvoker;
use crate::{log_op_end, log_op_error, log_op_start};
use flate2::write::GzDecoder;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

const OP_TRANSFER: &str = "transfer";

/// Suffix marking a gzip-compressed file
pub const COMPRESSION_MARKER: &str = ".gz";

/// Server-side handle for an in-flight transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferHandle(pub u64);

/// One chunk of file content
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    pub end_of_stream: bool,
}

/// Remote surface for pulling files off the server
///
/// Calls return the raw [`RemoteFailure`]; the engine routes each of them
/// through the resilient invoker.
pub trait RemoteFileTransfer: Send + Sync {
    /// Size of a server file in bytes, if the surface can tell
    fn file_size(&self, _path: &str) -> std::result::Result<Option<u64>, RemoteFailure> {
        Ok(None)
    }

    fn begin_transfer(&self, path: &str) -> std::result::Result<TransferHandle, RemoteFailure>;

    fn send_next_chunk(&self, handle: TransferHandle) -> std::result::Result<Chunk, RemoteFailure>;

    fn end_transfer(&self, handle: TransferHandle) -> std::result::Result<(), RemoteFailure>;

    fn delete(&self, path: &str) -> std::result::Result<(), RemoteFailure>;
}

/// Progress as reported after each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Share of the source read so far, 0..=100
    Percent(u8),
    /// Total size unknown; bytes read so far
    Indeterminate { bytes: u64 },
}

/// Whether the sink wants the operation to go on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Cancel,
}

/// Observer of long-running work
///
/// Methods take `&self`; sinks that keep state use interior mutability.
pub trait ProgressSink: Send + Sync {
    fn begin(&self, _label: &str) {}

    fn report(&self, progress: Progress) -> Flow;

    fn end(&self) {}
}

/// A sink that ignores progress and never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: Progress) -> Flow {
        Flow::Continue
    }
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) -> Flow + Send + Sync,
{
    fn report(&self, progress: Progress) -> Flow {
        self(progress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Initiated,
    Transferring,
    Completed,
    Cancelled,
    Failed,
}

/// Bookkeeping for one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferState {
    pub source: String,
    pub destination: PathBuf,
    pub total_size: Option<u64>,
    /// Bytes received from the server
    pub bytes_read: u64,
    /// Bytes written locally, after decompression if any
    pub bytes_written: u64,
    /// Whether the stream is gunzipped; only a compressed source is
    pub decompress: bool,
    pub cancelled: bool,
    pub phase: TransferPhase,
}

impl TransferState {
    fn new(source: &str, destination: PathBuf, decompress: bool) -> Self {
        Self {
            source: source.to_string(),
            destination,
            total_size: None,
            bytes_read: 0,
            bytes_written: 0,
            decompress: decompress && is_compressed(source),
            cancelled: false,
            phase: TransferPhase::Initiated,
        }
    }

    /// Progress derived from bytes read against the total
    pub fn progress(&self) -> Progress {
        match self.total_size {
            Some(total) if total > 0 => {
                let percent = (self.bytes_read.saturating_mul(100) / total).min(100);
                Progress::Percent(percent as u8)
            }
            _ => Progress::Indeterminate {
                bytes: self.bytes_read,
            },
        }
    }
}

/// A source name carrying the compression marker holds a gzip stream
pub fn is_compressed(source: &str) -> bool {
    source.to_ascii_lowercase().ends_with(COMPRESSION_MARKER)
}

/// Local path the file ends up at
///
/// A compressed source kept compressed gets the marker appended to the
/// destination unless it already has it.
pub fn destination_path(source: &str, destination: &Path, decompress: bool) -> PathBuf {
    let compressed = is_compressed(source);
    let marked = destination
        .to_string_lossy()
        .to_ascii_lowercase()
        .ends_with(COMPRESSION_MARKER);
    if compressed && !decompress && !marked {
        let mut path = destination.as_os_str().to_owned();
        path.push(COMPRESSION_MARKER);
        PathBuf::from(path)
    } else {
        destination.to_path_buf()
    }
}

/// Counts what reaches the file
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

type FileWriter = CountingWriter<BufWriter<File>>;

enum LocalSink {
    Plain(FileWriter),
    Gunzip(GzDecoder<FileWriter>),
}

impl LocalSink {
    fn create(path: &Path, decompress: bool) -> io::Result<Self> {
        let writer = CountingWriter {
            inner: BufWriter::new(File::create(path)?),
            count: 0,
        };
        Ok(if decompress {
            LocalSink::Gunzip(GzDecoder::new(writer))
        } else {
            LocalSink::Plain(writer)
        })
    }

    fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            LocalSink::Plain(w) => w.write_all(bytes),
            LocalSink::Gunzip(d) => d.write_all(bytes),
        }
    }

    fn written(&self) -> u64 {
        match self {
            LocalSink::Plain(w) => w.count,
            LocalSink::Gunzip(d) => d.get_ref().count,
        }
    }

    /// Flush everything; for a gzip stream this also checks the trailer
    fn finish(&mut self) -> io::Result<()> {
        match self {
            LocalSink::Plain(w) => w.flush(),
            LocalSink::Gunzip(d) => {
                d.try_finish()?;
                d.get_mut().flush()
            }
        }
    }

    /// Flush what has been decoded so far without requiring a full stream
    fn flush_partial(&mut self) -> io::Result<()> {
        match self {
            LocalSink::Plain(w) => w.flush(),
            LocalSink::Gunzip(d) => d.flush(),
        }
    }
}

/// Drives [`RemoteFileTransfer`] surfaces
#[derive(Debug, Clone, Default)]
pub struct TransferEngine {
    invoker: ResilientInvoker,
}

impl TransferEngine {
    pub fn new(invoker: ResilientInvoker) -> Self {
        Self { invoker }
    }

    /// Copy `source` from the server to `destination`
    ///
    /// Returns the final state for completed and cancelled transfers. Any
    /// failure after the handle was obtained still ends the transfer and is
    /// reported as [`HfmError::Transfer`].
    pub fn retrieve(
        &self,
        remote: &dyn RemoteFileTransfer,
        source: &str,
        destination: &Path,
        decompress: bool,
        progress: &dyn ProgressSink,
    ) -> Result<TransferState> {
        let start = Instant::now();
        let destination = destination_path(source, destination, decompress);
        let mut state = TransferState::new(source, destination, decompress);
        log_op_start!(
            OP_TRANSFER,
            source = source,
            destination = %state.destination.display(),
            decompress = decompress,
        );

        match self
            .invoker
            .invoke(&format!("Querying size of {}", source), || remote.file_size(source))
        {
            Ok(size) => state.total_size = size,
            Err(err) => {
                tracing::warn!(
                    source = source,
                    error = %err,
                    "File size unavailable; progress is indeterminate"
                );
            }
        }

        let handle = self
            .invoker
            .invoke(&format!("Initiating download of file {}", source), || {
                remote.begin_transfer(source)
            })
            .map_err(|err| self.fail(&mut state, err, start))?;

        progress.begin(&format!("Downloading {}", source));
        state.phase = TransferPhase::Transferring;
        let streamed = self.stream(remote, handle, &mut state, progress);
        let ended = self
            .invoker
            .invoke(&format!("Completing transfer of {}", source), || {
                remote.end_transfer(handle)
            });
        progress.end();

        match (streamed, ended) {
            (Err(err), ended) => {
                if let Err(end_err) = ended {
                    tracing::warn!(
                        source = source,
                        error = %end_err,
                        "Failed to end transfer after an error"
                    );
                }
                return Err(self.fail(&mut state, err, start));
            }
            (Ok(()), Err(err)) => return Err(self.fail(&mut state, err, start)),
            (Ok(()), Ok(())) => {}
        }

        if state.cancelled {
            state.phase = TransferPhase::Cancelled;
            tracing::info!(
                source = source,
                bytes_read = state.bytes_read,
                bytes_written = state.bytes_written,
                "File transfer cancelled"
            );
        } else {
            state.phase = TransferPhase::Completed;
            if let Err(err) = self
                .invoker
                .invoke(&format!("Deleting file {}", source), || remote.delete(source))
            {
                tracing::warn!(source = source, error = %err, "Unable to delete file from server");
            }
        }

        log_op_end!(
            OP_TRANSFER,
            duration_ms = start.elapsed().as_millis() as u64,
            source = source,
            bytes_read = state.bytes_read,
            bytes_written = state.bytes_written,
            cancelled = state.cancelled,
        );
        Ok(state)
    }

    fn stream(
        &self,
        remote: &dyn RemoteFileTransfer,
        handle: TransferHandle,
        state: &mut TransferState,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let path = state.destination.clone();
        let io_err = |e: io::Error| HfmError::io(&path, e);
        let mut sink = LocalSink::create(&path, state.decompress).map_err(io_err)?;

        loop {
            let chunk = self
                .invoker
                .invoke("Retrieving file content", || remote.send_next_chunk(handle))?;
            if !chunk.bytes.is_empty() {
                state.bytes_read += chunk.bytes.len() as u64;
                sink.write_chunk(&chunk.bytes).map_err(io_err)?;
                state.bytes_written = sink.written();
                tracing::debug!(
                    bytes = chunk.bytes.len(),
                    total_read = state.bytes_read,
                    "Received chunk"
                );
                if progress.report(state.progress()) == Flow::Cancel {
                    state.cancelled = true;
                }
            }
            if chunk.end_of_stream || state.cancelled {
                break;
            }
        }

        if state.cancelled {
            sink.flush_partial().map_err(io_err)?;
        } else {
            sink.finish().map_err(io_err)?;
        }
        state.bytes_written = sink.written();
        Ok(())
    }

    fn fail(&self, state: &mut TransferState, cause: HfmError, start: Instant) -> HfmError {
        state.phase = TransferPhase::Failed;
        let err = HfmError::Transfer {
            source_path: state.source.clone(),
            bytes_written: state.bytes_written,
            source: Box::new(cause),
        };
        log_op_error!(
            OP_TRANSFER,
            err,
            duration_ms = start.elapsed().as_millis() as u64,
            source = state.source.as_str(),
            bytes_read = state.bytes_read,
        );
        err
    }
}
