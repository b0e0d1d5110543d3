use hfmcmd_core::errors::RemoteFailure;
use hfmcmd_core::invoker::{codes, FailureClass, FailureSignature, ResilientInvoker, RetryPolicy};
use hfmcmd_core::transfer::{
    Chunk, Flow, Progress, ProgressSink, RemoteFileTransfer, TransferHandle,
};
use std::sync::Mutex;
use std::time::Duration;

/// Invoker whose backoff sleeps are recorded instead of waited out
#[allow(dead_code)]
pub fn fast_invoker(max_attempts: u32) -> (ResilientInvoker, std::sync::Arc<Mutex<Vec<Duration>>>) {
    let slept = std::sync::Arc::new(Mutex::new(Vec::new()));
    let record = slept.clone();
    let policy = RetryPolicy::new(max_attempts)
        .with_backoff(Duration::from_millis(10), 2.0, Duration::from_millis(100))
        .classify_as(
            FailureSignature::Code(codes::SERVER_CALL_RETRY_LATER),
            FailureClass::Transient,
        );
    let invoker = ResilientInvoker::new(policy)
        .with_sleeper(move |d| record.lock().unwrap().push(d));
    (invoker, slept)
}

/// In-memory server file served in fixed-size chunks
#[allow(dead_code)]
pub struct FakeRemote {
    pub content: Vec<u8>,
    pub chunk_size: usize,
    pub report_size: bool,
    /// Fail the chunk request with this 0-based index
    pub fail_on_chunk: Option<usize>,
    pub fail_delete: bool,
    pub calls: Mutex<Vec<String>>,
    served: Mutex<usize>,
}

#[allow(dead_code)]
impl FakeRemote {
    pub fn new(content: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            content,
            chunk_size,
            report_size: true,
            fail_on_chunk: None,
            fail_delete: false,
            calls: Mutex::new(Vec::new()),
            served: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl RemoteFileTransfer for FakeRemote {
    fn file_size(&self, _path: &str) -> Result<Option<u64>, RemoteFailure> {
        self.record("file_size");
        Ok(self.report_size.then_some(self.content.len() as u64))
    }

    fn begin_transfer(&self, _path: &str) -> Result<TransferHandle, RemoteFailure> {
        self.record("begin_transfer");
        Ok(TransferHandle(7))
    }

    fn send_next_chunk(&self, handle: TransferHandle) -> Result<Chunk, RemoteFailure> {
        assert_eq!(handle, TransferHandle(7));
        self.record("send_next_chunk");
        let mut served = self.served.lock().unwrap();
        let index = *served / self.chunk_size.max(1);
        if self.fail_on_chunk == Some(index) {
            return Err(RemoteFailure::new("Transfer aborted by server").with_code(0x8000_4005));
        }
        let end = (*served + self.chunk_size).min(self.content.len());
        let bytes = self.content[*served..end].to_vec();
        *served = end;
        Ok(Chunk {
            bytes,
            end_of_stream: end == self.content.len(),
        })
    }

    fn end_transfer(&self, _handle: TransferHandle) -> Result<(), RemoteFailure> {
        self.record("end_transfer");
        Ok(())
    }

    fn delete(&self, _path: &str) -> Result<(), RemoteFailure> {
        self.record("delete");
        if self.fail_delete {
            return Err(RemoteFailure::new("Access is denied").with_code(0x8007_0005));
        }
        Ok(())
    }
}

/// Records every report; cancels once `cancel_after` reports have been seen
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingSink {
    pub cancel_after: Option<usize>,
    pub reports: Mutex<Vec<Progress>>,
    pub begun: Mutex<Vec<String>>,
    pub ended: Mutex<usize>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn cancelling_after(n: usize) -> Self {
        Self {
            cancel_after: Some(n),
            ..Self::default()
        }
    }

    pub fn reports(&self) -> Vec<Progress> {
        self.reports.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn begin(&self, label: &str) {
        self.begun.lock().unwrap().push(label.to_string());
    }

    fn report(&self, progress: Progress) -> Flow {
        let mut reports = self.reports.lock().unwrap();
        reports.push(progress);
        match self.cancel_after {
            Some(n) if reports.len() >= n => Flow::Cancel,
            _ => Flow::Continue,
        }
    }

    fn end(&self) {
        *self.ended.lock().unwrap() += 1;
    }
}
