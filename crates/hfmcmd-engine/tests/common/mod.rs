use hfmcmd_core::errors::RemoteFailure;
use hfmcmd_core::invoker::codes;
use hfmcmd_core::transfer::{Chunk, RemoteFileTransfer, TransferHandle};
use hfmcmd_engine::config::ClientConfig;
use hfmcmd_engine::context::ConnectionSettings;
use hfmcmd_engine::remote::{
    ApplicationSession, LoadFlags, RemoteResult, RulesFormat, RulesLoadSurface, ServerBackend,
    ServerConnection,
};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub type Journal = Arc<Mutex<Vec<String>>>;

/// Config with an application and near-zero backoff
#[allow(dead_code)]
pub fn test_config(application: &str) -> ClientConfig {
    ClientConfig::from_toml_str(&format!(
        r#"
        [connection]
        cluster = "testcluster"
        application = "{}"
        user = "tester"

        [retry]
        max_attempts = 3
        initial_backoff_ms = 1
        max_backoff_ms = 1
        "#,
        application
    ))
    .unwrap()
}

/// Backend that records every call and answers from a script
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedBackend {
    pub journal: Journal,
    /// Number of connect attempts to reject as "retry later"
    pub connect_failures: AtomicU32,
    pub load_flags: Mutex<LoadFlags>,
}

#[allow(dead_code)]
impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

fn record(journal: &Journal, call: String) {
    journal.lock().unwrap().push(call);
}

impl ServerBackend for ScriptedBackend {
    fn connect(&self, settings: &ConnectionSettings) -> RemoteResult<Box<dyn ServerConnection>> {
        record(&self.journal, format!("connect {}", settings.cluster));
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RemoteFailure::new("Server busy").with_code(codes::SERVER_CALL_RETRY_LATER));
        }
        Ok(Box::new(ScriptedConnection {
            journal: self.journal.clone(),
            flags: *self.load_flags.lock().unwrap(),
        }))
    }
}

struct ScriptedConnection {
    journal: Journal,
    flags: LoadFlags,
}

impl ServerConnection for ScriptedConnection {
    fn open_application(&self, application: &str) -> RemoteResult<Box<dyn ApplicationSession>> {
        record(&self.journal, format!("open {}", application));
        Ok(Box::new(ScriptedSession {
            journal: self.journal.clone(),
            application: application.to_string(),
            flags: self.flags,
        }))
    }

    fn close(&self) -> RemoteResult<()> {
        record(&self.journal, "close connection".to_string());
        Ok(())
    }
}

struct ScriptedSession {
    journal: Journal,
    application: String,
    flags: LoadFlags,
}

impl ApplicationSession for ScriptedSession {
    fn application(&self) -> &str {
        &self.application
    }

    fn rules_loader(&self) -> RemoteResult<Box<dyn RulesLoadSurface>> {
        Ok(Box::new(ScriptedRules {
            journal: self.journal.clone(),
            flags: self.flags,
        }))
    }

    fn file_transfer(&self) -> RemoteResult<Box<dyn RemoteFileTransfer>> {
        Ok(Box::new(ScriptedTransfer {
            journal: self.journal.clone(),
        }))
    }

    fn close(&self) -> RemoteResult<()> {
        record(&self.journal, "close session".to_string());
        Ok(())
    }
}

struct ScriptedRules {
    journal: Journal,
    flags: LoadFlags,
}

impl RulesLoadSurface for ScriptedRules {
    fn load_calc_rules(
        &self,
        rules_file: &Path,
        _log_file: &Path,
        scan_only: bool,
        check_integrity: bool,
    ) -> RemoteResult<LoadFlags> {
        record(
            &self.journal,
            format!(
                "load_rules {} scan={} integrity={}",
                rules_file.display(),
                scan_only,
                check_integrity
            ),
        );
        Ok(self.flags)
    }

    fn extract_calc_rules(
        &self,
        rules_file: &Path,
        _log_file: &Path,
        format: RulesFormat,
    ) -> RemoteResult<()> {
        record(
            &self.journal,
            format!("extract_rules {} {}", rules_file.display(), format),
        );
        Ok(())
    }

    fn load_member_lists(
        &self,
        member_list_file: &Path,
        _log_file: &Path,
        scan_only: bool,
    ) -> RemoteResult<LoadFlags> {
        record(
            &self.journal,
            format!("load_member_lists {} scan={}", member_list_file.display(), scan_only),
        );
        Ok(self.flags)
    }

    fn extract_member_lists(&self, member_list_file: &Path, _log_file: &Path) -> RemoteResult<()> {
        record(
            &self.journal,
            format!("extract_member_lists {}", member_list_file.display()),
        );
        Ok(())
    }
}

/// Serves a fixed five-byte file in one chunk
struct ScriptedTransfer {
    journal: Journal,
}

impl RemoteFileTransfer for ScriptedTransfer {
    fn file_size(&self, path: &str) -> RemoteResult<Option<u64>> {
        record(&self.journal, format!("file_size {}", path));
        Ok(Some(5))
    }

    fn begin_transfer(&self, path: &str) -> RemoteResult<TransferHandle> {
        record(&self.journal, format!("begin_transfer {}", path));
        Ok(TransferHandle(1))
    }

    fn send_next_chunk(&self, _handle: TransferHandle) -> RemoteResult<Chunk> {
        Ok(Chunk {
            bytes: b"hello".to_vec(),
            end_of_stream: true,
        })
    }

    fn end_transfer(&self, _handle: TransferHandle) -> RemoteResult<()> {
        record(&self.journal, "end_transfer".to_string());
        Ok(())
    }

    fn delete(&self, path: &str) -> RemoteResult<()> {
        record(&self.journal, format!("delete {}", path));
        Ok(())
    }
}
