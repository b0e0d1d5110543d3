//! Resilient invocation of remote calls
//!
//! Every call into the remote automation surface goes through
//! [`ResilientInvoker::invoke`]. A failure is classified by the
//! [`RetryPolicy`]: transient failures are retried with growing backoff up
//! to the attempt limit, anything else aborts at once. The final failure is
//! wrapped in [`HfmError::RemoteCall`] carrying the caller's description and
//! the raw [`RemoteFailure`].

use crate::errors::{HfmError, RemoteFailure, Result};
use crate::{log_op_end, log_op_error, log_op_start};
use hfmcmd_core_types::schema::EVENT_RETRY;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Operation name used in the invoker's log events
pub const OP_REMOTE_CALL: &str = "remote_call";

/// Well-known COM/RPC status codes that signal a busy or briefly unreachable server
pub mod codes {
    /// RPC_E_CALL_REJECTED
    pub const CALL_REJECTED: u32 = 0x8001_0001;
    /// RPC_E_SERVERCALL_RETRYLATER
    pub const SERVER_CALL_RETRY_LATER: u32 = 0x8001_010A;
    /// RPC_E_DISCONNECTED
    pub const DISCONNECTED: u32 = 0x8001_0108;
    /// RPC_S_SERVER_UNAVAILABLE as HRESULT
    pub const SERVER_UNAVAILABLE: u32 = 0x8007_06BA;
    /// RPC_S_CALL_FAILED as HRESULT
    pub const CALL_FAILED: u32 = 0x8007_06BE;
}

/// How a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry after a backoff
    Transient,
    /// Abort immediately
    Fatal,
}

/// What a classification rule matches on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignature {
    /// Exact status code
    Code(u32),
    /// Case-insensitive substring of the failure message
    MessageContains(String),
}

impl FailureSignature {
    fn matches(&self, failure: &RemoteFailure) -> bool {
        match self {
            FailureSignature::Code(code) => failure.code() == Some(*code),
            FailureSignature::MessageContains(needle) => failure
                .message()
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase()),
        }
    }
}

/// Retry classification table plus attempt limit and backoff shape
///
/// Rules are consulted in order; the first match wins. Failures matching no
/// rule are fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    backoff_multiplier: f64,
    max_backoff: Duration,
    rules: Vec<(FailureSignature, FailureClass)>,
}

impl RetryPolicy {
    /// A policy with no classification rules (every failure is fatal)
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
            rules: Vec::new(),
        }
    }

    pub fn with_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.backoff_multiplier = multiplier.max(1.0);
        self.max_backoff = max;
        self
    }

    /// Append a classification rule
    pub fn classify_as(mut self, signature: FailureSignature, class: FailureClass) -> Self {
        self.rules.push((signature, class));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn classify(&self, failure: &RemoteFailure) -> FailureClass {
        self.rules
            .iter()
            .find(|(signature, _)| signature.matches(failure))
            .map(|(_, class)| *class)
            .unwrap_or(FailureClass::Fatal)
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let nanos = self.initial_backoff.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = nanos.min(self.max_backoff.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

/// Retry policy as it appears in the `[retry]` table of the client configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Extra status codes to treat as transient
    pub transient_codes: Vec<u32>,
    /// Extra message fragments to treat as transient
    pub transient_messages: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            transient_codes: Vec::new(),
            transient_messages: Vec::new(),
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        let builtin_codes = [
            codes::CALL_REJECTED,
            codes::SERVER_CALL_RETRY_LATER,
            codes::DISCONNECTED,
            codes::SERVER_UNAVAILABLE,
            codes::CALL_FAILED,
        ];
        let builtin_messages = ["busy", "try again later"];

        let mut policy = RetryPolicy::new(settings.max_attempts).with_backoff(
            Duration::from_millis(settings.initial_backoff_ms),
            settings.backoff_multiplier,
            Duration::from_millis(settings.max_backoff_ms),
        );
        for code in builtin_codes.into_iter().chain(settings.transient_codes) {
            policy = policy.classify_as(FailureSignature::Code(code), FailureClass::Transient);
        }
        for message in builtin_messages
            .into_iter()
            .map(str::to_string)
            .chain(settings.transient_messages)
        {
            policy = policy.classify_as(
                FailureSignature::MessageContains(message),
                FailureClass::Transient,
            );
        }
        policy
    }
}

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Single choke point for remote calls
///
/// Cheap to clone; context objects keep a clone so their release paths
/// go through the same policy.
#[derive(Clone)]
pub struct ResilientInvoker {
    policy: Arc<RetryPolicy>,
    sleep: Sleeper,
}

impl fmt::Debug for ResilientInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientInvoker")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResilientInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            sleep: Arc::new(std::thread::sleep),
        }
    }

    /// Replace how backoff delays are waited out
    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Arc::new(sleep);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work`, retrying transient failures per the policy
    ///
    /// `description` says what is being attempted ("Loading rules",
    /// "Deleting file x.gz") and ends up in the log and in the error.
    pub fn invoke<T, F>(&self, description: &str, mut work: F) -> Result<T>
    where
        F: FnMut() -> std::result::Result<T, RemoteFailure>,
    {
        let start = Instant::now();
        log_op_start!(OP_REMOTE_CALL, description = description);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match work() {
                Ok(value) => {
                    log_op_end!(
                        OP_REMOTE_CALL,
                        duration_ms = start.elapsed().as_millis() as u64,
                        description = description,
                        attempt = attempt,
                    );
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let class = self.policy.classify(&failure);
            if class == FailureClass::Transient && attempt < self.policy.max_attempts {
                let delay = self.policy.backoff(attempt);
                tracing::warn!(
                    component = module_path!(),
                    op = OP_REMOTE_CALL,
                    event = EVENT_RETRY,
                    description = description,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    failure = %failure,
                );
                (self.sleep)(delay);
                continue;
            }

            let err = HfmError::RemoteCall {
                description: description.to_string(),
                attempts: attempt,
                cause: failure,
            };
            log_op_error!(
                OP_REMOTE_CALL,
                err,
                duration_ms = start.elapsed().as_millis() as u64,
                description = description,
                transient = class == FailureClass::Transient,
            );
            return Err(err);
        }
    }
}

impl Default for ResilientInvoker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_failure_is_fatal() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.classify(&RemoteFailure::new("Invalid application")),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_default_table_knows_busy_codes_and_messages() {
        let policy = RetryPolicy::default();

        let busy = RemoteFailure::new("call rejected").with_code(codes::CALL_REJECTED);
        assert_eq!(policy.classify(&busy), FailureClass::Transient);

        let by_message = RemoteFailure::new("Server is BUSY processing another request");
        assert_eq!(policy.classify(&by_message), FailureClass::Transient);

        let denied = RemoteFailure::new("Access is denied").with_code(0x8007_0005);
        assert_eq!(policy.classify(&denied), FailureClass::Fatal);
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy::new(10).with_backoff(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(500),
        );

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }

    #[test]
    fn test_settings_add_extra_rules() {
        let settings = RetrySettings {
            transient_codes: vec![0x8004_0001],
            transient_messages: vec!["deadlock".to_string()],
            ..RetrySettings::default()
        };
        let policy = RetryPolicy::from(settings);

        assert_eq!(
            policy.classify(&RemoteFailure::new("x").with_code(0x8004_0001)),
            FailureClass::Transient
        );
        assert_eq!(
            policy.classify(&RemoteFailure::new("Deadlock victim")),
            FailureClass::Transient
        );
    }
}
