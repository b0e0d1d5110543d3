use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias using HfmError
pub type Result<T> = std::result::Result<T, HfmError>;

// ========== Remote Failure ==========

/// Raw failure raised by the remote automation surface
///
/// Carries the status code the surface reported (HRESULT style) when there
/// is one, and its message text. The retry policy classifies failures by
/// these two fields; the normalized error keeps both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    code: Option<u32>,
    message: String,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn code(&self) -> Option<u32> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:#010X}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteFailure {}

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable code used in execution reports and in the
/// `err.code` log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    // Configuration (startup)
    DuplicateCommand,
    UnresolvedDependency,
    DependencyCycle,
    UnknownContext,

    // Validation (per command)
    MissingParameter,
    UnknownParameter,
    TypeMismatch,
    DuplicateArgument,
    TooManyArguments,

    // Lookup
    NotFound,

    // Remote
    RemoteFailure,
    ContextConstruction,
    TransferFailed,

    // Command outcome
    CommandFailed,

    // Integration
    Io,
    Config,
    Internal,
}

impl ErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::DuplicateCommand => "ERR_DUPLICATE_COMMAND",
            ErrorKind::UnresolvedDependency => "ERR_UNRESOLVED_DEPENDENCY",
            ErrorKind::DependencyCycle => "ERR_DEPENDENCY_CYCLE",
            ErrorKind::UnknownContext => "ERR_UNKNOWN_CONTEXT",
            ErrorKind::MissingParameter => "ERR_MISSING_PARAMETER",
            ErrorKind::UnknownParameter => "ERR_UNKNOWN_PARAMETER",
            ErrorKind::TypeMismatch => "ERR_TYPE_MISMATCH",
            ErrorKind::DuplicateArgument => "ERR_DUPLICATE_ARGUMENT",
            ErrorKind::TooManyArguments => "ERR_TOO_MANY_ARGUMENTS",
            ErrorKind::NotFound => "ERR_NOT_FOUND",
            ErrorKind::RemoteFailure => "ERR_REMOTE_FAILURE",
            ErrorKind::ContextConstruction => "ERR_CONTEXT_CONSTRUCTION",
            ErrorKind::TransferFailed => "ERR_TRANSFER_FAILED",
            ErrorKind::CommandFailed => "ERR_COMMAND_FAILED",
            ErrorKind::Io => "ERR_IO",
            ErrorKind::Config => "ERR_CONFIG",
            ErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Configuration errors are detected at startup and abort before any command runs
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ErrorKind::DuplicateCommand
                | ErrorKind::UnresolvedDependency
                | ErrorKind::DependencyCycle
                | ErrorKind::Config
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::MissingParameter
                | ErrorKind::UnknownParameter
                | ErrorKind::TypeMismatch
                | ErrorKind::DuplicateArgument
                | ErrorKind::TooManyArguments
        )
    }
}

/// Normalized error record
///
/// What the orchestrator keeps for a failed command: the classification,
/// the command and remote operation it happened in, a human message and the
/// full cause chain of the original failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedError {
    kind: ErrorKind,
    command: Option<String>,
    op: Option<String>,
    message: String,
    causes: Vec<String>,
    remote_code: Option<u32>,
}

impl NormalizedError {
    /// Create a new error with the specified kind
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            command: None,
            op: None,
            message: String::new(),
            causes: Vec::new(),
            remote_code: None,
        }
    }

    /// Add the originating command name
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Add operation context (what was being attempted)
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Append a cause to the chain
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn with_remote_code(mut self, code: u32) -> Self {
        self.remote_code = Some(code);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Cause chain of the original failure, outermost first
    pub fn causes(&self) -> &[String] {
        &self.causes
    }

    pub fn remote_code(&self) -> Option<u32> {
        self.remote_code
    }
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(command) = &self.command {
            write!(f, " in command '{}'", command)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for NormalizedError {}

// ========== End Error Facility ==========

/// Error taxonomy for hfmcmd operations
#[derive(Error, Debug)]
pub enum HfmError {
    // ===== Configuration Errors =====
    /// A command with this name is already in the catalog
    #[error("Command already registered: {name}")]
    DuplicateCommand { name: String },

    /// A factory or command depends on a context type nothing can construct
    #[error("No factory registered for context {context} (required by {required_by})")]
    UnresolvedDependency {
        context: &'static str,
        required_by: String,
    },

    /// The factory graph contains a cycle
    #[error("Dependency cycle among context factories: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<&'static str> },

    /// A context object was requested that the run has not constructed
    #[error("Context {context} is not available in this run")]
    UnknownContext { context: &'static str },

    // ===== Validation Errors =====
    #[error("Missing required parameter '{parameter}'")]
    MissingParameter { parameter: String },

    #[error("Unknown parameter '{parameter}'")]
    UnknownParameter { parameter: String },

    #[error("Parameter '{parameter}' expects {expected}, got '{value}'")]
    TypeMismatch {
        parameter: String,
        expected: String,
        value: String,
    },

    #[error("Parameter '{parameter}' was supplied both by position and by name")]
    DuplicateArgument { parameter: String },

    #[error("{supplied} positional argument(s) supplied but only {accepted} accepted")]
    TooManyArguments { supplied: usize, accepted: usize },

    // ===== Lookup =====
    #[error("Command not found: {name}")]
    CommandNotFound { name: String },

    // ===== Remote Errors =====
    /// Final failure of a remote call (fatal classification or retries exhausted)
    #[error("{description} failed after {attempts} attempt(s): {cause}")]
    RemoteCall {
        description: String,
        attempts: u32,
        #[source]
        cause: RemoteFailure,
    },

    /// A factory failed while building a context object
    #[error("Failed to construct {context}: {source}")]
    ContextConstruction {
        context: &'static str,
        source: Box<HfmError>,
    },

    /// Unrecoverable error while streaming a file
    #[error("Transfer of {source_path} failed after {bytes_written} byte(s) written: {source}")]
    Transfer {
        source_path: String,
        bytes_written: u64,
        source: Box<HfmError>,
    },

    // ===== Command Outcome =====
    /// The command body reported a Failure status
    #[error("{}", .messages.join("; "))]
    CommandFailed { messages: Vec<String> },

    // ===== Generic Errors =====
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HfmError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        HfmError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HfmError::DuplicateCommand { .. } => ErrorKind::DuplicateCommand,
            HfmError::UnresolvedDependency { .. } => ErrorKind::UnresolvedDependency,
            HfmError::DependencyCycle { .. } => ErrorKind::DependencyCycle,
            HfmError::UnknownContext { .. } => ErrorKind::UnknownContext,
            HfmError::MissingParameter { .. } => ErrorKind::MissingParameter,
            HfmError::UnknownParameter { .. } => ErrorKind::UnknownParameter,
            HfmError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            HfmError::DuplicateArgument { .. } => ErrorKind::DuplicateArgument,
            HfmError::TooManyArguments { .. } => ErrorKind::TooManyArguments,
            HfmError::CommandNotFound { .. } => ErrorKind::NotFound,
            HfmError::RemoteCall { .. } => ErrorKind::RemoteFailure,
            HfmError::ContextConstruction { .. } => ErrorKind::ContextConstruction,
            HfmError::Transfer { .. } => ErrorKind::TransferFailed,
            HfmError::CommandFailed { .. } => ErrorKind::CommandFailed,
            HfmError::Io { .. } => ErrorKind::Io,
            HfmError::Config { .. } => ErrorKind::Config,
            HfmError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// The raw remote failure at the bottom of this error, if any
    pub fn remote_failure(&self) -> Option<&RemoteFailure> {
        match self {
            HfmError::RemoteCall { cause, .. } => Some(cause),
            HfmError::ContextConstruction { source, .. } | HfmError::Transfer { source, .. } => {
                source.remote_failure()
            }
            _ => None,
        }
    }

    /// Description of the remote operation that failed, if any
    pub fn remote_description(&self) -> Option<&str> {
        match self {
            HfmError::RemoteCall { description, .. } => Some(description),
            HfmError::ContextConstruction { source, .. } | HfmError::Transfer { source, .. } => {
                source.remote_description()
            }
            _ => None,
        }
    }
}

/// Conversion from HfmError to the normalized record
///
/// The message is the top-level display text; the cause chain is walked via
/// `std::error::Error::source` so nothing from the original failure is lost.
impl From<HfmError> for NormalizedError {
    fn from(err: HfmError) -> Self {
        NormalizedError::from(&err)
    }
}

impl From<&HfmError> for NormalizedError {
    fn from(err: &HfmError) -> Self {
        let mut normalized = NormalizedError::new(err.kind()).with_message(err.to_string());
        if let Some(description) = err.remote_description() {
            normalized = normalized.with_op(description);
        }
        if let Some(code) = err.remote_failure().and_then(RemoteFailure::code) {
            normalized = normalized.with_remote_code(code);
        }
        let mut cause = std::error::Error::source(err);
        while let Some(inner) = cause {
            normalized = normalized.with_cause(inner.to_string());
            cause = inner.source();
        }
        normalized
    }
}
