//! Command completion status
//!
//! Remote operations such as a rules load report errors and warnings as
//! flags rather than failing the call. Command bodies translate those into a
//! [`CommandResult`]; the orchestrator inspects the status explicitly.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    SuccessWithWarnings,
    Failure,
}

/// Status of a finished command body plus its messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    status: CommandStatus,
    messages: Vec<String>,
}

impl CommandResult {
    pub fn success() -> Self {
        Self {
            status: CommandStatus::Success,
            messages: Vec::new(),
        }
    }

    /// Attach an informational message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Record a warning; downgrades Success to SuccessWithWarnings
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        if self.status == CommandStatus::Success {
            self.status = CommandStatus::SuccessWithWarnings;
        }
        self.messages.push(warning.into());
        self
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failure,
            messages: vec![message.into()],
        }
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_downgrades_success() {
        let result = CommandResult::success().with_warning("check log");
        assert_eq!(result.status(), CommandStatus::SuccessWithWarnings);
        assert_eq!(result.messages(), ["check log".to_string()]);
    }

    #[test]
    fn test_warning_does_not_upgrade_failure() {
        let result = CommandResult::failure("errors in load").with_warning("and warnings");
        assert_eq!(result.status(), CommandStatus::Failure);
        assert_eq!(result.messages().len(), 2);
    }
}
