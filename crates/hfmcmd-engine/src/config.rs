//! Client configuration
//!
//! Loaded from a TOML file with three tables, all optional:
//!
//! ```toml
//! [connection]
//! cluster = "hfmprod"
//! application = "Demo"
//! user = "admin"
//! password = "..."          # or HFMCMD_PASSWORD
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 500
//!
//! [server]
//! root = "/srv/hfm/working"
//! chunk_size = 32768
//! ```

use crate::context::ConnectionSettings;
use hfmcmd_core::invoker::{ResilientInvoker, RetryPolicy, RetrySettings};
use hfmcmd_core::{HfmError, Result};
use hfmcmd_core_types::Sensitive;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `connection.password`
pub const PASSWORD_ENV: &str = "HFMCMD_PASSWORD";

pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub retry: RetrySettings,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub cluster: String,
    pub application: String,
    pub user: String,
    pub password: Sensitive<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Working folder served by the loopback backend
    pub root: Option<PathBuf>,
    pub chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load from `path`, or defaults when no path is given
    ///
    /// # Errors
    ///
    /// An explicitly named file that cannot be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| HfmError::io(path, e))?;
                Self::from_toml_str(&text).map_err(|err| HfmError::Config {
                    message: format!("{}: {}", path.display(), err),
                })?
            }
            None => Self::default(),
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// # Errors
    ///
    /// Returns a `Config` error for malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(text).map_err(|e| HfmError::Config {
            message: e.to_string(),
        })?;
        if config.server.chunk_size == 0 {
            return Err(HfmError::Config {
                message: "server.chunk_size must be greater than zero".to_string(),
            });
        }
        Ok(config)
    }

    /// Apply environment overrides, looked up through `lookup`
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.connection.password = Sensitive::new(password);
        }
        self
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            cluster: self.connection.cluster.clone(),
            application: self.connection.application.clone(),
            user: self.connection.user.clone(),
            password: self.connection.password.clone(),
        }
    }

    pub fn invoker(&self) -> ResilientInvoker {
        ResilientInvoker::new(RetryPolicy::from(self.retry.clone()))
    }
}
