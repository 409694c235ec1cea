//! Engine Configuration
//!
//! Settings for the ledger and execution context, loadable from YAML.
//!
//! # Example YAML Format
//!
//! ```yaml
//! database_path: data/durable.db
//! workflow_id: onboarding-42
//! zombie_timeout_ms: 5000
//! busy_timeout_ms: 5000
//! retry:
//!   attempts: 5
//!   delay_ms: 100
//! ```
//!
//! Every field is optional; missing fields take the defaults shown above
//! (`durable.db` and `wf-001` for the path and workflow id).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DurableError;
use crate::execution::ExecutionContext;
use crate::ledger::{LedgerOptions, RetryPolicy, SqliteLedger};

/// Default database file.
pub const DEFAULT_DATABASE_PATH: &str = "durable.db";

/// Default workflow identity.
pub const DEFAULT_WORKFLOW_ID: &str = "wf-001";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Ledger and execution settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// SQLite database holding the step ledger
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Identity of the workflow run, stable across restarts
    #[serde(default = "default_workflow_id")]
    pub workflow_id: String,

    /// Age after which an in-progress step is considered abandoned
    #[serde(default = "default_timeout_ms")]
    pub zombie_timeout_ms: u64,

    /// SQLite busy timeout applied to every connection
    #[serde(default = "default_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Retry policy for contended ledger writes
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_PATH)
}

fn default_workflow_id() -> String {
    DEFAULT_WORKFLOW_ID.to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            workflow_id: default_workflow_id(),
            zombie_timeout_ms: default_timeout_ms(),
            busy_timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Loads and validates a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading config: {}", path.display());

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content)
    }

    /// Parses and validates YAML config content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults"
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };

        config.validate()?;
        debug!("Config: {:?}", config);
        Ok(config)
    }

    /// Checks field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workflow_id.trim().is_empty() {
            return Err(ConfigError::Invalid("workflow_id must not be empty".to_string()));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database_path must not be empty".to_string()));
        }

        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry.attempts must be at least 1".to_string()));
        }

        Ok(())
    }

    pub fn zombie_timeout(&self) -> Duration {
        Duration::from_millis(self.zombie_timeout_ms)
    }

    pub fn ledger_options(&self) -> LedgerOptions {
        LedgerOptions {
            retry: self.retry,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    /// Opens the configured SQLite ledger.
    pub fn open_ledger(&self) -> Result<SqliteLedger, DurableError> {
        SqliteLedger::open_with(&self.database_path, self.ledger_options())
    }

    /// Creates an execution context for the configured workflow over `ledger`.
    pub fn context(&self, ledger: Arc<SqliteLedger>) -> ExecutionContext {
        ExecutionContext::new(self.workflow_id.clone(), ledger)
            .with_zombie_timeout(self.zombie_timeout())
    }
}
