//! Worker Configuration
//!
//! Loaded from TOML. Process-start arguments (`cwd`, `service`) are merged in
//! at create time and take precedence over file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Fallback call timeout when neither the caller nor the config sets one
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(3000);

/// Runtime configuration for one worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Default call timeout in milliseconds
    pub agent_timeout: Option<u64>,

    /// Upper bound on outstanding calls; unbounded when unset
    pub max_pending_calls: Option<usize>,

    /// Working directory of the service
    pub cwd: Option<PathBuf>,

    /// Service name
    pub service: Option<String>,

    /// Address the worker's listener binds to
    pub listen: Option<String>,
}

/// Arguments the worker process was started with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartArgs {
    /// Working directory of the service
    pub cwd: Option<PathBuf>,
    /// Service name
    pub service: Option<String>,
}

impl WorkerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded worker config");
        Ok(config)
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_timeout == Some(0) {
            return Err(ConfigError::Invalid {
                field: "agent_timeout",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_pending_calls == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_pending_calls",
                reason: "must be greater than zero; omit it for no limit".into(),
            });
        }
        Ok(())
    }

    /// Copy process-start arguments into the config
    ///
    /// Arguments that were not given leave the file values in place.
    pub fn merge_start_args(&mut self, args: &StartArgs) {
        if let Some(cwd) = &args.cwd {
            self.cwd = Some(cwd.clone());
        }
        if let Some(service) = &args.service {
            self.service = Some(service.clone());
        }
    }

    /// Resolve the timeout for one call
    ///
    /// Explicit argument, then `agent_timeout`, then [`DEFAULT_CALL_TIMEOUT`].
    pub fn call_timeout(&self, explicit: Option<Duration>) -> Duration {
        explicit
            .or_else(|| self.agent_timeout.map(Duration::from_millis))
            .unwrap_or(DEFAULT_CALL_TIMEOUT)
    }
}
