//! Error types shared across courier crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type for channel operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised by a channel implementation
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel has been closed by either side
    #[error("Channel closed")]
    Closed,

    /// Underlying I/O failed
    #[error("Channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded
    #[error("Malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    /// The peer side of the channel refused the envelope
    #[error("Peer error: {0}")]
    Peer(String),
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// Path that was being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for [`crate::WorkerConfig`]
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range
    #[error("Invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
