//! Domain error types for the worker runtime
//!
//! Call errors are local to one outstanding call and never reach the
//! dispatcher. Lifecycle errors during create are fatal; during destroy they
//! are reported after every step has run.

use courier_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

use crate::lifecycle::LifecycleHook;

/// Errors surfaced to the caller of a correlated call
#[derive(Debug, Error)]
pub enum CallError {
    /// No reply arrived within the effective timeout
    #[error("timeout {}ms: {destination}:{event}", .timeout.as_millis())]
    Timeout {
        /// Effective timeout of the call
        timeout: Duration,
        /// Destination identity the call was sent to
        destination: String,
        /// Event name of the call
        event: String,
    },

    /// The peer replied with an error message
    #[error("{0}")]
    Remote(String),

    /// The call envelope could not be transmitted
    #[error("Failed to transmit call: {0}")]
    Transport(#[from] TransportError),

    /// The outstanding-call bound is reached
    #[error("Too many pending calls (limit {limit})")]
    TooManyPending {
        /// Configured bound
        limit: usize,
    },

    /// The runtime stopped serving before a reply arrived
    #[error("Runtime closed before the call completed")]
    Closed,
}

impl CallError {
    /// True for [`CallError::Timeout`]
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }
}

/// Failure reported by an event handler
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by a host hook or listener
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    /// Create a host error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors from the create/destroy phases
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Host initialization failed during create
    #[error("Initialization failed: {0}")]
    Initialize(#[source] HostError),

    /// Starting the listener failed during create
    #[error("Listen failed: {0}")]
    Listen(#[source] HostError),

    /// A lifecycle hook failed
    #[error("Hook {hook} failed: {source}")]
    Hook {
        /// Hook that failed
        hook: LifecycleHook,
        /// Host-reported failure
        #[source]
        source: HostError,
    },

    /// Closing the listener failed during destroy
    #[error("Listener close failed: {0}")]
    Close(#[source] HostError),

    /// `create` was called twice
    #[error("Worker already created")]
    AlreadyCreated,

    /// `destroy` was called without a successful `create`
    #[error("Worker not created")]
    NotCreated,
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;
