//! # Courier Core
//!
//! Shared vocabulary for a worker process talking to its supervisor over a
//! single duplex channel.
//!
//! - [`Envelope`]: one unit of channel traffic (`to`, `action`, `body`)
//! - [`CallId`], [`CallRequest`], [`ReplyOutcome`]: request/reply wire bodies
//! - [`control`]: reserved control actions and their payloads
//! - [`WorkerConfig`]: runtime configuration loaded from TOML
//! - [`TransportError`]: failures reported by channel implementations

pub mod call;
pub mod config;
pub mod control;
pub mod envelope;
pub mod error;

pub use call::{CallId, CallRequest, ReplyOutcome};
pub use config::{StartArgs, WorkerConfig, DEFAULT_CALL_TIMEOUT};
pub use control::{PluginAnnouncement, CLUSTER_READY_ACTION, PLUGINS_ACTION};
pub use envelope::Envelope;
pub use error::{ConfigError, TransportError, TransportResult};
