//! Reserved control actions
//!
//! Two action strings are reserved for system signaling and never reach the
//! event bus.

use serde::{Deserialize, Serialize};

/// A peer announces the capabilities (plugins) it provides
pub const PLUGINS_ACTION: &str = "agent:plugins";

/// The supervisor reports that the whole cluster is up
pub const CLUSTER_READY_ACTION: &str = "cluster:ready";

/// Body of a [`PLUGINS_ACTION`] envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAnnouncement {
    /// Identity of the announcing peer
    pub name: String,
    /// Capability names offered by the peer
    #[serde(default)]
    pub plugins: Vec<String>,
}
