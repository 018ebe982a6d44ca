//! Plugin Capability Registry
//!
//! Maps each capability name to the ordered set of peers providing it.
//! Entries are only ever added: providers are stable for the life of the
//! process and there is no deregistration message.

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

/// Capability name to provider identities, both in first-seen order
#[derive(Debug, Default)]
pub struct PluginRegistry {
    providers: RwLock<IndexMap<String, IndexSet<String>>>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `provider` for each capability
    ///
    /// Idempotent per (capability, provider) pair. Returns how many pairs
    /// were newly recorded.
    pub fn register<I, S>(&self, provider: &str, capabilities: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut providers = self.providers.write();
        let mut added = 0;
        for capability in capabilities {
            let set = providers.entry(capability.into()).or_default();
            if set.insert(provider.to_string()) {
                added += 1;
            }
        }
        tracing::debug!(provider, added, "plugin capabilities registered");
        added
    }

    /// Providers of `capability`, in registration order
    pub fn providers(&self, capability: &str) -> Vec<String> {
        self.providers
            .read()
            .get(capability)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `provider` offers `capability`
    pub fn has_provider(&self, capability: &str, provider: &str) -> bool {
        self.providers
            .read()
            .get(capability)
            .is_some_and(|set| set.contains(provider))
    }

    /// Known capability names, in first-seen order
    pub fn capabilities(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    /// Copy of the whole registry
    pub fn snapshot(&self) -> IndexMap<String, Vec<String>> {
        self.providers
            .read()
            .iter()
            .map(|(cap, set)| (cap.clone(), set.iter().cloned().collect()))
            .collect()
    }
}
