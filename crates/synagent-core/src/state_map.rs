//! Process-wide mapping from plugin-id to plugin state.
//!
//! A `tokio::sync::RwLock`-guarded map, multi-reader/single-writer-per-key,
//! with no blocking semantics beyond the lock itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::{PluginId, PluginState};

/// Thread-safe map from plugin-id to its current [`PluginState`].
///
/// Per §3, writes for a given plugin-id are totally ordered because only that
/// plugin-id's supervisor ever calls `set`/`delete` for it; this type does not
/// itself enforce single-writer-per-key, it just provides safe concurrent
/// access to whichever caller does.
#[derive(Debug, Clone, Default)]
pub struct StateMap {
    inner: Arc<RwLock<HashMap<PluginId, PluginState>>>,
}

impl StateMap {
    /// Creates an empty state map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the state for `id`, if present.
    pub async fn get(&self, id: &PluginId) -> Option<PluginState> {
        self.inner.read().await.get(id).cloned()
    }

    /// Inserts or overwrites the state for `id`.
    pub async fn set(&self, id: PluginId, state: PluginState) {
        self.inner.write().await.insert(id, state);
    }

    /// Removes the state for `id`, if present.
    pub async fn delete(&self, id: &PluginId) {
        self.inner.write().await.remove(id);
    }

    /// Returns a consistent shallow copy of the whole map.
    pub async fn snapshot(&self) -> HashMap<PluginId, PluginState> {
        self.inner.read().await.clone()
    }

    /// Number of tracked plugin-ids.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the map currently has no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PluginStatus, SynTestConfig};

    fn sample_config() -> SynTestConfig {
        SynTestConfig {
            name: "ping".into(),
            plugin_name: "ping-plugin".into(),
            namespace: "default".into(),
            node_selector: String::new(),
            pod_label_selector: Default::default(),
            plugin_restart_policy: "Always".into(),
            runtime: Default::default(),
        }
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let map = StateMap::new();
        let id = PluginId::new("agent-1", "ping");
        assert!(map.get(&id).await.is_none());

        map.set(id.clone(), PluginState::initial(sample_config()))
            .await;
        let state = map.get(&id).await.unwrap();
        assert_eq!(state.status, PluginStatus::Unknown);

        map.delete(&id).await;
        assert!(map.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn snapshot_is_independent_copy() {
        let map = StateMap::new();
        let id = PluginId::new("agent-1", "ping");
        map.set(id.clone(), PluginState::initial(sample_config()))
            .await;

        let snap = map.snapshot().await;
        map.delete(&id).await;

        assert_eq!(snap.len(), 1);
        assert_eq!(map.len().await, 0);
    }
}
