//! In-memory [`ExtStorageHandler`] for tests and local bootstrap smoke tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use synagent_core::{
    AgentStatusSnapshot, ConfigChanged, ExtStorageHandler, PluginId, StoreError, SynTestConfig,
    TestResult,
};

struct VersionedConfig {
    version: String,
    config: SynTestConfig,
}

/// A fully in-process store backing test doubles: no network, no
/// persistence across process restarts. Config-change signals are fanned
/// out to every live subscriber by [`InMemoryStorageHandler::set_config`] /
/// [`InMemoryStorageHandler::remove_config`].
#[derive(Default)]
pub struct InMemoryStorageHandler {
    configs: RwLock<HashMap<String, VersionedConfig>>,
    config_event_subscribers: RwLock<Vec<mpsc::Sender<ConfigChanged>>>,
    run_info: RwLock<HashMap<PluginId, Vec<TestResult>>>,
    agent_status: RwLock<HashMap<String, AgentStatusSnapshot>>,
    reachable: std::sync::atomic::AtomicBool,
}

impl InMemoryStorageHandler {
    pub fn new() -> Self {
        Self {
            reachable: std::sync::atomic::AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Sets whether [`ExtStorageHandler::ping`] (and every other call)
    /// should succeed. Used to exercise the agent's fatal-exit path in tests.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable
            .store(reachable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.reachable.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unreachable("in-memory store marked unreachable for test".into()))
        }
    }

    /// Inserts or updates a test config at `version`, notifying subscribers.
    pub async fn set_config(&self, name: &str, version: &str, config: SynTestConfig) {
        self.configs.write().await.insert(
            name.to_string(),
            VersionedConfig {
                version: version.to_string(),
                config,
            },
        );
        self.notify_config_changed().await;
    }

    /// Removes a test config, notifying subscribers.
    pub async fn remove_config(&self, name: &str) {
        self.configs.write().await.remove(name);
        self.notify_config_changed().await;
    }

    async fn notify_config_changed(&self) {
        let subscribers = self.config_event_subscribers.read().await;
        for tx in subscribers.iter() {
            let _ = tx.try_send(ConfigChanged);
        }
    }
}

#[async_trait]
impl ExtStorageHandler for InMemoryStorageHandler {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_reachable()
    }

    async fn fetch_all_test_config(&self) -> Result<HashMap<String, String>, StoreError> {
        self.check_reachable()?;
        Ok(self
            .configs
            .read()
            .await
            .iter()
            .map(|(name, vc)| (name.clone(), vc.version.clone()))
            .collect())
    }

    async fn fetch_test_config(&self, name: &str) -> Result<SynTestConfig, StoreError> {
        self.check_reachable()?;
        self.configs
            .read()
            .await
            .get(name)
            .map(|vc| vc.config.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn subscribe_to_config_events(
        &self,
        buffer: usize,
    ) -> Result<mpsc::Receiver<ConfigChanged>, StoreError> {
        self.check_reachable()?;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.config_event_subscribers.write().await.push(tx);
        Ok(rx)
    }

    async fn new_agent_event(&self, _agent_id: &str) -> Result<(), StoreError> {
        self.check_reachable()
    }

    async fn exiting_agent_event(&self, _agent_id: &str) -> Result<(), StoreError> {
        self.check_reachable()
    }

    async fn delete_agent_status(&self, agent_id: &str) -> Result<(), StoreError> {
        self.check_reachable()?;
        self.agent_status.write().await.remove(agent_id);
        Ok(())
    }

    async fn write_test_run_info(
        &self,
        plugin_id: &PluginId,
        result: &TestResult,
    ) -> Result<(), StoreError> {
        self.check_reachable()?;
        self.run_info
            .write()
            .await
            .entry(plugin_id.clone())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn delete_all_test_run_info(&self, plugin_id: &PluginId) -> Result<(), StoreError> {
        self.check_reachable()?;
        self.run_info.write().await.remove(plugin_id);
        Ok(())
    }

    async fn write_agent_status(
        &self,
        agent_id: &str,
        snapshot: &AgentStatusSnapshot,
    ) -> Result<(), StoreError> {
        self.check_reachable()?;
        self.agent_status
            .write()
            .await
            .insert(agent_id.to_string(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synagent_core::Outcome;
    use std::time::SystemTime;

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
    async fn set_and_fetch_config_round_trips() {
        let store = InMemoryStorageHandler::new();
        store.set_config("ping", "v1", sample_config()).await;

        let versions = store.fetch_all_test_config().await.unwrap();
        assert_eq!(versions.get("ping").unwrap(), "v1");

        let config = store.fetch_test_config("ping").await.unwrap();
        assert_eq!(config.name, "ping");
    }

    #[tokio::test]
    async fn fetch_missing_config_is_not_found() {
        let store = InMemoryStorageHandler::new();
        assert!(matches!(
            store.fetch_test_config("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_store_fails_every_call() {
        let store = InMemoryStorageHandler::new();
        store.set_reachable(false);
        assert!(store.ping().await.is_err());
        assert!(store.fetch_all_test_config().await.is_err());
    }

    #[tokio::test]
    async fn config_change_notifies_subscribers() {
        let store = InMemoryStorageHandler::new();
        let mut rx = store.subscribe_to_config_events(4).await.unwrap();
        store.set_config("ping", "v1", sample_config()).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn write_and_delete_run_info() {
        let store = InMemoryStorageHandler::new();
        let plugin_id = PluginId::new("agent-1", "ping");
        let result = TestResult {
            plugin_id: plugin_id.clone(),
            timestamp: SystemTime::now(),
            outcome: Outcome::Pass,
            details: serde_json::Value::Null,
        };
        store.write_test_run_info(&plugin_id, &result).await.unwrap();
        store.delete_all_test_run_info(&plugin_id).await.unwrap();
    }
}
