//! [`ExtStorageHandler`] backed by etcd (§6: key layout).
//!
//! Key prefixes:
//! - `synagent/agent-status/{agent-id}` → JSON [`AgentStatusSnapshot`]
//! - `synagent/test-run/{plugin-id}/{unix-nanos}` → JSON [`TestResult`]
//! - `synagent/test-config/{name}` → JSON `{version, config}`
//! - `synagent/events` (prefix) → opaque presence markers, watched for
//!   config-change signals

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use etcd_client::{Client, DeleteOptions, GetOptions, WatchOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use synagent_core::{
    AgentStatusSnapshot, ConfigChanged, ExtStorageHandler, PluginId, StoreError, SynTestConfig,
    TestResult,
};

const AGENT_STATUS_PREFIX: &str = "synagent/agent-status/";
const TEST_RUN_PREFIX: &str = "synagent/test-run/";
const TEST_CONFIG_PREFIX: &str = "synagent/test-config/";
const EVENTS_PREFIX: &str = "synagent/events";

#[derive(Serialize, Deserialize)]
struct StoredTestConfig {
    version: String,
    config: SynTestConfig,
}

/// Production [`ExtStorageHandler`], talking to etcd over gRPC.
///
/// The client handles connection retries internally; this handler only maps
/// calls onto key reads/writes and surfaces transport failures as
/// [`StoreError::Unreachable`]. A background task drives the config-events
/// watch and forwards [`ConfigChanged`] signals to subscribers; it is spawned
/// on [`EtcdStorageHandler::connect`] and lives for the handler's lifetime.
pub struct EtcdStorageHandler {
    client: Client,
}

impl EtcdStorageHandler {
    /// Connects to the given etcd endpoints. Does not start the config-event
    /// watch; call [`Self::subscribe_to_config_events`] for that.
    pub async fn connect(endpoints: &[String]) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| StoreError::Unreachable(format!("etcd connect failed: {e}")))?;
        Ok(Self { client })
    }

    fn test_config_key(name: &str) -> String {
        format!("{TEST_CONFIG_PREFIX}{name}")
    }

    fn agent_status_key(agent_id: &str) -> String {
        format!("{AGENT_STATUS_PREFIX}{agent_id}")
    }

    fn test_run_key(plugin_id: &PluginId) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("{TEST_RUN_PREFIX}{}/{nanos}", plugin_id.as_str())
    }
}

#[async_trait]
impl ExtStorageHandler for EtcdStorageHandler {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client
            .get("synagent/ping", None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unreachable(e.to_string()))
    }

    async fn fetch_all_test_config(&self) -> Result<HashMap<String, String>, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(TEST_CONFIG_PREFIX, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let mut versions = HashMap::new();
        for kv in resp.kvs() {
            let key = kv.key_str().map_err(|e| StoreError::Decode(e.to_string()))?;
            let name = key.strip_prefix(TEST_CONFIG_PREFIX).unwrap_or(key);
            let stored: StoredTestConfig = serde_json::from_slice(kv.value())
                .map_err(|e| StoreError::Decode(format!("test config {name}: {e}")))?;
            versions.insert(name.to_string(), stored.version);
        }
        Ok(versions)
    }

    async fn fetch_test_config(&self, name: &str) -> Result<SynTestConfig, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(Self::test_config_key(name), None)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let kv = resp
            .kvs()
            .first()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let stored: StoredTestConfig = serde_json::from_slice(kv.value())
            .map_err(|e| StoreError::Decode(format!("test config {name}: {e}")))?;
        Ok(stored.config)
    }

    async fn subscribe_to_config_events(
        &self,
        buffer: usize,
    ) -> Result<mpsc::Receiver<ConfigChanged>, StoreError> {
        let mut client = self.client.clone();
        let (_watcher, mut stream) = client
            .watch(EVENTS_PREFIX, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Unreachable(format!("watch setup failed: {e}")))?;

        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(async move {
            // Keep the watcher alive for the life of the forwarding task.
            let _watcher = _watcher;
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.events().is_empty() {
                            continue;
                        }
                        if tx.send(ConfigChanged).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("etcd config-event watch stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "etcd config-event watch error, stopping forwarder");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn new_agent_event(&self, agent_id: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let key = format!("{EVENTS_PREFIX}/{agent_id}/new");
        client
            .put(key, agent_id, None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::WriteRejected(e.to_string()))
    }

    async fn exiting_agent_event(&self, agent_id: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let key = format!("{EVENTS_PREFIX}/{agent_id}/exiting");
        client
            .put(key, agent_id, None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::WriteRejected(e.to_string()))
    }

    async fn delete_agent_status(&self, agent_id: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client
            .delete(Self::agent_status_key(agent_id), None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::WriteRejected(e.to_string()))
    }

    async fn write_test_run_info(
        &self,
        plugin_id: &PluginId,
        result: &TestResult,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(result)
            .map_err(|e| StoreError::Decode(format!("encoding test result: {e}")))?;
        let mut client = self.client.clone();
        client
            .put(Self::test_run_key(plugin_id), payload, None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::WriteRejected(e.to_string()))
    }

    async fn delete_all_test_run_info(&self, plugin_id: &PluginId) -> Result<(), StoreError> {
        let prefix = format!("{TEST_RUN_PREFIX}{}/", plugin_id.as_str());
        let mut client = self.client.clone();
        client
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
            .map(|_| ())
            .map_err(|e| StoreError::WriteRejected(e.to_string()))
    }

    async fn write_agent_status(
        &self,
        agent_id: &str,
        snapshot: &AgentStatusSnapshot,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(snapshot)
            .map_err(|e| StoreError::Decode(format!("encoding agent status: {e}")))?;
        let mut client = self.client.clone();
        client
            .put(Self::agent_status_key(agent_id), payload, None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::WriteRejected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_key_includes_plugin_and_prefix() {
        let plugin_id = PluginId::new("agent-1", "ping-test");
        let key = EtcdStorageHandler::test_run_key(&plugin_id);
        assert!(key.starts_with(TEST_RUN_PREFIX));
        assert!(key.contains("agent-1/ping-test"));
    }

    #[test]
    fn test_config_key_matches_prefix_layout() {
        assert_eq!(EtcdStorageHandler::test_config_key("ping"), "synagent/test-config/ping");
    }

    #[test]
    fn agent_status_key_matches_prefix_layout() {
        assert_eq!(
            EtcdStorageHandler::agent_status_key("agent-1"),
            "synagent/agent-status/agent-1"
        );
    }
}
