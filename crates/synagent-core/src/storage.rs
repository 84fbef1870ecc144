//! Contract for the external key-value / pub-sub store the agent depends on.
//!
//! Implementations live in `synagent-transport` (an etcd-backed handler for
//! production use, an in-memory handler for tests and bootstrap smoke tests).
//! This crate only defines the trait.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::model::{PluginId, PluginState, SynTestConfig, TestResult};

/// An advisory signal that something in the store's config namespace changed.
/// Payload content is unused beyond triggering a diff.
#[derive(Debug, Clone, Copy)]
pub struct ConfigChanged;

/// A versioned mapping of agent state, handed to the store as this agent's
/// current status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusSnapshot {
    /// All plugin states currently tracked by this agent.
    pub plugins: HashMap<PluginId, PluginState>,
}

/// The external store's operations, as consumed by the reconciler and
/// supervisors. Object-safe via `async_trait` so it can be held as
/// `Arc<dyn ExtStorageHandler>`.
#[async_trait]
pub trait ExtStorageHandler: Send + Sync {
    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Cheap, version-only listing of all known test configs: test-name -> version.
    async fn fetch_all_test_config(&self) -> Result<HashMap<String, String>, StoreError>;

    /// Fetches the full config for a single named test.
    async fn fetch_test_config(&self, name: &str) -> Result<SynTestConfig, StoreError>;

    /// Subscribes to config-change events. Signals are advisory; the channel
    /// has small buffering and drops on overflow (callers must tolerate
    /// missed signals and rely on the periodic tick for forward progress).
    async fn subscribe_to_config_events(
        &self,
        buffer: usize,
    ) -> Result<mpsc::Receiver<ConfigChanged>, StoreError>;

    /// Publishes a "new agent" presence event.
    async fn new_agent_event(&self, agent_id: &str) -> Result<(), StoreError>;

    /// Publishes an "exiting" presence event.
    async fn exiting_agent_event(&self, agent_id: &str) -> Result<(), StoreError>;

    /// Deletes the agent-status record for `agent_id`.
    async fn delete_agent_status(&self, agent_id: &str) -> Result<(), StoreError>;

    /// Persists one test-run result.
    async fn write_test_run_info(
        &self,
        plugin_id: &PluginId,
        result: &TestResult,
    ) -> Result<(), StoreError>;

    /// Deletes all persisted run history for a plugin-id (called on test deletion).
    async fn delete_all_test_run_info(&self, plugin_id: &PluginId) -> Result<(), StoreError>;

    /// Publishes a full state snapshot as this agent's status.
    async fn write_agent_status(
        &self,
        agent_id: &str,
        snapshot: &AgentStatusSnapshot,
    ) -> Result<(), StoreError>;
}
