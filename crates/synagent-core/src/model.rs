//! Core data types shared by every component of the agent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// Deterministic identifier for a supervised plugin run: `agent-id + "/" + test-name`.
///
/// Unique across the fleet for a given (agent, test) pair. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginId(String);

impl PluginId {
    /// Builds a plugin id from an agent id and a test name.
    pub fn new(agent_id: &str, test_name: &str) -> Self {
        Self(format!("{agent_id}/{test_name}"))
    }

    /// Returns the id as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a supervisor reacts once `Plugin::run` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RestartPolicy {
    /// Always restart, whether the run succeeded or errored.
    Always,
    /// Restart only when the run returned an error.
    OnError,
    /// Never restart; the supervisor terminates after one run.
    Never,
}

impl RestartPolicy {
    /// Parses a policy string, falling back to `Always` for anything
    /// unrecognised (including the empty string) per the restart-policy
    /// defaulting rule.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw {
            "OnError" => Self::OnError,
            "Never" => Self::Never,
            "" | "Always" => Self::Always,
            _ => Self::Always,
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::Always
    }
}

/// A declarative test definition as received from the shared config store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynTestConfig {
    /// Test name, unique within a namespace.
    pub name: String,
    /// Name of the plugin binary to invoke for this test.
    pub plugin_name: String,
    /// Namespace the test belongs to.
    pub namespace: String,
    /// Shell-glob pattern matched against this agent's node name. Empty matches any node.
    #[serde(default)]
    pub node_selector: String,
    /// Labels that must all be present (with equal value) on this agent's pod.
    #[serde(default)]
    pub pod_label_selector: HashMap<String, String>,
    /// Restart policy string as received from the store (validated/defaulted by
    /// [`RestartPolicy::parse_or_default`]).
    #[serde(default)]
    pub plugin_restart_policy: String,
    /// Free-form runtime map the agent injects identity fields into before
    /// handing the config to the plugin.
    #[serde(default)]
    pub runtime: HashMap<String, String>,
}

impl SynTestConfig {
    /// Resolves this config's restart policy, applying defaulting rules.
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::parse_or_default(&self.plugin_restart_policy)
    }
}

/// Lifecycle status of a supervised plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginStatus {
    /// No run has started yet, or the supervisor has not reported status.
    Unknown,
    /// The plugin's `run` call is currently executing.
    Running,
    /// The plugin exited and the supervisor is waiting out its backoff delay.
    RestartBackOff,
    /// The plugin exited and the restart policy says not to restart.
    NotRunning,
    /// The plugin exited with an error and the restart policy is `Never`.
    Error,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Running => "Running",
            Self::RestartBackOff => "RestartBackOff",
            Self::NotRunning => "NotRunning",
            Self::Error => "Error",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of a supervised plugin's state, owned by the [`StateMap`](crate::state_map::StateMap)
/// and written only by that plugin's own supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginState {
    /// Current lifecycle status.
    pub status: PluginStatus,
    /// Human-readable message for the current status (cleared on entry to `Running`).
    pub status_message: String,
    /// The status message that was active before the last transition.
    pub previous_status_message: String,
    /// Restarts since the last time `restarts` was reset (long-run reset, see §4.5).
    pub restarts_in_current_run: u32,
    /// Restarts across the entire lifetime of this plugin-id. Monotonically non-decreasing.
    pub total_restarts: u64,
    /// Timestamp of the most recent entry into `Running`.
    pub running_since: Option<SystemTime>,
    /// Snapshot of the config currently driving this plugin.
    pub config: SynTestConfig,
}

impl PluginState {
    /// Creates the initial state for a freshly started plugin-id.
    pub fn initial(config: SynTestConfig) -> Self {
        Self {
            status: PluginStatus::Unknown,
            status_message: String::new(),
            previous_status_message: String::new(),
            restarts_in_current_run: 0,
            total_restarts: 0,
            running_since: None,
            config,
        }
    }
}

/// Pass/fail outcome of one plugin run iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The test iteration passed.
    Pass,
    /// The test iteration failed.
    Fail,
}

/// A single test-run result flowing from a plugin through the broadcaster.
///
/// The broadcaster treats `details` as opaque; only the store writer and any
/// other subscriber interpret its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Which plugin produced this result.
    pub plugin_id: PluginId,
    /// When the result was produced.
    pub timestamp: SystemTime,
    /// Pass/fail outcome.
    pub outcome: Outcome,
    /// Free-form payload describing the result.
    pub details: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_id_format() {
        let id = PluginId::new("agent-1", "ping-test");
        assert_eq!(id.as_str(), "agent-1/ping-test");
    }

    #[test]
    fn restart_policy_defaults_to_always() {
        assert_eq!(RestartPolicy::parse_or_default(""), RestartPolicy::Always);
        assert_eq!(
            RestartPolicy::parse_or_default("bogus"),
            RestartPolicy::Always
        );
        assert_eq!(
            RestartPolicy::parse_or_default("OnError"),
            RestartPolicy::OnError
        );
        assert_eq!(RestartPolicy::parse_or_default("Never"), RestartPolicy::Never);
    }
}
