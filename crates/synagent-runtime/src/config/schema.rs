//! Configuration schema for the agent's YAML config file (§6).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How verbosely the agent echoes plugin stdout/stderr to its own logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PrintPluginLogs {
    /// Only print plugin logs when the run ended in an error.
    OnFail,
    /// Never print plugin logs.
    #[default]
    Never,
    /// Always print plugin logs.
    Always,
}

impl PrintPluginLogs {
    /// Normalises the raw string, falling back to `Never` for anything
    /// unrecognised (including the empty string) — the same non-fatal
    /// defaulting as `synagent_core::RestartPolicy::parse_or_default`, not a
    /// config-load-time error.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw {
            "onFail" => Self::OnFail,
            "always" => Self::Always,
            _ => Self::Never,
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Address the metrics HTTP endpoint binds to, e.g. `"0.0.0.0:9090"`.
    /// Absent/empty disables the endpoint entirely.
    pub server_address: Option<String>,
}

/// External-store connection settings. Deliberately a bag of strings: the
/// concrete shape is implementation-specific (§4.3); `synagent-transport`'s
/// etcd-backed handler reads `endpoints` and `key_prefix` from it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Store endpoint URLs.
    pub endpoints: Vec<String>,
    /// Key prefix all of this agent's store keys are namespaced under.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "synagent".to_string()
}

/// Root configuration structure, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    /// If true, only tests in this agent's own namespace are considered.
    pub watch_own_namespace_only: bool,
    /// Path to the pod-info label file.
    #[serde(default = "default_label_file_location")]
    pub label_file_location: String,
    /// How often the reconciler re-syncs against the store even without an event.
    #[serde(with = "humantime_serde", default = "default_sync_frequency")]
    pub sync_frequency: Duration,
    /// Shutdown delay that lets in-flight results drain.
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: Duration,
    /// Prometheus exporter settings.
    pub prometheus: PrometheusConfig,
    /// External-store connection settings.
    pub storage: StorageConfig,
    /// Plugin log echo verbosity, as a raw string (validated/normalised by Bootstrap).
    #[serde(default = "default_print_plugin_logs")]
    pub print_plugin_logs: String,
    /// Enables verbose / debug-level logging.
    pub debug_mode: bool,
    /// Directory plugin binaries are resolved from (joined with `pluginName`).
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: String,
}

fn default_label_file_location() -> String {
    "/etc/podinfo/labels".to_string()
}

fn default_sync_frequency() -> Duration {
    Duration::from_secs(60)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_print_plugin_logs() -> String {
    "never".to_string()
}

fn default_plugins_dir() -> String {
    "/opt/synagent/plugins".to_string()
}
