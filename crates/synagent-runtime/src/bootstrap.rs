//! Startup sequence: load config, resolve this agent's runtime identity, and
//! validate everything needed before the reconciler's main loop can start
//! (§4.8).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use synagent_core::AgentIdentity;

use crate::config::{AgentConfig, PrintPluginLogs, load_config_from_file};
use crate::error::BootstrapError;

/// Label a pod must carry, set to `"true"`, for this agent to consider
/// itself eligible for discovery.
const DISCOVERY_LABEL: &str = "synagent.io/discover";

/// Everything resolved during bootstrap, handed to the reconciler.
pub struct Bootstrap {
    /// The loaded and validated configuration.
    pub config: AgentConfig,
    /// This agent's id: `AGENT_ID` env var, or `pod-name/namespace` if unset.
    pub agent_id: String,
    /// This agent's selector-relevant identity (namespace, node, pod labels).
    pub identity: AgentIdentity,
    /// Normalised plugin-log echo verbosity.
    pub print_plugin_logs: PrintPluginLogs,
}

impl Bootstrap {
    /// Runs the full startup sequence: load `config_path`, resolve identity
    /// from the environment and the pod label file, and validate the
    /// discovery label. Any failure here is fatal (§7): there is no partial
    /// agent identity to run with.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, BootstrapError> {
        let config = load_config_from_file(config_path)?;

        let node_name = required_env("NODE_NAME")?;
        let pod_name = required_env("POD_NAME")?;
        let namespace = required_env("NAMESPACE")?;
        let agent_id = std::env::var("AGENT_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("{pod_name}/{namespace}"));

        let label_path = PathBuf::from(&config.label_file_location);
        let pod_labels = read_label_file(&label_path)?;

        if pod_labels.get(DISCOVERY_LABEL).map(String::as_str) != Some("true") {
            return Err(BootstrapError::NotDiscoverable {
                label: DISCOVERY_LABEL,
                path: label_path,
            });
        }

        let print_plugin_logs = PrintPluginLogs::parse_or_default(&config.print_plugin_logs);

        Ok(Self {
            config,
            agent_id,
            identity: AgentIdentity {
                namespace,
                node_name,
                pod_labels,
            },
            print_plugin_logs,
        })
    }
}

fn required_env(name: &'static str) -> Result<String, BootstrapError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(BootstrapError::MissingEnvVar(name))
}

/// Parses the pod-info label file: one `key=value` per line, blank lines
/// ignored, lines without exactly one `=` skipped with a warning.
fn read_label_file(path: &Path) -> Result<HashMap<String, String>, BootstrapError> {
    let content = std::fs::read_to_string(path).map_err(|source| BootstrapError::LabelFile {
        path: path.to_path_buf(),
        source,
    })?;

    let mut labels = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((k, v)) if !k.is_empty() => {
                labels.insert(k.to_string(), v.to_string());
            }
            _ => warn!(line, "skipping malformed pod label line"),
        }
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_well_formed_label_file() {
        let file = tempfile_with(
            "synagent.io/discover=true\nzone=us-east-1\n\nrack=r12\n",
        );
        let labels = read_label_file(file.path()).unwrap();
        assert_eq!(labels.get(DISCOVERY_LABEL).unwrap(), "true");
        assert_eq!(labels.get("zone").unwrap(), "us-east-1");
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn skips_malformed_lines() {
        let file = tempfile_with("no-equals-sign\n=missing-key\nzone=us-east-1\n");
        let labels = read_label_file(file.path()).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("zone").unwrap(), "us-east-1");
    }

    fn tempfile_with(content: &str) -> NamedLabelFile {
        let path = std::env::temp_dir().join(format!(
            "synagent-bootstrap-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        NamedLabelFile { path }
    }

    struct NamedLabelFile {
        path: PathBuf,
    }

    impl NamedLabelFile {
        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for NamedLabelFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
