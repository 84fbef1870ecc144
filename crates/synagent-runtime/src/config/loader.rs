//! Configuration file loader.

use std::path::Path;

use regex_lite::Regex;
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult};
use super::schema::AgentConfig;
use super::validation::validate_config;

/// Loads and validates configuration from a specific YAML file.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<AgentConfig> {
    let path = path.as_ref();
    info!(path = %path.display(), "loading agent configuration");

    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Loads and validates configuration from a YAML string, expanding
/// `${VAR}` / `${VAR:-default}` environment references first.
pub fn load_config_from_str(yaml: &str) -> ConfigResult<AgentConfig> {
    let expanded = expand_env_vars(yaml);
    let config: AgentConfig = serde_yaml::from_str(&expanded)?;
    validate_config(&config)?;
    debug!("configuration loaded and validated");
    Ok(config)
}

/// Expands environment variables in the format `${VAR_NAME}` or
/// `${VAR_NAME:-default}`.
fn expand_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(:-([^}]*))?\}").unwrap();
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let full_match = cap.get(0).unwrap().as_str();
        let var_name = cap.get(1).unwrap().as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = std::env::var(var_name)
            .ok()
            .or_else(|| default_value.map(String::from))
            .unwrap_or_default();

        result = result.replace(full_match, &value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_on_empty_yaml() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.sync_frequency.as_secs(), 60);
        assert_eq!(config.grace_period.as_secs(), 10);
        assert_eq!(config.print_plugin_logs, "never");
    }

    #[test]
    fn parses_durations_and_overrides() {
        let yaml = r#"
syncFrequency: 30s
gracePeriod: 5s
watchOwnNamespaceOnly: true
printPluginLogs: onFail
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.sync_frequency.as_secs(), 30);
        assert_eq!(config.grace_period.as_secs(), 5);
        assert!(config.watch_own_namespace_only);
        assert_eq!(config.print_plugin_logs, "onFail");
    }

    #[test]
    fn rejects_non_positive_durations() {
        let yaml = "syncFrequency: 0s\n";
        assert!(load_config_from_str(yaml).is_err());
    }

    #[test]
    fn env_var_expansion_with_default() {
        let yaml = "storage:\n  endpoints:\n    - \"${SYNAGENT_TEST_ENDPOINT:-http://localhost:2379}\"\n";
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.storage.endpoints[0], "http://localhost:2379");
    }
}
