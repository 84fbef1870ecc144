//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::AgentConfig;

/// Validates the entire configuration.
///
/// `printPluginLogs` is deliberately not checked here: an unrecognised value
/// is normalised by `Bootstrap` (`PrintPluginLogs::parse_or_default`)
/// rather than failing config load, the same non-fatal treatment
/// `pluginRestartPolicy` gets from `RestartPolicy::parse_or_default`.
pub fn validate_config(config: &AgentConfig) -> ConfigResult<()> {
    if config.sync_frequency.is_zero() {
        return Err(ConfigError::NonPositiveDuration {
            field: "syncFrequency",
        });
    }
    if config.grace_period.is_zero() {
        return Err(ConfigError::NonPositiveDuration {
            field: "gracePeriod",
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&AgentConfig::default()).is_ok());
    }

    #[test]
    fn rejects_zero_grace_period() {
        let mut config = AgentConfig::default();
        config.grace_period = std::time::Duration::ZERO;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::NonPositiveDuration { field: "gracePeriod" })
        ));
    }

    #[test]
    fn unrecognised_print_plugin_logs_does_not_fail_validation() {
        let mut config = AgentConfig::default();
        config.print_plugin_logs = "sometimes".into();
        assert!(validate_config(&config).is_ok());
    }
}
