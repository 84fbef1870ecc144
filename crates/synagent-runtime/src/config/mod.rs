//! YAML-based configuration loading and validation for the agent (§6).

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config_from_file, load_config_from_str};
pub use schema::{AgentConfig, PrintPluginLogs, PrometheusConfig, StorageConfig};
pub use validation::validate_config;
