//! # synagent-runtime
//!
//! Orchestration layer for the synthetic-test agent: configuration loading
//! and validation, startup identity resolution ([`bootstrap`]), the
//! per-plugin restart state machine ([`supervisor`]), and the top-level
//! reconcile loop ([`reconciler`]) that ties them together with the
//! primitives from `synagent-core`.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod fatal;
pub mod logging;
pub mod reconciler;
pub mod supervisor;

pub use bootstrap::Bootstrap;
pub use config::{AgentConfig, ConfigError, ConfigResult, PrintPluginLogs, StorageConfig};
pub use error::{BootstrapError, BootstrapResult};
pub use reconciler::{ExporterHandle, Reconciler};
pub use supervisor::PluginSupervisor;

// Re-exported so downstream crates only need to depend on one tracing stack.
pub use tracing;
pub use tracing_subscriber;

/// Convenience re-exports for the `synagent` binary crate.
pub mod prelude {
    pub use crate::bootstrap::Bootstrap;
    pub use crate::config::AgentConfig;
    pub use crate::config::ConfigError;
    pub use crate::error::BootstrapError;
    pub use crate::reconciler::{ExporterHandle, Reconciler};
    pub use crate::supervisor::PluginSupervisor;
    pub use tracing::{debug, error, info, warn};
}
