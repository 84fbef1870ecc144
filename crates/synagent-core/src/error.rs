//! Error types shared by the core crate.

use thiserror::Error;

/// Errors that can occur while evaluating whether a test applies to this agent.
#[derive(Debug, Clone, Error)]
pub enum SelectorError {
    /// The configured node-selector glob could not be parsed.
    #[error("invalid node selector glob '{pattern}': {reason}")]
    InvalidGlob {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors surfaced by [`crate::plugin::Plugin::run`] implementations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin process exited with a non-zero status.
    #[error("plugin exited with status {0}")]
    ExitStatus(i32),
    /// The plugin could not be launched at all.
    #[error("failed to launch plugin: {0}")]
    Launch(String),
    /// The plugin's output could not be parsed.
    #[error("failed to parse plugin output: {0}")]
    Protocol(String),
    /// The run was cancelled before the plugin reported a result.
    #[error("plugin run cancelled")]
    Cancelled,
}

/// Errors surfaced by [`crate::storage::ExtStorageHandler`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached at all.
    #[error("store unreachable: {0}")]
    Unreachable(String),
    /// A requested key was not present.
    #[error("not found: {0}")]
    NotFound(String),
    /// The stored value could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The store rejected the write.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}
