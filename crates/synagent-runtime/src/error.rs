//! Runtime-level error types for the bootstrap sequence.
//!
//! Configuration errors live in [`crate::config::ConfigError`]; this module
//! only wraps them for bootstrap.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while the agent is bootstrapping (§4.8), before the
/// reconciler's main loop starts. All of these are fatal: bootstrap has no
/// supervisor to hand a degraded state to yet, so the caller exits.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("required environment variable {0} is not set")]
    MissingEnvVar(&'static str),

    #[error("failed to read pod label file {path}: {source}")]
    LabelFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "this agent's pod is not labeled for discovery ({label}=true required in {path})"
    )]
    NotDiscoverable { label: &'static str, path: PathBuf },
}

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;
