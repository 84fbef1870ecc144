//! Logging setup built on `tracing` + `tracing-subscriber`.
//!
//! No Tower middleware whose span lifecycle needs separate visibility here,
//! so there is no span-events knob — just a level, driven by `LOG_LEVEL` and
//! the config file's `debugMode`.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initializes the global tracing subscriber.
///
/// `level` is the minimum severity (one of trace/debug/info/warn/error,
/// case-insensitive); anything else falls back to `info`. `RUST_LOG`, if set,
/// takes precedence over `level`.
pub fn init(level: &str) {
    let directive = normalize_level(level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Like [`init`] but never panics if a subscriber is already installed
/// (useful for tests that call it repeatedly across threads).
pub fn try_init(level: &str) {
    let directive = normalize_level(level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

fn normalize_level(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}
