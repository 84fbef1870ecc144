//! Entry point for the synthetic-test agent.
//!
//! Wires `Bootstrap::load()` into a concrete store, plugin factory, and
//! metrics exporter, then hands everything to `Reconciler::start`. Full
//! flag/subcommand parsing is out of scope (§1): the only argument accepted
//! is an optional config file path, defaulting to `/etc/synagent/config.yaml`.
//!
//! Startup failures bubble up through `anyhow::Result`; everything after
//! startup runs under the reconciler's own fatal-condition handling instead.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use synagent_core::{Broadcaster, ExtStorageHandler, StateMap};
use synagent_runtime::config::PrintPluginLogs;
use synagent_runtime::fatal::FatalFlag;
use synagent_runtime::reconciler::{ExporterHandle, Reconciler};
use synagent_runtime::{Bootstrap, logging};
use synagent_transport::{
    ChildProcessPluginFactory, EtcdStorageHandler, InMemoryStorageHandler, PluginLogPolicy,
};

const DEFAULT_CONFIG_PATH: &str = "/etc/synagent/config.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let (reconciler, root, fatal_flag) = match startup(&config_path).await {
        Ok(parts) => parts,
        Err(e) => {
            // Startup errors can occur before logging is initialised (e.g. a
            // missing config file), so they're reported directly rather than
            // relying on `tracing`.
            eprintln!("fatal: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let reconciler_task = tokio::spawn(reconciler.start());

    tokio::select! {
        _ = wait_for_shutdown() => {
            info!("shutdown signal received");
            root.cancel();
        }
        _ = root.cancelled() => {
            // A fatal condition inside the reconciler cancelled `root` itself.
        }
    }

    if let Err(e) = reconciler_task.await {
        error!(error = %e, "reconciler task panicked");
        return ExitCode::FAILURE;
    }

    if fatal_flag.is_set() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Runs bootstrap, wires up the concrete store/plugin-factory/exporter, and
/// returns a ready-to-run [`Reconciler`] plus the handles `main` needs to
/// drive shutdown and the process exit code.
async fn startup(
    config_path: &str,
) -> anyhow::Result<(Reconciler, tokio_util::sync::CancellationToken, FatalFlag)> {
    let bootstrap = Bootstrap::load(config_path).context("bootstrap failed")?;

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if bootstrap.config.debug_mode {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    });
    logging::init(&log_level);
    info!(agent_id = %bootstrap.agent_id, config_path, "synagent starting");

    let root = tokio_util::sync::CancellationToken::new();
    let fatal_flag = FatalFlag::new();

    let store: Arc<dyn ExtStorageHandler> = if bootstrap.config.storage.endpoints.is_empty() {
        warn!("no storage.endpoints configured, falling back to an in-memory store");
        Arc::new(InMemoryStorageHandler::new())
    } else {
        Arc::new(
            EtcdStorageHandler::connect(&bootstrap.config.storage.endpoints)
                .await
                .context("initial store contact failed")?,
        )
    };
    store.ping().await.context("initial store ping failed")?;

    let state_map = StateMap::new();
    let broadcaster = Broadcaster::default();

    let log_policy = match bootstrap.print_plugin_logs {
        PrintPluginLogs::Never => PluginLogPolicy::Never,
        PrintPluginLogs::OnFail => PluginLogPolicy::OnFail,
        PrintPluginLogs::Always => PluginLogPolicy::Always,
    };
    let plugin_factory = Arc::new(ChildProcessPluginFactory::new(
        &bootstrap.config.plugins_dir,
        log_policy,
    ));

    let exporter = match bootstrap.config.prometheus.server_address.as_deref() {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("invalid prometheus.serverAddress {addr:?}"))?;
            let parts = synagent_transport::serve_metrics(addr, broadcaster.clone(), state_map.clone())
                .await
                .context("metrics exporter failed to start")?;
            ExporterHandle {
                config_changed_tx: parts.config_changed_tx,
                cancellation: parts.cancellation,
                join: parts.join,
            }
        }
        None => disabled_exporter(),
    };

    let reconciler = Reconciler::new(
        bootstrap.agent_id.clone(),
        bootstrap.identity,
        bootstrap.config.watch_own_namespace_only,
        bootstrap.config.sync_frequency,
        bootstrap.config.grace_period,
        store,
        state_map,
        broadcaster,
        plugin_factory,
        exporter,
        root.clone(),
        fatal_flag.clone(),
    );

    Ok((reconciler, root, fatal_flag))
}

/// A no-op exporter handle for when `prometheus.serverAddress` is unset
/// (§6: "Absence of serverAddress disables the endpoint").
fn disabled_exporter() -> ExporterHandle {
    let cancellation = tokio_util::sync::CancellationToken::new();
    let (config_changed_tx, _rx) = tokio::sync::mpsc::channel(1);
    ExporterHandle {
        config_changed_tx,
        cancellation,
        join: tokio::spawn(async {}),
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
