//! Prometheus metrics exporter (§4.4).
//!
//! Subscribes to the [`Broadcaster`] and exposes two metric families over an
//! HTTP `GET /metrics` endpoint: `test_runs_total{plugin_id,outcome}` (a
//! running counter) and `test_last_result{plugin_id}` (1 = last run passed, 0
//! = failed). A config-changed signal triggers label cleanup for plugin-ids
//! no longer tracked by the state map, so deleted tests stop being exported.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use synagent_core::{Broadcaster, Outcome, StateMap};

/// The pieces a reconciler needs to control a running exporter: a
/// best-effort "config changed" signal, a cancellation token to stop it, and
/// a join handle to await during shutdown. Kept separate from any concrete
/// reconciler type so `synagent-transport` has no dependency on
/// `synagent-runtime`.
pub struct ExporterHandleParts {
    pub config_changed_tx: mpsc::Sender<()>,
    pub cancellation: CancellationToken,
    pub join: JoinHandle<()>,
}

/// Errors that can prevent the exporter from starting.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),
    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

struct Metrics {
    registry: Registry,
    test_runs_total: IntCounterVec,
    test_last_result: IntGaugeVec,
}

impl Metrics {
    fn new() -> Result<Self, ExporterError> {
        let registry = Registry::new();

        let test_runs_total = IntCounterVec::new(
            Opts::new("test_runs_total", "Total synthetic test runs observed"),
            &["plugin_id", "outcome"],
        )?;
        let test_last_result = IntGaugeVec::new(
            Opts::new(
                "test_last_result",
                "1 if the last observed run for this plugin passed, 0 if it failed",
            ),
            &["plugin_id"],
        )?;

        registry.register(Box::new(test_runs_total.clone()))?;
        registry.register(Box::new(test_last_result.clone()))?;

        Ok(Self {
            registry,
            test_runs_total,
            test_last_result,
        })
    }

    fn record(&self, plugin_id: &str, outcome: Outcome) {
        let outcome_label = match outcome {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
        };
        self.test_runs_total
            .with_label_values(&[plugin_id, outcome_label])
            .inc();
        self.test_last_result
            .with_label_values(&[plugin_id])
            .set(matches!(outcome, Outcome::Pass) as i64);
    }

    /// Drops label series for plugin-ids no longer present in `active`.
    fn prune(&self, active: &std::collections::HashSet<String>, previously_seen: &std::collections::HashSet<String>) {
        for stale in previously_seen.difference(active) {
            for outcome_label in ["pass", "fail"] {
                let _ = self
                    .test_runs_total
                    .remove_label_values(&[stale, outcome_label]);
            }
            let _ = self.test_last_result.remove_label_values(&[stale]);
        }
    }

    fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<Arc<Metrics>>,
) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics.gather_text(),
    )
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Starts the exporter: binds `addr`, subscribes to `broadcaster`, and runs
/// until `cancellation` fires. Returns the pieces the reconciler needs
/// (config-changed sender, cancellation token, join handle) bundled as an
/// [`ExporterHandleParts`], or an error if the metrics registry or listener
/// could not be created — both of which are fatal per the design (§4.4: "On
/// exporter creation failure, the agent exits fatally").
pub async fn serve(
    addr: SocketAddr,
    broadcaster: Broadcaster,
    state_map: StateMap,
) -> Result<ExporterHandleParts, ExporterError> {
    let metrics = Arc::new(Metrics::new()?);
    let cancellation = CancellationToken::new();
    let (config_changed_tx, config_changed_rx) = mpsc::channel(4);

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ExporterError::Bind { addr, source })?;

    info!(%addr, "prometheus exporter listening");

    let server_cancellation = cancellation.clone();
    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app.into_make_service());
        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!(error = %e, "metrics HTTP server error");
                }
            }
            _ = server_cancellation.cancelled() => {
                debug!("metrics HTTP server shutting down");
            }
        }
    });

    let feed_cancellation = cancellation.clone();
    let feed_task = tokio::spawn(run_feed(
        metrics,
        broadcaster,
        state_map,
        config_changed_rx,
        feed_cancellation,
    ));

    let join = tokio::spawn(async move {
        let _ = server_task.await;
        let _ = feed_task.await;
    });

    Ok(ExporterHandleParts {
        config_changed_tx,
        cancellation,
        join,
    })
}

async fn run_feed(
    metrics: Arc<Metrics>,
    broadcaster: Broadcaster,
    state_map: StateMap,
    mut config_changed_rx: mpsc::Receiver<()>,
    cancellation: CancellationToken,
) {
    let (sub_id, mut results) = broadcaster.subscribe().await;
    let seen: Mutex<std::collections::HashSet<String>> = Mutex::new(std::collections::HashSet::new());

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            result = results.recv() => {
                match result {
                    Some(result) => {
                        let plugin_id = result.plugin_id.as_str().to_string();
                        metrics.record(&plugin_id, result.outcome);
                        seen.lock().await.insert(plugin_id);
                    }
                    None => break,
                }
            }
            signal = config_changed_rx.recv() => {
                if signal.is_none() {
                    break;
                }
                let active: std::collections::HashSet<String> = state_map
                    .snapshot()
                    .await
                    .keys()
                    .map(|id| id.as_str().to_string())
                    .collect();
                let mut seen_guard = seen.lock().await;
                metrics.prune(&active, &seen_guard);
                *seen_guard = active;
                debug!("prometheus exporter pruned stale label series");
            }
        }
    }

    broadcaster.unsubscribe(sub_id).await;
}
