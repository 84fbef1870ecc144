//! The agent's main loop: owns the running-supervisor set and converges it
//! toward the store's desired state (§4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use synagent_core::{
    AgentIdentity, Broadcaster, ExtStorageHandler, PluginFactory, PluginId, StateMap, TestResult,
};

use crate::fatal::{self, FatalFlag};
use crate::supervisor::PluginSupervisor;

/// Handle to a running Prometheus exporter task, owned by the reconciler so
/// it can signal config changes and join the task on shutdown. Constructed
/// by whatever wires up `synagent-transport`'s concrete exporter; the
/// reconciler only ever sees this handle, never the exporter itself.
pub struct ExporterHandle {
    /// Best-effort "something changed" signal; the exporter re-registers its
    /// metric families on receipt.
    pub config_changed_tx: mpsc::Sender<()>,
    /// Cancelled to ask the exporter's HTTP server to stop.
    pub cancellation: CancellationToken,
    /// Joined during shutdown, after cancellation.
    pub join: JoinHandle<()>,
}

struct SynTestRecord {
    plugin_id: PluginId,
    version: String,
    cancellation: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns the supervisor set and runs the startup / sync / shutdown sequence
/// described in §4.6. Consumed by [`Reconciler::start`].
pub struct Reconciler {
    agent_id: String,
    identity: AgentIdentity,
    watch_own_namespace_only: bool,
    sync_frequency: Duration,
    grace_period: Duration,
    jitter_max: Duration,
    store: Arc<dyn ExtStorageHandler>,
    state_map: StateMap,
    broadcaster: Broadcaster,
    plugin_factory: Arc<dyn PluginFactory>,
    exporter: ExporterHandle,
    root: CancellationToken,
    fatal_flag: FatalFlag,
    running: HashMap<String, SynTestRecord>,
}

impl Reconciler {
    /// Default upper bound for the per-sync desynchronisation jitter (§4.6:
    /// "on the order of a few seconds").
    pub const DEFAULT_JITTER_MAX: Duration = Duration::from_secs(3);

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: String,
        identity: AgentIdentity,
        watch_own_namespace_only: bool,
        sync_frequency: Duration,
        grace_period: Duration,
        store: Arc<dyn ExtStorageHandler>,
        state_map: StateMap,
        broadcaster: Broadcaster,
        plugin_factory: Arc<dyn PluginFactory>,
        exporter: ExporterHandle,
        root: CancellationToken,
        fatal_flag: FatalFlag,
    ) -> Self {
        Self {
            agent_id,
            identity,
            watch_own_namespace_only,
            sync_frequency,
            grace_period,
            jitter_max: Self::DEFAULT_JITTER_MAX,
            store,
            state_map,
            broadcaster,
            plugin_factory,
            exporter,
            root,
            fatal_flag,
            running: HashMap::new(),
        }
    }

    /// Runs the reconciler to completion: startup, main select loop, then
    /// graceful shutdown once `root` is cancelled or a fatal condition is
    /// hit. Returns only after every owned task has been joined.
    pub async fn start(mut self) {
        info!(agent_id = %self.agent_id, "reconciler starting");

        let mut config_events = match self.store.subscribe_to_config_events(32).await {
            Ok(rx) => rx,
            Err(e) => {
                fatal::trigger(&self.root, &self.fatal_flag, format!("failed to subscribe to config events: {e}"));
                return;
            }
        };

        let store_writer_cancel = self.root.child_token();
        let store_writer_handle = tokio::spawn(run_store_writer(
            self.store.clone(),
            self.broadcaster.clone(),
            self.state_map.clone(),
            self.agent_id.clone(),
            self.sync_frequency,
            store_writer_cancel.clone(),
            self.root.clone(),
            self.fatal_flag.clone(),
        ));

        if let Err(e) = self.store.new_agent_event(&self.agent_id).await {
            warn!(error = %e, "failed to publish new-agent presence event");
        }

        // Synthetic initial signal (§4.6 step 6): force a first sync before
        // entering the main select, rather than literally posting onto the
        // config-event channel.
        self.sync_once().await;

        let mut tick = tokio::time::interval(self.sync_frequency);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // the first tick fires immediately; we already synced above

        loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => {
                    info!("reconciler received shutdown signal");
                    break;
                }
                signal = config_events.recv() => {
                    match signal {
                        Some(_) => {
                            debug!("config-change signal received, syncing");
                            self.sync_once().await;
                        }
                        None => {
                            fatal::trigger(&self.root, &self.fatal_flag, "config event channel closed");
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    if let Err(e) = self.store.ping().await {
                        fatal::trigger(&self.root, &self.fatal_flag, format!("store ping failed: {e}"));
                        break;
                    }
                    self.sync_once().await;
                }
            }
        }

        self.shutdown_sequence(store_writer_cancel, store_writer_handle)
            .await;
    }

    /// One diff-and-apply cycle (§4.6 "On each sync trigger").
    async fn sync_once(&mut self) {
        let jitter = jitter_delay(self.jitter_max);
        tokio::select! {
            _ = tokio::time::sleep(jitter) => {}
            _ = self.root.cancelled() => return,
        }

        let versions = match self.store.fetch_all_test_config().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to fetch test-config version map, skipping this sync");
                return;
            }
        };

        let mut changed = false;

        let stale: Vec<String> = self
            .running
            .keys()
            .filter(|name| !versions.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            self.stop_and_delete(&name).await;
            changed = true;
        }

        for (name, version) in &versions {
            match self.running.get(name) {
                None => {
                    if self.start_if_selected(name, version).await {
                        changed = true;
                    }
                }
                Some(record) if &record.version != version => {
                    self.stop_and_delete(name).await;
                    if self.start_if_selected(name, version).await {
                        changed = true;
                    }
                }
                Some(_) => {}
            }
        }

        if changed {
            let _ = self.exporter.config_changed_tx.try_send(());
        }
    }

    /// Fetches the full config for `name`, applies the selector, and starts
    /// a supervisor if it matches. Returns whether a supervisor was started.
    ///
    /// Always checks against the freshly fetched config, both for a
    /// previously-unseen test and for a version bump: the alternative read
    /// (checking the selector against the stale in-memory record before
    /// replacing it) only makes sense if the selector depends on fields that
    /// never change across a version bump, which is not guaranteed, so this
    /// reconciler fetches first and evaluates the selector on what it just
    /// fetched.
    async fn start_if_selected(&mut self, name: &str, version: &str) -> bool {
        let config = match self.store.fetch_test_config(name).await {
            Ok(c) => c,
            Err(e) => {
                warn!(test = name, error = %e, "failed to fetch test config, skipping this cycle");
                return false;
            }
        };

        match synagent_core::applies(&config, &self.identity, self.watch_own_namespace_only) {
            Ok(true) => {}
            Ok(false) => {
                debug!(test = name, "selector rejected test for this agent");
                return false;
            }
            Err(e) => {
                warn!(test = name, error = %e, "selector evaluation failed, skipping this cycle");
                return false;
            }
        }

        let plugin_id = PluginId::new(&self.agent_id, name);
        let plugin = self.plugin_factory.create(&config.plugin_name);
        let cancellation = self.root.child_token();

        let supervisor = PluginSupervisor::new(
            plugin_id.clone(),
            config,
            plugin,
            self.state_map.clone(),
            self.broadcaster.clone(),
            cancellation.clone(),
        )
        .await;
        let join = tokio::spawn(supervisor.run());

        info!(test = name, version, plugin_id = %plugin_id, "started supervisor");
        self.running.insert(
            name.to_string(),
            SynTestRecord {
                plugin_id,
                version: version.to_string(),
                cancellation,
                join,
            },
        );
        true
    }

    async fn stop_and_delete(&mut self, name: &str) {
        let Some(record) = self.running.remove(name) else {
            return;
        };

        record.cancellation.cancel();
        let _ = record.join.await;
        self.state_map.delete(&record.plugin_id).await;

        let cleanup_timeout = Duration::from_secs(5);
        match tokio::time::timeout(
            cleanup_timeout,
            self.store.delete_all_test_run_info(&record.plugin_id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(plugin_id = %record.plugin_id, error = %e, "failed to delete test-run history"),
            Err(_) => warn!(plugin_id = %record.plugin_id, "timed out deleting test-run history during stop"),
        }

        info!(test = name, plugin_id = %record.plugin_id, "stopped and deleted supervisor");
    }

    /// §4.6 "Shutdown": wait for supervisors, drain the grace period, tear
    /// down the exporter, unregister from the store, then stop the
    /// ext-store writer and the broadcaster.
    async fn shutdown_sequence(
        mut self,
        store_writer_cancel: CancellationToken,
        store_writer_handle: JoinHandle<()>,
    ) {
        info!("waiting for {} supervisor(s) to complete", self.running.len());
        for (_, record) in self.running.drain() {
            record.cancellation.cancel();
            let _ = record.join.await;
        }

        tokio::time::sleep(self.grace_period).await;

        self.exporter.cancellation.cancel();
        let _ = self.exporter.join.await;

        let per_call_timeout = Duration::from_secs(5);
        if tokio::time::timeout(per_call_timeout, self.store.delete_agent_status(&self.agent_id))
            .await
            .is_err()
        {
            warn!("timed out deleting agent status on shutdown");
        }
        if tokio::time::timeout(per_call_timeout, self.store.exiting_agent_event(&self.agent_id))
            .await
            .is_err()
        {
            warn!("timed out publishing exiting event on shutdown");
        }

        store_writer_cancel.cancel();
        let _ = store_writer_handle.await;

        self.broadcaster.stop().await;

        info!("reconciler shutdown complete");
    }
}

/// Cheap pseudo-random jitter in `[0, max]`, seeded from the current time.
/// Only used to desynchronise fleets; not a security-relevant source of
/// randomness, so this reaches for `rand`'s thread-local generator rather
/// than anything heavier.
fn jitter_delay(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::random::<u64>() % (max.as_millis() as u64 + 1);
    Duration::from_millis(millis)
}

/// The store-writer task: subscribes to the broadcaster, persists every
/// result it sees, and periodically publishes a state-map snapshot as this
/// agent's status (§4.3). Runs until `cancellation` fires.
async fn run_store_writer(
    store: Arc<dyn ExtStorageHandler>,
    broadcaster: Broadcaster,
    state_map: StateMap,
    agent_id: String,
    sync_frequency: Duration,
    cancellation: CancellationToken,
    fatal_root: CancellationToken,
    fatal_flag: FatalFlag,
) {
    let (sub_id, mut results) = broadcaster.subscribe().await;

    let mut status_tick = tokio::time::interval(sync_frequency);
    status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            result = results.recv() => {
                match result {
                    Some(result) => persist_result(&store, &fatal_root, &fatal_flag, &result).await,
                    None => break,
                }
            }
            _ = status_tick.tick() => {
                publish_status(&store, &fatal_root, &fatal_flag, &state_map, &agent_id).await;
            }
        }
    }

    broadcaster.unsubscribe(sub_id).await;
}

async fn persist_result(
    store: &Arc<dyn ExtStorageHandler>,
    fatal_root: &CancellationToken,
    fatal_flag: &FatalFlag,
    result: &Arc<TestResult>,
) {
    if store.write_test_run_info(&result.plugin_id, result).await.is_ok() {
        return;
    }
    warn!(plugin_id = %result.plugin_id, "failed to persist test result, retrying once");
    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Err(e) = store.write_test_run_info(&result.plugin_id, result).await {
        warn!(plugin_id = %result.plugin_id, error = %e, "retry failed, dropping result");
        fatal::trigger(fatal_root, fatal_flag, format!("store write failed twice: {e}"));
    }
}

async fn publish_status(
    store: &Arc<dyn ExtStorageHandler>,
    fatal_root: &CancellationToken,
    fatal_flag: &FatalFlag,
    state_map: &StateMap,
    agent_id: &str,
) {
    let snapshot = synagent_core::AgentStatusSnapshot {
        plugins: state_map.snapshot().await,
    };
    if let Err(e) = store.write_agent_status(agent_id, &snapshot).await {
        warn!(error = %e, "failed to publish agent status, retrying once");
        tokio::time::sleep(Duration::from_millis(500)).await;
        if let Err(e) = store.write_agent_status(agent_id, &snapshot).await {
            warn!(error = %e, "retry failed");
            fatal::trigger(fatal_root, fatal_flag, format!("agent status write failed twice: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synagent_core::{Plugin, PluginRunContext, SynTestConfig};
    use synagent_transport::{ClosurePlugin, InMemoryStorageHandler};

    struct ClosureFactory;

    impl PluginFactory for ClosureFactory {
        fn create(&self, _plugin_name: &str) -> Arc<dyn Plugin> {
            Arc::new(ClosurePlugin::new(|_ctx: &PluginRunContext| Ok(())))
        }
    }

    fn test_identity() -> AgentIdentity {
        AgentIdentity {
            namespace: "default".into(),
            node_name: "node-a".into(),
            pod_labels: Default::default(),
        }
    }

    fn sample_config(namespace: &str) -> SynTestConfig {
        SynTestConfig {
            name: "ping".into(),
            plugin_name: "ping-plugin".into(),
            namespace: namespace.into(),
            node_selector: String::new(),
            pod_label_selector: Default::default(),
            plugin_restart_policy: "Always".into(),
            runtime: Default::default(),
        }
    }

    fn test_exporter() -> ExporterHandle {
        let (config_changed_tx, _rx) = mpsc::channel(1);
        ExporterHandle {
            config_changed_tx,
            cancellation: CancellationToken::new(),
            join: tokio::spawn(async {}),
        }
    }

    fn make_reconciler(store: Arc<dyn ExtStorageHandler>) -> Reconciler {
        let mut reconciler = Reconciler::new(
            "agent-1".to_string(),
            test_identity(),
            false,
            Duration::from_millis(30),
            Duration::from_millis(10),
            store,
            StateMap::new(),
            Broadcaster::default(),
            Arc::new(ClosureFactory),
            test_exporter(),
            CancellationToken::new(),
            FatalFlag::new(),
        );
        // No jitter, so the diff-and-apply tests below run deterministically fast.
        reconciler.jitter_max = Duration::ZERO;
        reconciler
    }

    #[tokio::test]
    async fn sync_with_no_configs_starts_nothing() {
        let store = Arc::new(InMemoryStorageHandler::new());
        let mut reconciler = make_reconciler(store);
        reconciler.sync_once().await;
        assert!(reconciler.running.is_empty());
    }

    #[tokio::test]
    async fn sync_starts_a_selected_test() {
        let store = Arc::new(InMemoryStorageHandler::new());
        store.set_config("ping", "v1", sample_config("default")).await;
        let mut reconciler = make_reconciler(store);

        reconciler.sync_once().await;

        assert!(reconciler.running.contains_key("ping"));
        let plugin_id = PluginId::new("agent-1", "ping");
        assert!(reconciler.state_map.get(&plugin_id).await.is_some());
    }

    #[tokio::test]
    async fn sync_skips_test_rejected_by_selector() {
        let store = Arc::new(InMemoryStorageHandler::new());
        store
            .set_config("ping", "v1", sample_config("other-ns"))
            .await;
        let mut reconciler = make_reconciler(store);
        reconciler.watch_own_namespace_only = true;

        reconciler.sync_once().await;

        assert!(reconciler.running.is_empty());
    }

    #[tokio::test]
    async fn version_bump_restarts_supervisor_with_new_version() {
        let store = Arc::new(InMemoryStorageHandler::new());
        store.set_config("ping", "v1", sample_config("default")).await;
        let mut reconciler = make_reconciler(store.clone());
        reconciler.sync_once().await;
        assert_eq!(reconciler.running.get("ping").unwrap().version, "v1");

        store.set_config("ping", "v2", sample_config("default")).await;
        reconciler.sync_once().await;

        assert_eq!(reconciler.running.get("ping").unwrap().version, "v2");
    }

    #[tokio::test]
    async fn deleted_config_stops_supervisor_and_clears_state() {
        let store = Arc::new(InMemoryStorageHandler::new());
        store.set_config("ping", "v1", sample_config("default")).await;
        let mut reconciler = make_reconciler(store.clone());
        reconciler.sync_once().await;
        assert!(reconciler.running.contains_key("ping"));

        store.remove_config("ping").await;
        reconciler.sync_once().await;

        assert!(!reconciler.running.contains_key("ping"));
        let plugin_id = PluginId::new("agent-1", "ping");
        assert!(reconciler.state_map.get(&plugin_id).await.is_none());
    }

    #[tokio::test]
    async fn start_runs_to_completion_on_shutdown_signal() {
        let store = Arc::new(InMemoryStorageHandler::new());
        store.set_config("ping", "v1", sample_config("default")).await;

        let root = CancellationToken::new();
        let fatal_flag = FatalFlag::new();
        let mut reconciler = Reconciler::new(
            "agent-1".to_string(),
            test_identity(),
            false,
            Duration::from_millis(30),
            Duration::from_millis(10),
            store,
            StateMap::new(),
            Broadcaster::default(),
            Arc::new(ClosureFactory),
            test_exporter(),
            root.clone(),
            fatal_flag.clone(),
        );
        reconciler.jitter_max = Duration::ZERO;

        let handle = tokio::spawn(reconciler.start());
        tokio::time::sleep(Duration::from_millis(50)).await;
        root.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reconciler did not shut down within timeout")
            .expect("reconciler task panicked");

        assert!(!fatal_flag.is_set());
    }
}
