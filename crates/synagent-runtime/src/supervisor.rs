//! Per-test supervisor: runs a plugin to completion repeatedly under a
//! restart policy with exponential backoff (§4.5).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use synagent_core::{
    Broadcaster, Plugin, PluginId, PluginRunContext, PluginState, PluginStatus, RestartPolicy,
    StateMap, SynTestConfig,
};

const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);
const LONG_RUN_RESET_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Computes the backoff delay for the given restart count, per §4.5:
/// `min(5 min, 10s * 2^max(restarts, 0))`, clamped to a positive minimum of 1s.
fn backoff_delay(restarts: u32) -> Duration {
    let exp = 10u64.saturating_mul(1u64 << restarts.min(32));
    let delay = Duration::from_secs(exp).min(MAX_BACKOFF);
    delay.max(Duration::from_secs(1))
}

/// Runs one plugin-id's lifecycle: repeated `Plugin::run` invocations,
/// state-map updates, and restart backoff.
pub struct PluginSupervisor {
    plugin_id: PluginId,
    plugin: Arc<dyn Plugin>,
    state_map: StateMap,
    broadcaster: Broadcaster,
    cancellation: CancellationToken,
}

impl PluginSupervisor {
    /// Creates a supervisor for `plugin_id`, seeding `state_map` with the
    /// initial `Unknown` state for `config` before returning.
    pub async fn new(
        plugin_id: PluginId,
        config: SynTestConfig,
        plugin: Arc<dyn Plugin>,
        state_map: StateMap,
        broadcaster: Broadcaster,
        cancellation: CancellationToken,
    ) -> Self {
        state_map
            .set(plugin_id.clone(), PluginState::initial(config))
            .await;

        Self {
            plugin_id,
            plugin,
            state_map,
            broadcaster,
            cancellation,
        }
    }

    /// Runs the supervisor's full lifecycle to completion. Returns once the
    /// restart policy reaches a terminal state or cancellation is observed.
    pub async fn run(self) {
        let mut restarts_in_current_run: u32 = 0;

        loop {
            if self.cancellation.is_cancelled() {
                info!(plugin_id = %self.plugin_id, "supervisor cancelled before next run");
                return;
            }

            let config = match self.state_map.get(&self.plugin_id).await {
                Some(state) => state.config,
                None => {
                    warn!(plugin_id = %self.plugin_id, "state map entry vanished under supervisor");
                    return;
                }
            };
            let policy = config.restart_policy();

            self.enter_running(restarts_in_current_run).await;

            let run_token = self.cancellation.child_token();
            let (results_tx, mut results_rx) = mpsc::unbounded_channel();
            let ctx = PluginRunContext {
                plugin_id: self.plugin_id.clone(),
                config: config.clone(),
                cancellation: run_token.clone(),
                results: results_tx,
            };

            let forward = {
                let broadcaster = self.broadcaster.clone();
                tokio::spawn(async move {
                    while let Some(result) = results_rx.recv().await {
                        broadcaster.publish(result).await;
                    }
                })
            };

            let started_at = SystemTime::now();
            let run_fut = self.plugin.run(ctx);
            tokio::pin!(run_fut);
            let outcome = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    run_token.cancel();
                    run_fut.await
                }
                result = &mut run_fut => result,
            };
            drop(forward);

            let ran_long = SystemTime::now()
                .duration_since(started_at)
                .map(|d| d >= LONG_RUN_RESET_THRESHOLD)
                .unwrap_or(false);
            if ran_long {
                debug!(plugin_id = %self.plugin_id, "run exceeded long-run threshold, resetting restart counter");
                restarts_in_current_run = 0;
            }

            match self.settle(&outcome, policy).await {
                Some(next_status) if next_status == PluginStatus::RestartBackOff => {
                    self.enter_backoff(restarts_in_current_run).await;
                    let delay = backoff_delay(restarts_in_current_run);
                    restarts_in_current_run += 1;

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancellation.cancelled() => {
                            info!(plugin_id = %self.plugin_id, "cancelled during backoff sleep");
                            return;
                        }
                    }
                }
                Some(_terminal) => return,
                None => return,
            }

            if self.cancellation.is_cancelled() {
                return;
            }
        }
    }

    async fn enter_running(&self, restarts_in_current_run: u32) {
        if let Some(mut state) = self.state_map.get(&self.plugin_id).await {
            state.previous_status_message = std::mem::take(&mut state.status_message);
            state.status = PluginStatus::Running;
            state.status_message.clear();
            state.restarts_in_current_run = restarts_in_current_run + 1;
            state.total_restarts += 1;
            state.running_since = Some(SystemTime::now());
            self.state_map.set(self.plugin_id.clone(), state).await;
        }
    }

    async fn enter_backoff(&self, restarts_in_current_run: u32) {
        if let Some(mut state) = self.state_map.get(&self.plugin_id).await {
            state.previous_status_message = std::mem::take(&mut state.status_message);
            state.status = PluginStatus::RestartBackOff;
            state.status_message = format!(
                "waiting {:?} before restart attempt {}",
                backoff_delay(restarts_in_current_run),
                restarts_in_current_run + 1
            );
            self.state_map.set(self.plugin_id.clone(), state).await;
        }
    }

    /// Applies the state machine in §4.5, writes the resulting status, and
    /// returns the status that was entered (`None` if the state-map entry
    /// had already vanished).
    async fn settle(
        &self,
        outcome: &Result<(), synagent_core::PluginError>,
        policy: RestartPolicy,
    ) -> Option<PluginStatus> {
        let has_error = outcome.is_err();
        let next_status = match (has_error, policy) {
            (true, RestartPolicy::Never) => PluginStatus::Error,
            (true, RestartPolicy::Always) => PluginStatus::RestartBackOff,
            (true, RestartPolicy::OnError) => PluginStatus::RestartBackOff,
            (false, RestartPolicy::Never) => PluginStatus::NotRunning,
            (false, RestartPolicy::OnError) => PluginStatus::NotRunning,
            (false, RestartPolicy::Always) => PluginStatus::RestartBackOff,
        };

        let mut state = self.state_map.get(&self.plugin_id).await?;
        state.previous_status_message = std::mem::take(&mut state.status_message);
        state.status_message = match outcome {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        };
        state.status = next_status;
        self.state_map.set(self.plugin_id.clone(), state).await;

        if has_error {
            warn!(plugin_id = %self.plugin_id, error = ?outcome, "plugin run returned an error");
        } else {
            debug!(plugin_id = %self.plugin_id, "plugin run completed without error");
        }

        Some(next_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_matches_spec() {
        let expected = [10u64, 20, 40, 80, 160, 300, 300, 300];
        for (restarts, expected_secs) in expected.iter().enumerate() {
            assert_eq!(backoff_delay(restarts as u32).as_secs(), *expected_secs);
        }
    }

    #[test]
    fn backoff_never_drops_below_one_second() {
        assert!(backoff_delay(0) >= Duration::from_secs(1));
    }
}
