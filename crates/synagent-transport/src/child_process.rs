//! [`Plugin`] implementation that runs a synthetic test as a child process
//! (§4.5 implementation note).
//!
//! The plugin binary receives its [`SynTestConfig`] as one line of JSON on
//! stdin (with the agent's runtime identity fields merged into
//! `config.runtime` first) and is expected to write zero or more
//! newline-delimited [`TestResult`]-shaped JSON objects to stdout as the test
//! produces results. Anything on stderr is forwarded to `tracing` at `debug`,
//! or at `warn` when the run ultimately fails, matching `printPluginLogs`.
//!
//! `run` races the child against its run context's cancellation token and
//! kills the process on cancellation rather than waiting for it to exit on
//! its own.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use synagent_core::{
    Outcome, Plugin, PluginError, PluginFactory, PluginRunContext, TestResult,
};

/// Wire shape a plugin process writes to stdout, one per line.
#[derive(Debug, Deserialize)]
struct PluginResultLine {
    outcome: PluginOutcome,
    #[serde(default)]
    details: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PluginOutcome {
    Pass,
    Fail,
}

impl From<PluginOutcome> for Outcome {
    fn from(value: PluginOutcome) -> Self {
        match value {
            PluginOutcome::Pass => Outcome::Pass,
            PluginOutcome::Fail => Outcome::Fail,
        }
    }
}

/// Stdin payload: the test config with runtime identity fields merged in.
#[derive(Serialize)]
struct PluginInvocation<'a> {
    #[serde(flatten)]
    config: &'a synagent_core::SynTestConfig,
}

/// How much of a plugin's stderr this agent echoes into its own logs,
/// decoupled from `synagent-runtime`'s config schema so this crate doesn't
/// depend on the orchestration layer above it. Mirrors the `printPluginLogs`
/// setting: the binary crate maps the config value onto this at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PluginLogPolicy {
    Never,
    #[default]
    OnFail,
    Always,
}

/// Runs `{plugins_dir}/{plugin_name}` as a child process for every invocation.
pub struct ChildProcessPlugin {
    binary_path: std::path::PathBuf,
    log_policy: PluginLogPolicy,
}

impl ChildProcessPlugin {
    pub fn new(binary_path: impl Into<std::path::PathBuf>, log_policy: PluginLogPolicy) -> Self {
        Self {
            binary_path: binary_path.into(),
            log_policy,
        }
    }
}

#[async_trait]
impl Plugin for ChildProcessPlugin {
    async fn run(&self, ctx: PluginRunContext) -> Result<(), PluginError> {
        let mut config = ctx.config;
        config
            .runtime
            .entry("test_name".to_string())
            .or_insert_with(|| config.name.clone());

        let payload = serde_json::to_vec(&PluginInvocation { config: &config })
            .map_err(|e| PluginError::Protocol(format!("encoding invocation: {e}")))?;

        let mut child = Command::new(&self.binary_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PluginError::Launch(e.to_string()))?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            PluginError::Launch("child process did not expose stdin".to_string())
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PluginError::Launch("child process did not expose stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PluginError::Launch("child process did not expose stderr".to_string()))?;

        tokio::spawn(async move {
            if stdin.write_all(&payload).await.is_ok() {
                let _ = stdin.write_all(b"\n").await;
            }
            drop(stdin);
        });

        let log_policy = self.log_policy;
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if log_policy == PluginLogPolicy::Always {
                    tracing::info!(line = %line, "plugin stderr");
                } else {
                    tracing::debug!(line = %line, "plugin stderr");
                }
                last = line;
            }
            last
        });

        let plugin_id = ctx.plugin_id.clone();
        let results_tx = ctx.results.clone();
        let stdout_cancellation = ctx.cancellation.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = stdout_cancellation.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match next {
                    Ok(Some(line)) if !line.trim().is_empty() => {
                        match serde_json::from_str::<PluginResultLine>(&line) {
                            Ok(parsed) => {
                                let result = TestResult {
                                    plugin_id: plugin_id.clone(),
                                    timestamp: std::time::SystemTime::now(),
                                    outcome: parsed.outcome.into(),
                                    details: parsed.details,
                                };
                                let _ = results_tx.send(result);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, line = %line, "malformed plugin result line, skipping");
                            }
                        }
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading plugin stdout");
                        break;
                    }
                }
            }
        });

        let status = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "failed to kill plugin child process on cancellation");
                }
                let _ = child.wait().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                return Err(PluginError::Cancelled);
            }
            status = child.wait() => {
                status.map_err(|e| PluginError::Launch(format!("waiting on child process: {e}")))?
            }
        };

        let _ = stdout_task.await;
        let last_stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            let code = status.code().unwrap_or(-1);
            if !last_stderr.is_empty() && self.log_policy != PluginLogPolicy::Never {
                tracing::warn!(status = code, stderr = %last_stderr, "plugin exited non-zero");
            }
            Err(PluginError::ExitStatus(code))
        }
    }
}

/// Resolves a plugin name to a [`ChildProcessPlugin`] rooted under a
/// configured plugins directory.
pub struct ChildProcessPluginFactory {
    plugins_dir: std::path::PathBuf,
    log_policy: PluginLogPolicy,
}

impl ChildProcessPluginFactory {
    pub fn new(plugins_dir: impl Into<std::path::PathBuf>, log_policy: PluginLogPolicy) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            log_policy,
        }
    }
}

impl PluginFactory for ChildProcessPluginFactory {
    fn create(&self, plugin_name: &str) -> Arc<dyn Plugin> {
        Arc::new(ChildProcessPlugin::new(
            self.plugins_dir.join(plugin_name),
            self.log_policy,
        ))
    }
}

/// In-process [`Plugin`] double driven by a closure, for tests.
pub struct ClosurePlugin<F>(F)
where
    F: Fn(&PluginRunContext) -> Result<(), PluginError> + Send + Sync;

impl<F> ClosurePlugin<F>
where
    F: Fn(&PluginRunContext) -> Result<(), PluginError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Plugin for ClosurePlugin<F>
where
    F: Fn(&PluginRunContext) -> Result<(), PluginError> + Send + Sync,
{
    async fn run(&self, ctx: PluginRunContext) -> Result<(), PluginError> {
        (self.0)(&ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[tokio::test]
    async fn closure_plugin_returns_its_closure_result() {
        let plugin = ClosurePlugin::new(|_ctx| Ok(()));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = PluginRunContext {
            plugin_id: synagent_core::PluginId::new("agent-1", "ping"),
            config: synagent_core::SynTestConfig {
                name: "ping".into(),
                plugin_name: "ping-plugin".into(),
                namespace: "default".into(),
                node_selector: String::new(),
                pod_label_selector: Map::new(),
                plugin_restart_policy: "Always".into(),
                runtime: Map::new(),
            },
            cancellation: tokio_util::sync::CancellationToken::new(),
            results: tx,
        };
        assert!(plugin.run(ctx).await.is_ok());
    }

    #[tokio::test]
    async fn run_kills_child_and_returns_cancelled_on_cancellation() {
        // `yes` ignores stdin and stdout-spins forever, so the only way this
        // test completes is via the cancellation path actually killing it.
        let plugin = ChildProcessPlugin::new("yes", PluginLogPolicy::Never);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cancellation = tokio_util::sync::CancellationToken::new();
        let ctx = PluginRunContext {
            plugin_id: synagent_core::PluginId::new("agent-1", "spin"),
            config: synagent_core::SynTestConfig {
                name: "spin".into(),
                plugin_name: "yes".into(),
                namespace: "default".into(),
                node_selector: String::new(),
                pod_label_selector: Map::new(),
                plugin_restart_policy: "Always".into(),
                runtime: Map::new(),
            },
            cancellation: cancellation.clone(),
            results: tx,
        };

        let run_fut = plugin.run(ctx);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancellation.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), run_fut)
            .await
            .expect("run did not return promptly after cancellation");
        assert!(matches!(result, Err(PluginError::Cancelled)));
    }

    #[test]
    fn factory_joins_plugin_name_onto_plugins_dir() {
        let factory =
            ChildProcessPluginFactory::new("/opt/synagent/plugins", PluginLogPolicy::default());
        let plugin = factory.create("ping-plugin");
        let _: Arc<dyn Plugin> = plugin;
    }
}
