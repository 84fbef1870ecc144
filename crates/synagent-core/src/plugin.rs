//! Contract for the plugin processes supervised by [`crate::PluginSupervisor`]
//! equivalents in `synagent-runtime`.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PluginError;
use crate::model::{PluginId, SynTestConfig, TestResult};

/// Context handed to a plugin for one run invocation.
#[derive(Debug, Clone)]
pub struct PluginRunContext {
    /// Identifies the supervisor driving this run; plugins stamp it onto
    /// every [`TestResult`] they emit.
    pub plugin_id: PluginId,
    /// The config this run was started with.
    pub config: SynTestConfig,
    /// Cancellation token scoped to this single run (the innermost of the
    /// three cancellation levels described in the design notes: root,
    /// per-supervisor, per-run).
    pub cancellation: CancellationToken,
    /// Channel the plugin pushes its test-run results into. The supervisor
    /// owns the receiving end and is the one that actually calls
    /// `Broadcaster::publish`, so a plugin implementation never touches the
    /// broadcaster directly.
    pub results: mpsc::UnboundedSender<TestResult>,
}

/// A runnable synthetic test plugin.
///
/// `run` is expected to honour `ctx.cancellation` and return promptly once it
/// fires; the supervisor does not forcibly interrupt a run, it waits for
/// `run` to return.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Runs the plugin to completion (one iteration cycle; the plugin itself
    /// decides its own internal cadence, per the agent's non-goals).
    async fn run(&self, ctx: PluginRunContext) -> Result<(), PluginError>;
}

/// Builds a [`Plugin`] instance by name. The reconciler holds one factory
/// and calls it for every test it decides to start, so the concrete plugin
/// transport (child process, in-process stub, ...) stays swappable.
pub trait PluginFactory: Send + Sync {
    /// Creates a runnable plugin for `plugin_name` (`SynTestConfig::plugin_name`).
    fn create(&self, plugin_name: &str) -> std::sync::Arc<dyn Plugin>;
}
