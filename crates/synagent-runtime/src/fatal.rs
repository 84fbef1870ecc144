//! Fatal-exit signalling (§7).
//!
//! Configuration errors, an unreachable store, or a broken config watch make
//! the agent meaningless to keep running. Rather than `panic!` or
//! `std::process::exit` from deep inside a task, every such condition routes
//! through [`trigger`], which logs the cause and cancels the root
//! cancellation token so the same shutdown sequence used for Ctrl-C/SIGTERM
//! runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::error;

/// Shared flag set by [`trigger`] and read by `main` after shutdown
/// completes, to pick the process exit code (§6: "non-zero via a self-sent
/// interrupt on any fatal condition").
#[derive(Clone, Default)]
pub struct FatalFlag(Arc<AtomicBool>);

impl FatalFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`trigger`] has fired at least once.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Logs `reason` at error level, marks `fatal_flag`, and cancels `root`,
/// triggering the same shutdown sequence Ctrl-C/SIGTERM use. Idempotent:
/// cancelling an already-cancelled token is a no-op.
pub fn trigger(root: &CancellationToken, fatal_flag: &FatalFlag, reason: impl std::fmt::Display) {
    error!(%reason, "fatal condition, initiating shutdown");
    fatal_flag.0.store(true, Ordering::SeqCst);
    root.cancel();
}
