//! # synagent-transport
//!
//! Concrete I/O implementations for the synthetic-test agent: an
//! etcd-backed and an in-memory [`synagent_core::ExtStorageHandler`]
//! ([`store`]), a child-process-backed [`synagent_core::Plugin`]
//! ([`child_process`]), and the Prometheus metrics exporter ([`metrics`]).
//!
//! Kept separate from `synagent-core` so the capability traits stay free of
//! any concrete I/O dependency.

pub mod child_process;
pub mod metrics;
pub mod store;

pub use child_process::{ChildProcessPlugin, ChildProcessPluginFactory, ClosurePlugin, PluginLogPolicy};
pub use metrics::{ExporterError, ExporterHandleParts, serve as serve_metrics};
pub use store::{EtcdStorageHandler, InMemoryStorageHandler};

/// Convenience re-exports for the `synagent` binary crate.
pub mod prelude {
    pub use crate::child_process::{ChildProcessPluginFactory, PluginLogPolicy};
    pub use crate::metrics::{ExporterHandleParts, serve as serve_metrics};
    pub use crate::store::{EtcdStorageHandler, InMemoryStorageHandler};
}
