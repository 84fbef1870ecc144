//! # synagent-core
//!
//! Core data model and in-process primitives for the synthetic-test agent:
//! the plugin-id/config/state types (§3), the [`StateMap`], the
//! [`Broadcaster`], the [`selector`] predicate, and the [`ExtStorageHandler`]
//! / [`Plugin`] trait contracts that `synagent-runtime` orchestrates and
//! `synagent-transport` implements.
//!
//! Foundational types and capability traits only; concrete I/O lives one
//! layer up, in `synagent-transport`.

pub mod broadcaster;
pub mod error;
pub mod model;
pub mod plugin;
pub mod selector;
pub mod state_map;
pub mod storage;

pub use broadcaster::{Broadcaster, SubscriberId};
pub use error::{PluginError, SelectorError, StoreError};
pub use model::{
    Outcome, PluginId, PluginState, PluginStatus, RestartPolicy, SynTestConfig, TestResult,
};
pub use plugin::{Plugin, PluginFactory, PluginRunContext};
pub use selector::{AgentIdentity, applies, glob_match};
pub use state_map::StateMap;
pub use storage::{AgentStatusSnapshot, ConfigChanged, ExtStorageHandler};

/// Convenience re-exports for downstream crates.
pub mod prelude {
    pub use crate::broadcaster::{Broadcaster, SubscriberId};
    pub use crate::error::{PluginError, SelectorError, StoreError};
    pub use crate::model::{
        Outcome, PluginId, PluginState, PluginStatus, RestartPolicy, SynTestConfig, TestResult,
    };
    pub use crate::plugin::{Plugin, PluginFactory, PluginRunContext};
    pub use crate::selector::{AgentIdentity, applies};
    pub use crate::state_map::StateMap;
    pub use crate::storage::{AgentStatusSnapshot, ConfigChanged, ExtStorageHandler};
}
