//! [`synagent_core::ExtStorageHandler`] implementations (§4.3, §6).

pub mod etcd;
pub mod memory;

pub use etcd::EtcdStorageHandler;
pub use memory::InMemoryStorageHandler;
