//! Boundaries to the systems a configuration transaction touches.
//!
//! Each collaborator is an async trait with an in-memory implementation
//! used by tests and the file-backed daemon mode:
//!
//! - [`SwitchStore`]: flat key → field → value tables (CONFIG_DB, APPL_DB, ...)
//! - [`HardwareApi`]: attribute get/set/capability on hardware objects
//! - [`ClusterOrchestrator`]: dataplane topology files and workload lifecycle
//! - [`Datastore`]: authoritative configuration, advisory locks, notifications
//!
//! Production adapters: [`RedisStore`] (feature `redis`) and [`KubectlCluster`].

pub mod cluster;
pub mod datastore;
pub mod error;
pub mod hardware;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod shell;
pub mod store;

pub use cluster::{
    ClusterOrchestrator, KubectlCluster, KubectlSettings, MemoryCluster, TopologyFiles,
    WorkloadPhase, WorkloadStatus,
};
pub use datastore::{find_node, scalar_string, Datastore, MemoryDatastore};
pub use error::{BackendError, BackendResult};
pub use hardware::{AttrCapability, AttrEvent, HardwareApi, MemoryHardware};
#[cfg(feature = "redis")]
pub use redis_store::{RedisKeyspaceSource, RedisStore};
pub use store::{
    glob_match, DbId, FieldValues, KeyEvent, KeyEventSource, MemoryStore, StoreWrite, SwitchStore,
};
