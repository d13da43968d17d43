//! Configuration transaction agent.
//!
//! Concrete change handlers for interface attributes, port breakout and
//! VLANs, the orchestration that turns breakout edits into a dataplane
//! restart, and reconciliation of the backend and derived state with the
//! running configuration.
//!
//! # Architecture
//!
//! ```text
//! datastore ──batch──▶ Agent ──▶ TransactionCoordinator ──▶ handlers
//!                                         │                      │
//!                                  structural deltas      store / hardware
//!                                         ▼
//!                               BackendOrchestrator ──▶ TaskQueue ──▶ restart cycle
//!                                                                      │
//!                                                           ReconciliationEngine
//!                                                                      │
//!                                                                derived state
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod monitor;
pub mod oper;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;
pub mod schema;
pub mod tables;
pub mod topology;

pub use agent::{Agent, AlarmTasks};
pub use config::{AgentConfig, BackendKind, InterfaceLimits, DEFAULT_CONFIG_PATH};
pub use error::{AgentError, AgentResult};
pub use events::{pcs_status_to_oper, spawn_bridge, AlarmWatcher, LinkStateWatcher};
pub use monitor::{monitor_attribute, InterfaceMonitors, MonitorSettings};
pub use oper::{DerivedRead, DerivedStateReader, OperationalState};
pub use orchestrator::{
    BackendOrchestrator, OrchestratorSettings, ReadinessPolicy, SwitchBackends,
};
pub use reconcile::{ReconcileReport, ReconciliationEngine};
pub use registry::{hardware_registry, switch_registry};
pub use schema::SchemaDefaults;
pub use topology::{Platform, PlatformPort, Topology};
