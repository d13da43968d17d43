//! Configuration file support for cfgtxnd.
//!
//! Every section and field is optional; missing values take the defaults
//! below. Default location: /etc/sonic/cfgtxnd.toml

use crate::error::{AgentError, AgentResult};
use crate::monitor::MonitorSettings;
use crate::orchestrator::ReadinessPolicy;
use crate::schema::SchemaDefaults;
use cfgtxn_backend::{shell::KUBECTL_CMD, KubectlSettings};
use cfgtxn_core::LockPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/cfgtxnd.toml";

/// Backend of record the agent drives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Key-value switch-state store with a restartable dataplane
    #[default]
    Switch,
    /// Hardware-abstraction objects (line-side interfaces)
    Hardware,
}

/// Agent selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub backend: BackendKind,
}

/// Hardware-abstraction backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// JSON description of the hardware objects and capabilities
    #[serde(default)]
    pub objects_file: Option<PathBuf>,

    /// Attribute whose notifications carry link events
    #[serde(default = "default_monitor_attribute")]
    pub monitor_attribute: String,

    /// Poll interval while a cancelled monitor waits for its object to go
    #[serde(default = "default_drain_interval")]
    pub drain_interval_ms: u64,
}

/// Switch-state store connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_host")]
    pub host: String,

    #[serde(default = "default_store_port")]
    pub port: u16,
}

/// Platform description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// JSON master port list
    #[serde(default)]
    pub interfaces_file: Option<PathBuf>,
}

/// Where the dataplane workload lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// ConfigMap holding the topology files
    #[serde(default = "default_configmap")]
    pub configmap: String,

    /// Label selector of the dataplane deployment
    #[serde(default = "default_selector")]
    pub selector: String,

    /// Name prefix of the pod whose readiness marks the dataplane ready
    #[serde(default = "default_checkpoint")]
    pub checkpoint: String,
}

/// File-backed authoritative datastore
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatastoreConfig {
    #[serde(default)]
    pub startup_config: Option<PathBuf>,
}

/// Dataplane readiness polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_readiness_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_readiness_interval")]
    pub interval_ms: u64,
}

/// Domain lock acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_retry_interval")]
    pub retry_interval_ms: u64,

    /// Unbounded when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Deferred task queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Port counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Delay between enabling counters and snapshotting baselines
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

/// Interface value constraints enforced by the switch-state backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceLimits {
    #[serde(default = "default_valid_speeds")]
    pub valid_speeds: Vec<u32>,

    #[serde(default = "default_mtu_min")]
    pub mtu_min: u32,

    #[serde(default = "default_mtu_max")]
    pub mtu_max: u32,
}

/// Thread to scheduler event bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Complete cfgtxnd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub datastore: DatastoreConfig,

    #[serde(default)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub tasks: TaskConfig,

    #[serde(default)]
    pub counters: CounterConfig,

    #[serde(default)]
    pub interfaces: InterfaceLimits,

    /// Leaf (relative to an interface entry) → default value overrides
    #[serde(default)]
    pub schema_defaults: BTreeMap<String, String>,

    #[serde(default)]
    pub events: EventConfig,
}

fn default_monitor_attribute() -> String {
    "alarm-notification".to_string()
}

fn default_drain_interval() -> u64 {
    100
}

fn default_store_host() -> String {
    "127.0.0.1".to_string()
}

fn default_store_port() -> u16 {
    6379
}

fn default_kubectl() -> String {
    KUBECTL_CMD.to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_configmap() -> String {
    "usonic-config".to_string()
}

fn default_selector() -> String {
    "app=usonic".to_string()
}

fn default_checkpoint() -> String {
    "usonic-mgmt".to_string()
}

fn default_readiness_attempts() -> u32 {
    120
}

fn default_readiness_interval() -> u64 {
    1000
}

fn default_lock_retry_interval() -> u64 {
    100
}

fn default_poll_interval() -> u64 {
    100
}

fn default_settle_secs() -> u64 {
    15
}

fn default_valid_speeds() -> Vec<u32> {
    vec![40000, 100000]
}

fn default_mtu_min() -> u32 {
    1312
}

fn default_mtu_max() -> u32 {
    9216
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            objects_file: None,
            monitor_attribute: default_monitor_attribute(),
            drain_interval_ms: default_drain_interval(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_store_host(),
            port: default_store_port(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            namespace: default_namespace(),
            configmap: default_configmap(),
            selector: default_selector(),
            checkpoint: default_checkpoint(),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_readiness_attempts(),
            interval_ms: default_readiness_interval(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_lock_retry_interval(),
            timeout_ms: None,
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_settle_secs(),
        }
    }
}

impl Default for InterfaceLimits {
    fn default() -> Self {
        Self {
            valid_speeds: default_valid_speeds(),
            mtu_min: default_mtu_min(),
            mtu_max: default_mtu_max(),
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl AgentConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            AgentError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`AgentConfig::load`], falling back to defaults when the file
    /// does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.store.port == 0 {
            return Err(AgentError::Config("store.port must be > 0".to_string()));
        }
        if self.readiness.max_attempts == 0 {
            return Err(AgentError::Config(
                "readiness.max_attempts must be > 0".to_string(),
            ));
        }
        if self.tasks.poll_interval_ms == 0 {
            return Err(AgentError::Config(
                "tasks.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.interfaces.mtu_min > self.interfaces.mtu_max {
            return Err(AgentError::Config(format!(
                "interfaces.mtu_min {} is above mtu_max {}",
                self.interfaces.mtu_min, self.interfaces.mtu_max
            )));
        }
        if self.interfaces.valid_speeds.is_empty() {
            return Err(AgentError::Config(
                "interfaces.valid_speeds must not be empty".to_string(),
            ));
        }
        if self.hardware.monitor_attribute.is_empty() {
            return Err(AgentError::Config(
                "hardware.monitor_attribute must not be empty".to_string(),
            ));
        }
        if self.hardware.drain_interval_ms == 0 {
            return Err(AgentError::Config(
                "hardware.drain_interval_ms must be > 0".to_string(),
            ));
        }
        if self.events.queue_capacity == 0 {
            return Err(AgentError::Config(
                "events.queue_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            retry_interval: Duration::from_millis(self.locks.retry_interval_ms),
            timeout: self.locks.timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            max_attempts: self.readiness.max_attempts,
            interval: Duration::from_millis(self.readiness.interval_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.tasks.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.counters.settle_secs)
    }

    /// Built-in schema defaults with the file's overrides applied.
    pub fn schema_defaults(&self) -> SchemaDefaults {
        SchemaDefaults::builtin().with_overrides(&self.schema_defaults)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            attribute: self.hardware.monitor_attribute.clone(),
            drain_interval: Duration::from_millis(self.hardware.drain_interval_ms),
            capacity: self.events.queue_capacity,
        }
    }

    pub fn kubectl_settings(&self) -> KubectlSettings {
        KubectlSettings {
            kubectl: self.cluster.kubectl.clone(),
            namespace: self.cluster.namespace.clone(),
            configmap: self.cluster.configmap.clone(),
            selector: self.cluster.selector.clone(),
            checkpoint: self.cluster.checkpoint.clone(),
        }
    }
}
