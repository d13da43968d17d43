//! Cluster orchestrator boundary for the containerized dataplane.
//!
//! The dataplane workload reads its port topology from files kept in the
//! cluster (a ConfigMap). Changing the topology means rewriting those
//! files and recreating the workload.

use crate::error::{BackendError, BackendResult};
use crate::shell::{self, shellquote};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, instrument};

/// File name → contents of the dataplane topology files.
pub type TopologyFiles = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Terminating,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    fn from_pod_phase(phase: &str) -> Self {
        match phase {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        }
    }
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Current instance of the dataplane workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// Identity of the live instance; changes every time it is recreated.
    pub instance: Option<String>,
    pub phase: WorkloadPhase,
}

impl WorkloadStatus {
    pub fn is_running(&self) -> bool {
        self.instance.is_some() && self.phase == WorkloadPhase::Running
    }
}

#[async_trait]
pub trait ClusterOrchestrator: Send + Sync {
    /// Reads the topology files the workload currently runs with.
    async fn read_topology(&self) -> BackendResult<TopologyFiles>;

    /// Replaces the given topology files.
    async fn write_topology(&self, files: &TopologyFiles) -> BackendResult<()>;

    /// Forces the workload to be deleted and recreated.
    async fn recreate_workload(&self) -> BackendResult<()>;

    async fn workload_status(&self) -> BackendResult<WorkloadStatus>;
}

#[derive(Debug, Default)]
struct ClusterState {
    files: TopologyFiles,
    generation: u64,
    pending_polls: u32,
    restarts: usize,
    topology_writes: usize,
}

/// In-memory [`ClusterOrchestrator`].
///
/// A recreated workload reports `Pending` for `startup_polls` status calls
/// before running under a new instance id.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
    startup_polls: u32,
    never_ready: bool,
}

impl MemoryCluster {
    pub fn new(files: TopologyFiles) -> Self {
        Self {
            state: Mutex::new(ClusterState {
                files,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn with_startup_polls(mut self, polls: u32) -> Self {
        self.startup_polls = polls;
        self
    }

    /// A recreated workload never reaches `Running`.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    pub fn restarts(&self) -> usize {
        self.state.lock().restarts
    }

    pub fn topology_writes(&self) -> usize {
        self.state.lock().topology_writes
    }

    pub fn files(&self) -> TopologyFiles {
        self.state.lock().files.clone()
    }
}

#[async_trait]
impl ClusterOrchestrator for MemoryCluster {
    async fn read_topology(&self) -> BackendResult<TopologyFiles> {
        Ok(self.state.lock().files.clone())
    }

    async fn write_topology(&self, files: &TopologyFiles) -> BackendResult<()> {
        let mut state = self.state.lock();
        for (name, content) in files {
            state.files.insert(name.clone(), content.clone());
        }
        state.topology_writes += 1;
        Ok(())
    }

    async fn recreate_workload(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.generation += 1;
        state.restarts += 1;
        state.pending_polls = self.startup_polls;
        Ok(())
    }

    async fn workload_status(&self) -> BackendResult<WorkloadStatus> {
        let mut state = self.state.lock();
        if self.never_ready && state.generation > 0 {
            return Ok(WorkloadStatus {
                instance: None,
                phase: WorkloadPhase::Pending,
            });
        }
        if state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Ok(WorkloadStatus {
                instance: None,
                phase: WorkloadPhase::Pending,
            });
        }
        Ok(WorkloadStatus {
            instance: Some(format!("dataplane-{}", state.generation)),
            phase: WorkloadPhase::Running,
        })
    }
}

/// Where the dataplane lives in the cluster.
#[derive(Debug, Clone)]
pub struct KubectlSettings {
    pub kubectl: String,
    pub namespace: String,
    /// ConfigMap holding the topology files.
    pub configmap: String,
    /// Label selector of the dataplane deployment and its pods.
    pub selector: String,
    /// Name prefix of the pod whose readiness marks the dataplane ready.
    pub checkpoint: String,
}

/// [`ClusterOrchestrator`] driving `kubectl`.
pub struct KubectlCluster {
    settings: KubectlSettings,
}

impl KubectlCluster {
    pub fn new(settings: KubectlSettings) -> Self {
        Self { settings }
    }

    fn command(&self, args: &str) -> String {
        format!(
            "{} -n {} {}",
            self.settings.kubectl,
            shellquote(&self.settings.namespace),
            args
        )
    }
}

/// Extracts the checkpoint pod's status from `kubectl get pods -o json`.
pub fn parse_pod_list(pods: &Value, checkpoint: &str) -> WorkloadStatus {
    let candidates: Vec<&Value> = pods["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|pod| {
                    pod["metadata"]["name"]
                        .as_str()
                        .is_some_and(|name| name.starts_with(checkpoint))
                })
                .collect()
        })
        .unwrap_or_default();

    let live = candidates
        .iter()
        .find(|pod| pod["metadata"]["deletionTimestamp"].is_null());

    match live {
        Some(pod) => WorkloadStatus {
            instance: pod["metadata"]["uid"].as_str().map(str::to_string),
            phase: WorkloadPhase::from_pod_phase(pod["status"]["phase"].as_str().unwrap_or("")),
        },
        None if !candidates.is_empty() => WorkloadStatus {
            instance: None,
            phase: WorkloadPhase::Terminating,
        },
        None => WorkloadStatus {
            instance: None,
            phase: WorkloadPhase::Pending,
        },
    }
}

#[async_trait]
impl ClusterOrchestrator for KubectlCluster {
    #[instrument(skip(self))]
    async fn read_topology(&self) -> BackendResult<TopologyFiles> {
        let cmd = self.command(&format!(
            "get configmap {} -o json",
            shellquote(&self.settings.configmap)
        ));
        let out = shell::exec_or_throw(&cmd).await?;
        let configmap: Value = serde_json::from_str(&out)?;

        let data = configmap["data"].as_object().ok_or_else(|| {
            BackendError::cluster("read topology", "configmap has no data section")
        })?;
        Ok(data
            .iter()
            .filter_map(|(name, content)| content.as_str().map(|c| (name.clone(), c.to_string())))
            .collect())
    }

    #[instrument(skip(self, files))]
    async fn write_topology(&self, files: &TopologyFiles) -> BackendResult<()> {
        let patch = json!({ "data": files }).to_string();
        let cmd = self.command(&format!(
            "patch configmap {} --type merge -p {}",
            shellquote(&self.settings.configmap),
            shellquote(&patch)
        ));
        shell::exec_or_throw(&cmd).await?;
        info!(
            configmap = %self.settings.configmap,
            files = files.len(),
            "Patched topology configmap"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn recreate_workload(&self) -> BackendResult<()> {
        let cmd = self.command(&format!(
            "rollout restart deployment -l {}",
            shellquote(&self.settings.selector)
        ));
        shell::exec_or_throw(&cmd).await?;
        info!(selector = %self.settings.selector, "Requested dataplane restart");
        Ok(())
    }

    async fn workload_status(&self) -> BackendResult<WorkloadStatus> {
        let cmd = self.command(&format!(
            "get pods -l {} -o json",
            shellquote(&self.settings.selector)
        ));
        let out = shell::exec_or_throw(&cmd).await?;
        let pods: Value = serde_json::from_str(&out)?;
        let status = parse_pod_list(&pods, &self.settings.checkpoint);
        debug!(?status, "Dataplane workload status");
        Ok(status)
    }
}
