//! Backend orchestration for structural changes.
//!
//! Breakout edits are collected per parent interface until both paired
//! fields are known. A ready entity schedules one restart cycle on the
//! task queue; the cycle recomputes the whole dataplane topology, and
//! only when the rendered files differ from what the cluster holds does
//! it restart the dataplane, wait for it, re-seed the store and reconcile.

use crate::oper::{snapshot_counters, OperationalState};
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::schema::{leaf, list_entries};
use crate::tables::{
    fields, leaves, CFG_FLEX_COUNTER_TABLE_NAME, CFG_PORT_TABLE_NAME, CONFIG_BCM_FILE,
    INTERFACES_DOMAIN, PORT_CONFIG_FILE,
};
use crate::topology::{breakouts_from_config, BreakoutLayout, Breakouts, Platform, Topology};
use async_trait::async_trait;
use cfgtxn_backend::{
    BackendError, ClusterOrchestrator, Datastore, DbId, FieldValues, SwitchStore,
};
use cfgtxn_core::{
    ChangeKind, CorrelationId, LockManager, PendingBackendChanges, PendingFields, StructuralDelta,
    StructuralSink, TaskQueue, TxnError, TxnResult,
};
use cfgtxn_types::{ChannelSpeed, InterfaceName};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// How long to wait for a recreated dataplane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            interval: Duration::from_secs(1),
        }
    }
}

/// Collaborators of a switch-state agent.
#[derive(Clone)]
pub struct SwitchBackends {
    pub store: Arc<dyn SwitchStore>,
    pub cluster: Arc<dyn ClusterOrchestrator>,
    pub datastore: Arc<dyn Datastore>,
    pub platform: Arc<Platform>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestratorSettings {
    pub readiness: ReadinessPolicy,
    /// Wait between enabling counters and taking baselines.
    pub settle: Duration,
}

pub struct BackendOrchestrator {
    this: Weak<BackendOrchestrator>,
    backends: SwitchBackends,
    locks: Arc<LockManager>,
    queue: TaskQueue,
    reconciler: Arc<ReconciliationEngine>,
    state: Arc<OperationalState>,
    settings: OrchestratorSettings,
    pending: Mutex<PendingBackendChanges>,
    /// Ready breakout edits not yet visible in the running configuration;
    /// `None` removes the breakout.
    overrides: Mutex<BTreeMap<String, Option<PendingFields>>>,
}

impl BackendOrchestrator {
    pub fn new(
        backends: SwitchBackends,
        locks: Arc<LockManager>,
        queue: TaskQueue,
        reconciler: Arc<ReconciliationEngine>,
        state: Arc<OperationalState>,
        settings: OrchestratorSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            backends,
            locks,
            queue,
            reconciler,
            state,
            settings,
            pending: Mutex::new(PendingBackendChanges::new(&[
                leaves::NUM_CHANNELS,
                leaves::CHANNEL_SPEED,
            ])),
            overrides: Mutex::new(BTreeMap::new()),
        })
    }

    /// Entities still waiting for a paired field.
    pub fn waiting(&self) -> Vec<String> {
        self.pending.lock().incomplete()
    }

    /// Startup pass: bring the dataplane topology in line with the running
    /// configuration, then reconcile.
    #[instrument(skip(self))]
    pub async fn startup(&self) -> TxnResult<ReconcileReport> {
        let _guard = self.locks.acquire_all().await?;
        let running = self.backends.datastore.running_tree(INTERFACES_DOMAIN).await?;
        let breakouts = breakouts_from_config(&running);
        let topology = Topology::compute(&self.backends.platform, &breakouts)?;

        if self.sync_topology(&topology).await? {
            self.after_restart(&topology).await?;
        } else {
            snapshot_counters(self.backends.store.as_ref(), &self.state).await?;
        }
        let report = self.reconciler.run().await?;
        self.state.set_rebooting(false);
        Ok(report)
    }

    /// One restart cycle. Returns true when the dataplane was restarted.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> TxnResult<bool> {
        let _guard = self.locks.acquire_all().await?;
        let overrides = std::mem::take(&mut *self.overrides.lock());

        let running = self.backends.datastore.running_tree(INTERFACES_DOMAIN).await?;
        let mut breakouts = breakouts_from_config(&running);
        apply_overrides(&mut breakouts, overrides);
        let topology = Topology::compute(&self.backends.platform, &breakouts)?;

        if !self.sync_topology(&topology).await? {
            return Ok(false);
        }
        self.after_restart(&topology).await?;
        self.reconciler.run().await?;
        self.state.set_rebooting(false);
        info!(ports = topology.ports().len(), "Restart cycle complete");
        Ok(true)
    }

    /// Writes the topology and restarts the dataplane when the cluster's
    /// files differ from it.
    async fn sync_topology(&self, topology: &Topology) -> TxnResult<bool> {
        let cluster = &self.backends.cluster;
        let current = cluster.read_topology().await?;
        for required in [PORT_CONFIG_FILE, CONFIG_BCM_FILE] {
            if !current.contains_key(required) {
                let reason = format!("{} is not present", required);
                return Err(BackendError::cluster("read topology", reason).into());
            }
        }

        let rendered = topology.render(&current);
        if !Topology::differs(&rendered, &current) {
            debug!("Dataplane topology unchanged");
            return Ok(false);
        }

        cluster.write_topology(&rendered).await?;
        self.state.set_rebooting(true);
        let previous = cluster.workload_status().await?.instance;
        info!(previous = ?previous, "Topology changed, recreating dataplane");
        cluster.recreate_workload().await?;
        self.await_ready(previous).await?;
        Ok(true)
    }

    async fn await_ready(&self, previous: Option<String>) -> TxnResult<()> {
        let policy = self.settings.readiness;
        for attempt in 1..=policy.max_attempts {
            let status = self.backends.cluster.workload_status().await?;
            if status.is_running() && status.instance != previous {
                info!(instance = ?status.instance, attempt, "Dataplane ready");
                return Ok(());
            }
            debug!(phase = %status.phase, attempt, "Dataplane not ready");
            tokio::time::sleep(policy.interval).await;
        }
        let message = format!(
            "dataplane not ready after {} attempts",
            policy.max_attempts
        );
        error!("{}", message);
        Err(TxnError::unreachable(message))
    }

    async fn after_restart(&self, topology: &Topology) -> TxnResult<()> {
        self.align_ports(topology).await?;

        let store = &self.backends.store;
        let flex = DbId::ConfigDb.key(CFG_FLEX_COUNTER_TABLE_NAME, &[CFG_PORT_TABLE_NAME]);
        store
            .hset(DbId::ConfigDb, &flex, fields::FLEX_COUNTER_STATUS, "enable")
            .await?;
        if !self.settings.settle.is_zero() {
            debug!(delay = ?self.settings.settle, "Waiting for counters to settle");
            tokio::time::sleep(self.settings.settle).await;
        }
        snapshot_counters(store.as_ref(), &self.state).await?;
        Ok(())
    }

    /// Makes the PORT table hold exactly the topology's ports.
    async fn align_ports(&self, topology: &Topology) -> TxnResult<()> {
        let store = &self.backends.store;
        let pattern = DbId::ConfigDb.key(CFG_PORT_TABLE_NAME, &["Ethernet*"]);
        let wanted: BTreeSet<String> =
            topology.ports().iter().map(|p| p.name.to_string()).collect();

        for key in store.keys(DbId::ConfigDb, &pattern).await? {
            let stale = DbId::ConfigDb
                .split_key(&key)
                .is_some_and(|(_, name)| !wanted.contains(name));
            if stale {
                debug!(key = %key, "Removing port absent from topology");
                store.del(DbId::ConfigDb, &key).await?;
            }
        }

        for port in topology.ports() {
            let name = port.name.to_string();
            let key = DbId::ConfigDb.key(CFG_PORT_TABLE_NAME, &[name.as_str()]);
            let current = store.hgetall(DbId::ConfigDb, &key).await?;
            let desired: FieldValues = [
                (fields::LANES, port.lanes_field()),
                (fields::ALIAS, port.alias.clone()),
                (fields::SPEED, port.speed.to_string()),
                (fields::INDEX, port.index.to_string()),
            ]
            .into_iter()
            .filter(|(f, v)| current.get(*f) != Some(v))
            .map(|(f, v)| (f.to_string(), v))
            .collect();
            if !desired.is_empty() {
                store.hset_multiple(DbId::ConfigDb, &key, &desired).await?;
            }
        }
        Ok(())
    }

    fn enqueue_cycle(&self, label: String) {
        let Some(this) = self.this.upgrade() else {
            warn!("Orchestrator dropped, restart cycle not scheduled");
            return;
        };
        self.queue.enqueue(label, async move { this.run_cycle().await.map(|_| ()) });
    }
}

#[async_trait]
impl StructuralSink for BackendOrchestrator {
    #[instrument(skip(self, deltas), fields(batch = %id))]
    async fn submit(&self, id: CorrelationId, deltas: Vec<StructuralDelta>) -> TxnResult<()> {
        {
            let mut pending = self.pending.lock();
            for delta in &deltas {
                if delta.field == leaves::NUM_CHANNELS && delta.kind == ChangeKind::Deleted {
                    pending.record_removal(&delta.entity);
                } else {
                    pending.record(&delta.entity, &delta.field, delta.value.clone());
                }
            }
        }

        // Partners committed earlier are already in the running configuration.
        let incomplete = self.pending.lock().incomplete();
        if !incomplete.is_empty() {
            let running = self.backends.datastore.running_tree(INTERFACES_DOMAIN).await?;
            let mut pending = self.pending.lock();
            for entity in &incomplete {
                for field in pending.missing(entity) {
                    if let Some(value) = running_breakout_field(&running, entity, &field) {
                        pending.record(entity, &field, Some(value));
                    }
                }
            }
        }

        let ready = self.pending.lock().drain_ready();
        if ready.is_empty() {
            debug!(waiting = ?self.waiting(), "Breakout waiting for its paired field");
            return Ok(());
        }
        let entities: Vec<String> = ready.iter().map(|(e, _)| e.clone()).collect();
        self.overrides.lock().extend(ready);
        info!(entities = ?entities, "Scheduling restart cycle");
        self.enqueue_cycle(format!("restart {} {}", id, entities.join(",")));
        Ok(())
    }
}

fn running_breakout_field(running: &Value, entity: &str, field: &str) -> Option<String> {
    let entry = list_entries(running, "interface")
        .find(|e| leaf(e, leaves::NAME).as_deref() == Some(entity))?;
    let value = leaf(entry, &format!("{}/{}", leaves::BREAKOUT, field))?;
    if field == leaves::CHANNEL_SPEED {
        value.parse::<ChannelSpeed>().ok().map(|s| s.as_str().to_string())
    } else {
        Some(value)
    }
}

fn apply_overrides(breakouts: &mut Breakouts, overrides: BTreeMap<String, Option<PendingFields>>) {
    for (entity, fields) in overrides {
        let Ok(name) = entity.parse::<InterfaceName>() else {
            warn!(entity = %entity, "Ignoring breakout of invalid interface");
            continue;
        };
        let Some(fields) = fields else {
            breakouts.remove(&name);
            continue;
        };
        let channels = fields
            .get(leaves::NUM_CHANNELS)
            .cloned()
            .flatten()
            .and_then(|c| c.parse::<u32>().ok());
        let speed = fields
            .get(leaves::CHANNEL_SPEED)
            .cloned()
            .flatten()
            .and_then(|s| s.parse::<ChannelSpeed>().ok());
        match (channels, speed) {
            (Some(channels), Some(speed)) => {
                breakouts.insert(name, BreakoutLayout { channels, speed });
            }
            _ => warn!(entity = %entity, "Incomplete breakout fields, ignoring"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceLimits;
    use crate::handlers::SwitchPortAttributes;
    use crate::schema::SchemaDefaults;
    use crate::tables::{LANEMAP_FILE, LOCK_ORDER};
    use crate::topology::tests::sample_platform;
    use cfgtxn_backend::{MemoryCluster, MemoryDatastore, MemoryStore, TopologyFiles};
    use cfgtxn_core::LockPolicy;
    use cfgtxn_types::DataPath;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        cluster: Arc<MemoryCluster>,
        datastore: Arc<MemoryDatastore>,
        queue: TaskQueue,
        state: Arc<OperationalState>,
        orchestrator: Arc<BackendOrchestrator>,
    }

    fn initial_files() -> TopologyFiles {
        Topology::compute(&sample_platform(), &Breakouts::new())
            .unwrap()
            .render(&TopologyFiles::new())
    }

    fn fixture(cluster: MemoryCluster) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.seed(DbId::ConfigDb, "PORT|Ethernet1_1", &[("speed", "100000")]);
        store.seed(DbId::ConfigDb, "PORT|Ethernet2_1", &[("speed", "100000")]);
        let cluster = Arc::new(cluster);
        let datastore = Arc::new(
            MemoryDatastore::from_json(json!({
                "interfaces": {"interface": [{"name": "Ethernet1_1"}, {"name": "Ethernet2_1"}]}
            }))
            .unwrap(),
        );
        let queue = TaskQueue::new(Duration::from_millis(5));
        let state = Arc::new(OperationalState::new());
        let attrs = Arc::new(SwitchPortAttributes::new(store.clone(), InterfaceLimits::default()));
        let reconciler = Arc::new(ReconciliationEngine::new(
            datastore.clone(),
            attrs,
            Some(store.clone()),
            Arc::new(SchemaDefaults::builtin()),
        ));
        let orchestrator = BackendOrchestrator::new(
            SwitchBackends {
                store: store.clone(),
                cluster: cluster.clone(),
                datastore: datastore.clone(),
                platform: Arc::new(sample_platform()),
            },
            Arc::new(LockManager::new(&LOCK_ORDER, LockPolicy::default())),
            queue.clone(),
            reconciler,
            state.clone(),
            OrchestratorSettings {
                readiness: ReadinessPolicy {
                    max_attempts: 5,
                    interval: Duration::from_millis(1),
                },
                settle: Duration::ZERO,
            },
        );
        Fixture {
            store,
            cluster,
            datastore,
            queue,
            state,
            orchestrator,
        }
    }

    fn delta(entity: &str, field: &str, kind: ChangeKind, value: Option<&str>) -> StructuralDelta {
        StructuralDelta {
            entity: entity.to_string(),
            field: field.to_string(),
            value: value.map(str::to_string),
            kind,
            path: DataPath::parse(&format!(
                "/interfaces/interface[name='{}']/breakout/{}",
                entity, field
            ))
            .unwrap(),
        }
    }

    #[tokio::test]
    async fn test_startup_without_topology_change() {
        let f = fixture(MemoryCluster::new(initial_files()));
        f.orchestrator.startup().await.unwrap();
        assert_eq!(f.cluster.restarts(), 0);
        assert!(!f.state.is_rebooting());
        assert_eq!(f.datastore.operational_writes(), 2);
    }

    #[tokio::test]
    async fn test_lanemap_difference_alone_does_not_restart() {
        let mut files = initial_files();
        files.insert(LANEMAP_FILE.to_string(), "Ethernet1_1:1,2,3,4\n".to_string());
        let f = fixture(MemoryCluster::new(files));
        f.orchestrator.startup().await.unwrap();
        assert_eq!(f.cluster.restarts(), 0);
        assert_eq!(f.cluster.files()[LANEMAP_FILE], "Ethernet1_1:1,2,3,4\n");

        // A real layout change rewrites the lane map along with it.
        let sink: &dyn StructuralSink = f.orchestrator.as_ref();
        sink.submit(
            CorrelationId(4),
            vec![
                delta("Ethernet2_1", "num-channels", ChangeKind::Created, Some("2")),
                delta("Ethernet2_1", "channel-speed", ChangeKind::Created, Some("SPEED_50GB")),
            ],
        )
        .await
        .unwrap();
        f.queue.drain().await.unwrap();
        assert_eq!(f.cluster.restarts(), 1);
        assert!(f.cluster.files()[LANEMAP_FILE].contains("vEthernet2_2:7,8\n"));
    }

    #[tokio::test]
    async fn test_paired_fields_across_batches() {
        let f = fixture(MemoryCluster::new(initial_files()).with_startup_polls(2));
        let sink: &dyn StructuralSink = f.orchestrator.as_ref();

        sink.submit(
            CorrelationId(1),
            vec![delta("Ethernet1_1", "num-channels", ChangeKind::Created, Some("4"))],
        )
        .await
        .unwrap();
        assert!(f.queue.is_empty());
        assert_eq!(f.orchestrator.waiting(), vec!["Ethernet1_1".to_string()]);

        sink.submit(
            CorrelationId(2),
            vec![delta("Ethernet1_1", "channel-speed", ChangeKind::Created, Some("SPEED_25GB"))],
        )
        .await
        .unwrap();
        assert_eq!(f.queue.len(), 1);
        f.queue.drain().await.unwrap();

        assert_eq!(f.cluster.restarts(), 1);
        assert!(f.cluster.files()[PORT_CONFIG_FILE].contains("Ethernet1_4 4 Eth1-4 25000 4"));
        assert_eq!(f.store.table(DbId::ConfigDb, "PORT|Ethernet1_3")["lanes"], "3");
        assert_eq!(
            f.store.table(DbId::ConfigDb, "FLEX_COUNTER_TABLE|PORT")["FLEX_COUNTER_STATUS"],
            "enable"
        );
        assert!(!f.state.is_rebooting());
    }

    #[tokio::test]
    async fn test_partner_from_running_config() {
        let f = fixture(MemoryCluster::new(initial_files()));
        f.datastore
            .set_node(
                &DataPath::parse("/interfaces/interface[name='Ethernet2_1']/breakout/channel-speed")
                    .unwrap(),
                Some("SPEED_50GB"),
            )
            .unwrap();
        let sink: &dyn StructuralSink = f.orchestrator.as_ref();
        sink.submit(
            CorrelationId(7),
            vec![delta("Ethernet2_1", "num-channels", ChangeKind::Created, Some("2"))],
        )
        .await
        .unwrap();
        f.queue.drain().await.unwrap();
        assert_eq!(f.cluster.restarts(), 1);
        assert_eq!(f.store.table(DbId::ConfigDb, "PORT|Ethernet2_2")["speed"], "50000");
    }

    #[tokio::test]
    async fn test_missing_topology_file() {
        let mut files = initial_files();
        files.remove(CONFIG_BCM_FILE);
        let f = fixture(MemoryCluster::new(files));
        assert!(matches!(
            f.orchestrator.startup().await,
            Err(TxnError::Backend(BackendError::Cluster { .. }))
        ));
    }

    #[tokio::test]
    async fn test_readiness_timeout_keeps_rebooting() {
        let f = fixture(MemoryCluster::new(initial_files()).never_ready());
        let sink: &dyn StructuralSink = f.orchestrator.as_ref();
        sink.submit(
            CorrelationId(3),
            vec![
                delta("Ethernet1_1", "num-channels", ChangeKind::Created, Some("2")),
                delta("Ethernet1_1", "channel-speed", ChangeKind::Created, Some("SPEED_50GB")),
            ],
        )
        .await
        .unwrap();
        assert!(matches!(
            f.queue.drain().await,
            Err(TxnError::BackendUnreachable { .. })
        ));
        assert!(f.state.is_rebooting());
    }
}
