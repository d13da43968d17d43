//! Agent assembly.
//!
//! An [`Agent`] owns one coordinator, its handler table and everything
//! needed to bring derived state in line at startup. Batches delivered
//! before [`Agent::start`] completes are refused.
//!
//! Link state is watched per backend: switch agents follow APPL_DB key
//! events ([`Agent::link_state_watcher`]), hardware agents monitor the
//! alarm attribute of every interface object ([`Agent::spawn_alarm_monitors`]).

use crate::config::AgentConfig;
use crate::events::{AlarmWatcher, LinkStateWatcher};
use crate::handlers::{AttributeBackend, HardwareAttributes, SwitchPortAttributes};
use crate::monitor::{InterfaceMonitors, MonitorSettings};
use crate::oper::{DerivedRead, DerivedStateReader, OperationalState};
use crate::orchestrator::{BackendOrchestrator, OrchestratorSettings, SwitchBackends};
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::registry::{hardware_registry, switch_registry};
use crate::tables::LOCK_ORDER;
use cfgtxn_backend::{Datastore, HardwareApi, SwitchStore};
use cfgtxn_core::{
    Batch, BatchReport, LockManager, TaskQueue, TransactionCoordinator, TxnError, TxnResult,
};
use cfgtxn_types::DataPath;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Alarm monitors of a hardware agent and the watcher consuming them.
pub struct AlarmTasks {
    monitors: InterfaceMonitors,
    watcher: JoinHandle<usize>,
}

impl AlarmTasks {
    pub fn monitors(&self) -> usize {
        self.monitors.len()
    }

    /// Waits for the monitors to drain and the watcher to stop. Call after
    /// cancelling the token the tasks were spawned with. Returns the
    /// number of link-state notifications sent.
    pub async fn join(self) -> usize {
        self.monitors.drain().await;
        match self.watcher.await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, "Alarm watcher panicked");
                0
            }
        }
    }
}

pub struct Agent {
    coordinator: TransactionCoordinator,
    reconciler: Arc<ReconciliationEngine>,
    orchestrator: Option<Arc<BackendOrchestrator>>,
    queue: TaskQueue,
    state: Arc<OperationalState>,
    reader: DerivedStateReader,
    datastore: Arc<dyn Datastore>,
    store: Option<Arc<dyn SwitchStore>>,
    hw: Option<Arc<dyn HardwareApi>>,
    monitor: MonitorSettings,
    initializing: AtomicBool,
}

impl Agent {
    /// Agent for the switch-state backend: interfaces, breakout and VLANs,
    /// with dataplane restarts for topology changes.
    pub fn switch(backends: SwitchBackends, config: &AgentConfig) -> Self {
        let locks = Arc::new(
            LockManager::new(&LOCK_ORDER, config.lock_policy())
                .with_advisory(backends.datastore.clone()),
        );
        let queue = TaskQueue::new(config.poll_interval());
        let state = Arc::new(OperationalState::new());
        let defaults = Arc::new(config.schema_defaults());

        let attrs: Arc<dyn AttributeBackend> = Arc::new(SwitchPortAttributes::new(
            backends.store.clone(),
            config.interfaces.clone(),
        ));
        let reconciler = Arc::new(ReconciliationEngine::new(
            backends.datastore.clone(),
            attrs.clone(),
            Some(backends.store.clone()),
            defaults.clone(),
        ));
        let orchestrator = BackendOrchestrator::new(
            backends.clone(),
            locks.clone(),
            queue.clone(),
            reconciler.clone(),
            state.clone(),
            OrchestratorSettings {
                readiness: config.readiness_policy(),
                settle: config.settle_delay(),
            },
        );

        let registry = switch_registry(
            backends.store.clone(),
            attrs,
            backends.platform.clone(),
            defaults,
        );
        let coordinator = TransactionCoordinator::new(Arc::new(registry), locks)
            .with_structural_sink(orchestrator.clone());

        Self {
            coordinator,
            reconciler,
            orchestrator: Some(orchestrator),
            queue,
            reader: DerivedStateReader::new(
                backends.datastore.clone(),
                Some(backends.store.clone()),
                state.clone(),
            ),
            state,
            datastore: backends.datastore,
            store: Some(backends.store),
            hw: None,
            monitor: config.monitor_settings(),
            initializing: AtomicBool::new(true),
        }
    }

    /// Agent for the hardware-abstraction backend: interface attributes
    /// only.
    pub fn hardware(
        hw: Arc<dyn HardwareApi>,
        datastore: Arc<dyn Datastore>,
        config: &AgentConfig,
    ) -> Self {
        let locks = Arc::new(
            LockManager::new(&LOCK_ORDER, config.lock_policy()).with_advisory(datastore.clone()),
        );
        let state = Arc::new(OperationalState::new());
        let defaults = Arc::new(config.schema_defaults());
        let attrs: Arc<dyn AttributeBackend> = Arc::new(HardwareAttributes::new(hw.clone()));
        let reconciler = Arc::new(ReconciliationEngine::new(
            datastore.clone(),
            attrs.clone(),
            None,
            defaults.clone(),
        ));
        let coordinator =
            TransactionCoordinator::new(Arc::new(hardware_registry(attrs, defaults)), locks);

        Self {
            coordinator,
            reconciler,
            orchestrator: None,
            queue: TaskQueue::new(config.poll_interval()),
            reader: DerivedStateReader::new(datastore.clone(), None, state.clone()),
            state,
            datastore,
            store: None,
            hw: Some(hw),
            monitor: config.monitor_settings(),
            initializing: AtomicBool::new(true),
        }
    }

    pub fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::SeqCst)
    }

    /// Brings the backend and derived state in line with the running
    /// configuration, then starts accepting batches.
    #[instrument(skip(self))]
    pub async fn start(&self) -> TxnResult<ReconcileReport> {
        let report = match &self.orchestrator {
            Some(orchestrator) => orchestrator.startup().await?,
            None => {
                let _guard = self.coordinator.locks().acquire_all().await?;
                self.reconciler.run().await?
            }
        };
        self.initializing.store(false, Ordering::SeqCst);
        info!(
            interfaces = report.interfaces,
            vlans = report.vlans,
            writes = report.backend_writes,
            "Agent ready"
        );
        Ok(report)
    }

    /// Entry point for change-batch deliveries.
    pub async fn handle_batch(&self, batch: &Batch) -> TxnResult<BatchReport> {
        if self.is_initializing() {
            return Err(TxnError::unreachable("agent is still initializing"));
        }
        self.coordinator.process(batch).await
    }

    /// Full resync outside a restart cycle.
    pub async fn reconcile(&self) -> TxnResult<ReconcileReport> {
        let _guard = self.coordinator.locks().acquire_all().await?;
        self.reconciler.run().await
    }

    pub async fn read(&self, path: &DataPath) -> TxnResult<DerivedRead> {
        self.reader.read(path).await
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn state(&self) -> &Arc<OperationalState> {
        &self.state
    }

    pub fn reader(&self) -> &DerivedStateReader {
        &self.reader
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn orchestrator(&self) -> Option<&Arc<BackendOrchestrator>> {
        self.orchestrator.as_ref()
    }

    /// Starts one alarm monitor per hardware interface object and the
    /// watcher that turns their alarms into link-state notifications.
    /// `None` for switch agents.
    pub async fn spawn_alarm_monitors(
        &self,
        shutdown: &CancellationToken,
    ) -> TxnResult<Option<AlarmTasks>> {
        let Some(hw) = self.hw.clone() else {
            return Ok(None);
        };
        let mut objects = hw.list_objects().await?;
        objects.sort();
        let (monitors, alarms) = InterfaceMonitors::spawn(hw, objects, &self.monitor, shutdown);

        let watcher = AlarmWatcher::new(self.datastore.clone(), self.state.clone());
        let token = shutdown.clone();
        let watcher = tokio::spawn(async move { watcher.run(alarms, token).await });
        Ok(Some(AlarmTasks { monitors, watcher }))
    }

    /// Link-state watcher over this agent's store; `None` for hardware
    /// agents.
    pub fn link_state_watcher(&self) -> Option<LinkStateWatcher> {
        let store = self.store.clone()?;
        Some(LinkStateWatcher::new(
            store,
            self.datastore.clone(),
            self.state.clone(),
        ))
    }
}
