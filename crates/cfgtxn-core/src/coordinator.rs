//! Two-phase batch processing.
//!
//! PreCommit runs `init` and `validate` for every change in delivery order
//! and keeps the prepared handlers under the batch's correlation id.
//! Commit runs `apply` in the same order; when change K fails, K and then
//! K-1..1 are reverted before the original error is returned. Structural
//! deltas produced by a successful commit go to the [`StructuralSink`] in
//! one submission.

use crate::change::{Batch, BatchPhase, Change, CorrelationId};
use crate::error::{TxnError, TxnResult};
use crate::handler::{ApplyOutcome, ChangeHandler, HandlerState, StructuralDelta};
use crate::lock::LockManager;
use crate::registry::HandlerRegistry;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Receives the structural deltas of one committed batch.
#[async_trait]
pub trait StructuralSink: Send + Sync {
    async fn submit(&self, id: CorrelationId, deltas: Vec<StructuralDelta>) -> TxnResult<()>;
}

/// Outcome of one successfully processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub id: CorrelationId,
    pub phase: BatchPhase,
    /// Changes that went through the phase.
    pub handled: usize,
    /// Handlers that performed a backend write.
    pub applied: usize,
    pub structural: Vec<StructuralDelta>,
}

impl BatchReport {
    fn new(id: CorrelationId, phase: BatchPhase, handled: usize) -> Self {
        Self {
            id,
            phase,
            handled,
            applied: 0,
            structural: Vec::new(),
        }
    }
}

struct HandlerSlot {
    index: usize,
    path: String,
    change: Change,
    handler: Box<dyn ChangeHandler>,
    state: HandlerState,
}

impl HandlerSlot {
    /// Retained slots are only reused for the exact change list they validated.
    fn cover(slots: &[HandlerSlot], changes: &[Change]) -> bool {
        slots.len() == changes.len()
            && slots.iter().zip(changes).all(|(slot, change)| slot.change == *change)
    }

    fn advance(&mut self, next: HandlerState) -> TxnResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(TxnError::internal(format!(
                "handler {} for '{}' cannot move from {:?} to {:?}",
                self.handler.name(),
                self.path,
                self.state,
                next
            )));
        }
        self.state = next;
        Ok(())
    }

    fn reject(&self, source: TxnError) -> TxnError {
        TxnError::rejected(self.index, self.handler.name(), source)
    }
}

pub struct TransactionCoordinator {
    registry: Arc<HandlerRegistry>,
    locks: Arc<LockManager>,
    sink: Option<Arc<dyn StructuralSink>>,
    prepared: Mutex<HashMap<CorrelationId, Vec<HandlerSlot>>>,
}

impl TransactionCoordinator {
    pub fn new(registry: Arc<HandlerRegistry>, locks: Arc<LockManager>) -> Self {
        Self {
            registry,
            locks,
            sink: None,
            prepared: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_structural_sink(mut self, sink: Arc<dyn StructuralSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Number of edits that passed pre-commit and await commit or abort.
    pub fn prepared_count(&self) -> usize {
        self.prepared.lock().len()
    }

    /// Processes one batch delivery under all domain locks.
    #[instrument(skip(self, batch), fields(batch = %batch.id, phase = %batch.phase))]
    pub async fn process(&self, batch: &Batch) -> TxnResult<BatchReport> {
        let _guard = self.locks.acquire_all().await?;
        info!(changes = batch.changes.len(), "Processing batch");

        let result = match batch.phase {
            BatchPhase::PreCommit => self.pre_commit(batch).await,
            BatchPhase::Commit => self.commit(batch).await,
            BatchPhase::Abort => Ok(self.abort(batch.id)),
        };

        if let Err(e) = &result {
            warn!(error = %e, "Batch rejected");
        }
        result
    }

    async fn pre_commit(&self, batch: &Batch) -> TxnResult<BatchReport> {
        // A repeated pre-commit replaces whatever was prepared before.
        self.prepared.lock().remove(&batch.id);
        let slots = self.prepare(&batch.changes).await?;
        let report = BatchReport::new(batch.id, BatchPhase::PreCommit, slots.len());
        self.prepared.lock().insert(batch.id, slots);
        Ok(report)
    }

    fn abort(&self, id: CorrelationId) -> BatchReport {
        let dropped = self.prepared.lock().remove(&id).map_or(0, |s| s.len());
        debug!(dropped, "Discarded prepared handlers");
        BatchReport::new(id, BatchPhase::Abort, dropped)
    }

    /// Runs `init` then `validate` for every change, stopping at the first
    /// failure. Nothing is written.
    async fn prepare(&self, changes: &[Change]) -> TxnResult<Vec<HandlerSlot>> {
        let mut slots = Vec::with_capacity(changes.len());

        for (index, change) in changes.iter().enumerate() {
            let entry = self
                .registry
                .lookup(&change.path)
                .map_err(|e| TxnError::rejected(index, "registry", e))?;
            let mut slot = HandlerSlot {
                index,
                path: change.path.to_string(),
                change: change.clone(),
                handler: entry.instantiate(),
                state: HandlerState::Created,
            };

            if let Err(e) = slot.handler.init(change).await {
                return Err(slot.reject(e));
            }
            slot.advance(HandlerState::Initialized)?;

            if let Err(e) = slot.handler.validate().await {
                return Err(slot.reject(e));
            }
            slot.advance(HandlerState::Validated)?;

            debug!(index, handler = slot.handler.name(), path = %slot.path, "Change validated");
            slots.push(slot);
        }

        Ok(slots)
    }

    async fn commit(&self, batch: &Batch) -> TxnResult<BatchReport> {
        let retained = self.prepared.lock().remove(&batch.id);
        let mut slots = match retained {
            Some(slots) if HandlerSlot::cover(&slots, &batch.changes) => slots,
            Some(_) => {
                warn!("Commit does not match the prepared changes, validating again");
                self.prepare(&batch.changes).await?
            }
            None => {
                debug!("No pre-commit seen for this edit, validating now");
                self.prepare(&batch.changes).await?
            }
        };

        let mut report = BatchReport::new(batch.id, BatchPhase::Commit, slots.len());

        for index in 0..slots.len() {
            let slot = &mut slots[index];
            match slot.handler.apply().await {
                Ok(outcome) => {
                    slot.advance(HandlerState::Applied)?;
                    match outcome {
                        ApplyOutcome::Written => report.applied += 1,
                        ApplyOutcome::Unchanged => {}
                        ApplyOutcome::Structural(delta) => report.structural.push(delta),
                    }
                }
                Err(e) => {
                    slot.advance(HandlerState::Failed)?;
                    let e = match e {
                        TxnError::Backend(source) => TxnError::apply_failure(&slot.path, source),
                        other => other,
                    };
                    let err = slot.reject(e);
                    Self::rollback(&mut slots[..=index]).await;
                    return Err(err);
                }
            }
        }

        if !report.structural.is_empty() {
            match &self.sink {
                Some(sink) => {
                    if let Err(e) = sink.submit(batch.id, report.structural.clone()).await {
                        Self::rollback(&mut slots).await;
                        return Err(e);
                    }
                }
                None => warn!(
                    deltas = report.structural.len(),
                    "No structural sink, deltas only reported"
                ),
            }
        }

        for slot in slots.iter_mut() {
            slot.advance(HandlerState::Committed)?;
        }
        info!(applied = report.applied, structural = report.structural.len(), "Batch committed");
        Ok(report)
    }

    /// Reverts applied and failed handlers, last first. Revert failures
    /// are logged; the remaining handlers are still reverted.
    async fn rollback(slots: &mut [HandlerSlot]) {
        for slot in slots.iter_mut().rev() {
            if !matches!(slot.state, HandlerState::Applied | HandlerState::Failed) {
                continue;
            }
            match slot.handler.revert().await {
                Ok(()) => {
                    slot.state = HandlerState::Reverted;
                    debug!(index = slot.index, handler = slot.handler.name(), "Change reverted");
                }
                Err(e) => warn!(
                    index = slot.index,
                    handler = slot.handler.name(),
                    path = %slot.path,
                    error = %e,
                    "Failed to revert change"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeKind;
    use crate::lock::LockPolicy;
    use cfgtxn_backend::BackendError;
    use cfgtxn_types::DataPath;
    use pretty_assertions::assert_eq;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Fails validation on value "invalid" and apply on value "boom".
    struct Recording {
        log: Log,
        leaf: String,
        value: Option<String>,
        path: Option<DataPath>,
        structural: bool,
    }

    #[async_trait]
    impl ChangeHandler for Recording {
        fn name(&self) -> &str {
            if self.structural {
                "structural"
            } else {
                "recording"
            }
        }

        async fn init(&mut self, change: &Change) -> TxnResult<()> {
            self.leaf = change.path.names().last().unwrap_or_default().to_string();
            self.value = change.new_value.clone();
            self.path = Some(change.path.clone());
            self.log.lock().push(format!("init {}", self.leaf));
            Ok(())
        }

        async fn validate(&mut self) -> TxnResult<()> {
            if self.value.as_deref() == Some("invalid") {
                return Err(TxnError::constraint(&self.leaf, "invalid value"));
            }
            Ok(())
        }

        async fn apply(&mut self) -> TxnResult<ApplyOutcome> {
            self.log.lock().push(format!("apply {}", self.leaf));
            if self.value.as_deref() == Some("boom") {
                return Err(BackendError::store("hset", &self.leaf, "connection reset").into());
            }
            if self.structural {
                return Ok(ApplyOutcome::Structural(StructuralDelta {
                    entity: "Ethernet1_1".to_string(),
                    field: self.leaf.clone(),
                    value: self.value.clone(),
                    kind: ChangeKind::Created,
                    path: self.path.clone().unwrap(),
                }));
            }
            Ok(ApplyOutcome::Written)
        }

        async fn revert(&mut self) -> TxnResult<()> {
            self.log.lock().push(format!("revert {}", self.leaf));
            Ok(())
        }
    }

    struct CollectingSink(Mutex<Vec<(CorrelationId, Vec<StructuralDelta>)>>);

    #[async_trait]
    impl StructuralSink for CollectingSink {
        async fn submit(&self, id: CorrelationId, deltas: Vec<StructuralDelta>) -> TxnResult<()> {
            self.0.lock().push((id, deltas));
            Ok(())
        }
    }

    fn coordinator(log: &Log) -> TransactionCoordinator {
        let plain = log.clone();
        let structural = log.clone();
        let registry = HandlerRegistry::new()
            .subtree("/interfaces/interface")
            .noop("/interfaces/interface/name")
            .handler("/interfaces/interface/*", "recording", move || Recording {
                log: plain.clone(),
                leaf: String::new(),
                value: None,
                path: None,
                structural: false,
            })
            .handler("/interfaces/interface/breakout/*", "structural", move || Recording {
                log: structural.clone(),
                leaf: String::new(),
                value: None,
                path: None,
                structural: true,
            });
        let locks = LockManager::new(&["interfaces", "vlan"], LockPolicy::default());
        TransactionCoordinator::new(Arc::new(registry), Arc::new(locks))
    }

    fn leaf(name: &str, value: &str) -> Change {
        let path = format!("/interfaces/interface[name='Ethernet1_1']/{}", name);
        Change::created(DataPath::parse(&path).unwrap(), value)
    }

    #[tokio::test]
    async fn test_revert_in_reverse_order() {
        let log: Log = Arc::default();
        let coord = coordinator(&log);
        let batch = Batch::new(
            1,
            BatchPhase::PreCommit,
            vec![
                leaf("admin-status", "up"),
                leaf("mtu", "1500"),
                leaf("speed", "boom"),
                leaf("fec", "rs"),
            ],
        );

        coord.process(&batch).await.unwrap();
        assert_eq!(coord.prepared_count(), 1);
        log.lock().clear();

        let err = coord
            .process(&batch.with_phase(BatchPhase::Commit))
            .await
            .unwrap_err();
        match &err {
            TxnError::Rejected { index, handler, source } => {
                assert_eq!(*index, 2);
                assert_eq!(handler, "recording");
                assert!(matches!(**source, TxnError::ApplyFailure { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            *log.lock(),
            vec![
                "apply admin-status",
                "apply mtu",
                "apply speed",
                "revert speed",
                "revert mtu",
                "revert admin-status",
            ]
        );
        assert_eq!(coord.prepared_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_blocks_apply() {
        let log: Log = Arc::default();
        let coord = coordinator(&log);
        let batch = Batch::new(
            2,
            BatchPhase::PreCommit,
            vec![leaf("mtu", "1500"), leaf("speed", "invalid"), leaf("fec", "rs")],
        );

        let err = coord.process(&batch).await.unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(err, TxnError::Rejected { index: 1, .. }));
        assert_eq!(coord.prepared_count(), 0);

        // A commit of the same edit validates again and still fails.
        let err = coord
            .process(&batch.with_phase(BatchPhase::Commit))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(!log.lock().iter().any(|l| l.starts_with("apply")));
    }

    #[tokio::test]
    async fn test_commit_without_pre_commit() {
        let log: Log = Arc::default();
        let coord = coordinator(&log);
        let batch = Batch::new(
            3,
            BatchPhase::Commit,
            vec![leaf("name", "Ethernet1_1"), leaf("mtu", "1500")],
        );

        let report = coord.process(&batch).await.unwrap();
        assert_eq!(report.handled, 2);
        assert_eq!(report.applied, 1);
        assert_eq!(*log.lock(), vec!["init mtu", "apply mtu"]);
    }

    #[tokio::test]
    async fn test_commit_with_different_changes_revalidates() {
        let log: Log = Arc::default();
        let coord = coordinator(&log);
        let prepared = Batch::new(5, BatchPhase::PreCommit, vec![leaf("mtu", "1500")]);
        coord.process(&prepared).await.unwrap();
        log.lock().clear();

        // Same id and length, different leaf.
        let redelivered = Batch::new(5, BatchPhase::Commit, vec![leaf("fec", "rs")]);
        let report = coord.process(&redelivered).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(*log.lock(), vec!["init fec", "apply fec"]);
        assert_eq!(coord.prepared_count(), 0);

        // Same path, different value.
        coord.process(&prepared).await.unwrap();
        log.lock().clear();
        let changed = Batch::new(5, BatchPhase::Commit, vec![leaf("mtu", "9100")]);
        coord.process(&changed).await.unwrap();
        assert_eq!(*log.lock(), vec!["init mtu", "apply mtu"]);
    }

    #[tokio::test]
    async fn test_abort_discards_prepared() {
        let log: Log = Arc::default();
        let coord = coordinator(&log);
        let batch = Batch::new(4, BatchPhase::PreCommit, vec![leaf("mtu", "1500")]);

        coord.process(&batch).await.unwrap();
        let report = coord
            .process(&batch.with_phase(BatchPhase::Abort))
            .await
            .unwrap();
        assert_eq!(report.handled, 1);
        assert_eq!(coord.prepared_count(), 0);
    }

    #[tokio::test]
    async fn test_structural_deltas_submitted_once() {
        let log: Log = Arc::default();
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let coord = coordinator(&log).with_structural_sink(sink.clone());
        let batch = Batch::new(
            5,
            BatchPhase::Commit,
            vec![
                leaf("breakout/num-channels", "4"),
                leaf("breakout/channel-speed", "SPEED_25GB"),
                leaf("mtu", "9100"),
            ],
        );

        let report = coord.process(&batch).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.structural.len(), 2);

        let submitted = sink.0.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, CorrelationId(5));
        let fields: Vec<&str> = submitted[0].1.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["num-channels", "channel-speed"]);
    }

    #[tokio::test]
    async fn test_unknown_subtree_rejected() {
        let log: Log = Arc::default();
        let coord = coordinator(&log);
        let batch = Batch::new(
            6,
            BatchPhase::PreCommit,
            vec![Change::created(DataPath::parse("/routing/static").unwrap(), "x")],
        );
        let err = coord.process(&batch).await.unwrap_err();
        assert!(matches!(
            err.root_cause(),
            TxnError::UnknownSubtree { .. }
        ));
    }
}
