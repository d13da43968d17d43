//! Link-state watchers.
//!
//! Switch-state agents learn link changes from store key events. Key-event
//! sources block on their own subscription, so each one runs on a
//! dedicated OS thread and hands events to the runtime through a bounded
//! channel. Hardware agents learn them from alarm notifications forwarded
//! by the attribute monitors. Either way a single task consumes the
//! channel and emits the link-state notification.

use crate::error::{AgentError, AgentResult};
use crate::oper::OperationalState;
use crate::tables::{
    fields, APP_PORT_TABLE_NAME, LINK_STATE_NOTIFY_EVENT, PCS_FAULTS, PCS_READY, PCS_STATUS,
};
use cfgtxn_backend::{AttrEvent, Datastore, DbId, KeyEvent, KeyEventSource, SwitchStore};
use cfgtxn_core::TxnResult;
use cfgtxn_types::OperState;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Starts `source` on its own thread. Events arrive on the returned
/// receiver until the source ends.
pub fn spawn_bridge(
    source: Box<dyn KeyEventSource>,
    capacity: usize,
) -> AgentResult<(mpsc::Receiver<KeyEvent>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = std::thread::Builder::new()
        .name("key-events".to_string())
        .spawn(move || {
            if let Err(e) = source.run(tx) {
                error!(error = %e, "Key event source stopped");
            }
        })
        .map_err(AgentError::Io)?;
    Ok((rx, handle))
}

/// Emits a notification whenever an interface's operational status
/// changes in APPL_DB.
pub struct LinkStateWatcher {
    store: Arc<dyn SwitchStore>,
    datastore: Arc<dyn Datastore>,
    state: Arc<OperationalState>,
}

impl LinkStateWatcher {
    pub fn new(
        store: Arc<dyn SwitchStore>,
        datastore: Arc<dyn Datastore>,
        state: Arc<OperationalState>,
    ) -> Self {
        Self {
            store,
            datastore,
            state,
        }
    }

    /// Consumes events until the channel closes or `shutdown` fires.
    /// Returns the number of notifications sent.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<KeyEvent>,
        shutdown: CancellationToken,
    ) -> usize {
        let mut sent = 0;
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match self.handle(&event).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => warn!(key = %event.key, error = %e, "Failed to process key event"),
            }
        }
        info!(sent, "Link state watcher stopped");
        sent
    }

    /// Handles one event; returns true when a notification was sent.
    pub async fn handle(&self, event: &KeyEvent) -> TxnResult<bool> {
        if event.db != DbId::ApplDb {
            return Ok(false);
        }
        let Some((table, ifname)) = DbId::ApplDb.split_key(&event.key) else {
            return Ok(false);
        };
        if table != APP_PORT_TABLE_NAME {
            return Ok(false);
        }
        if self.state.is_rebooting() {
            debug!(interface = ifname, "Dataplane rebooting, link event suppressed");
            return Ok(false);
        }

        let Some(oper) = self
            .store
            .hget(DbId::ApplDb, &event.key, fields::OPER_STATUS)
            .await?
        else {
            return Ok(false);
        };
        let oper = oper.to_lowercase();
        if !self.state.record_link_state(ifname, &oper) {
            return Ok(false);
        }

        notify_link_state(self.datastore.as_ref(), ifname, &oper).await?;
        Ok(true)
    }
}

async fn notify_link_state(datastore: &dyn Datastore, ifname: &str, oper: &str) -> TxnResult<()> {
    info!(interface = ifname, oper_status = %oper, "Link state changed");
    datastore
        .send_notification(
            LINK_STATE_NOTIFY_EVENT,
            json!({ "if-name": ifname, "oper-status": oper }),
        )
        .await?;
    Ok(())
}

/// Link state implied by a PCS status list: up only when the PCS is
/// ready and reports neither fault.
pub fn pcs_status_to_oper<S: AsRef<str>>(pcs: &[S]) -> OperState {
    let has = |flag: &str| pcs.iter().any(|s| s.as_ref() == flag);
    if has(PCS_READY) && !PCS_FAULTS.iter().any(|fault| has(fault)) {
        OperState::Up
    } else {
        OperState::Down
    }
}

/// Emits a notification whenever an alarm from a hardware interface
/// changes its PCS-derived link state.
///
/// Alarm values are JSON objects keyed by attribute; only `pcs-status`
/// is looked at. The monitored object name is the interface name.
pub struct AlarmWatcher {
    datastore: Arc<dyn Datastore>,
    state: Arc<OperationalState>,
}

impl AlarmWatcher {
    pub fn new(datastore: Arc<dyn Datastore>, state: Arc<OperationalState>) -> Self {
        Self { datastore, state }
    }

    /// Consumes alarms until every monitor is gone or `shutdown` fires.
    /// Returns the number of notifications sent.
    pub async fn run(
        &self,
        mut alarms: mpsc::Receiver<AttrEvent>,
        shutdown: CancellationToken,
    ) -> usize {
        let mut sent = 0;
        loop {
            let alarm = tokio::select! {
                _ = shutdown.cancelled() => break,
                alarm = alarms.recv() => match alarm {
                    Some(alarm) => alarm,
                    None => break,
                },
            };
            match self.handle(&alarm).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => warn!(alarm = ?alarm, error = %e, "Failed to process alarm"),
            }
        }
        info!(sent, "Alarm watcher stopped");
        sent
    }

    /// Handles one alarm; returns true when a notification was sent.
    pub async fn handle(&self, alarm: &AttrEvent) -> TxnResult<bool> {
        let AttrEvent::Changed { object, value, .. } = alarm else {
            return Ok(false);
        };
        let payload: Value = match serde_json::from_str(value) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(interface = %object, error = %e, "Alarm is not JSON, ignoring");
                return Ok(false);
            }
        };
        let pcs: Vec<&str> = match payload.get(PCS_STATUS) {
            Some(Value::Array(flags)) => flags.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(flag)) => vec![flag.as_str()],
            _ => return Ok(false),
        };

        let oper = pcs_status_to_oper(&pcs).to_string();
        if !self.state.record_link_state(object, &oper) {
            return Ok(false);
        }
        notify_link_state(self.datastore.as_ref(), object, &oper).await?;
        Ok(true)
    }
}
