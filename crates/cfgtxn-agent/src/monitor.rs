//! Hardware attribute monitors.

use cfgtxn_backend::{AttrEvent, BackendError, BackendResult, HardwareApi};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What a hardware agent monitors on each interface object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub attribute: String,
    /// Poll interval while a cancelled monitor waits for its object to go.
    pub drain_interval: Duration,
    /// Bound of the channel shared by all monitors.
    pub capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            attribute: "alarm-notification".to_string(),
            drain_interval: Duration::from_millis(100),
            capacity: 1024,
        }
    }
}

/// One running monitor per interface object, all feeding one channel.
pub struct InterfaceMonitors {
    tasks: Vec<(String, JoinHandle<BackendResult<usize>>)>,
}

impl InterfaceMonitors {
    /// Spawns a monitor of `settings.attribute` on each object. The
    /// returned receiver closes once every monitor has ended.
    pub fn spawn(
        hw: Arc<dyn HardwareApi>,
        objects: Vec<String>,
        settings: &MonitorSettings,
        shutdown: &CancellationToken,
    ) -> (Self, mpsc::Receiver<AttrEvent>) {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let tasks = objects
            .into_iter()
            .map(|object| {
                let task = tokio::spawn(monitor_attribute(
                    hw.clone(),
                    object.clone(),
                    settings.attribute.clone(),
                    tx.clone(),
                    shutdown.clone(),
                    settings.drain_interval,
                ));
                (object, task)
            })
            .collect::<Vec<_>>();
        info!(
            monitors = tasks.len(),
            attribute = %settings.attribute,
            "Interface monitors started"
        );
        (Self { tasks }, rx)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every monitor to end. Call after cancelling the token the
    /// monitors were spawned with. Returns the total events forwarded.
    pub async fn drain(self) -> usize {
        let mut forwarded = 0;
        for (object, task) in self.tasks {
            match task.await {
                Ok(Ok(count)) => forwarded += count,
                Ok(Err(e)) => warn!(object = %object, error = %e, "Monitor failed"),
                Err(e) => warn!(object = %object, error = %e, "Monitor task panicked"),
            }
        }
        debug!(forwarded, "Interface monitors drained");
        forwarded
    }
}

/// Forwards change events of one attribute to `out`.
///
/// Once `shutdown` fires the monitor keeps watching until the object is
/// reported gone, so the backend subscription is released on its side
/// first. Returns the number of events forwarded.
#[instrument(skip(hw, out, shutdown))]
pub async fn monitor_attribute(
    hw: Arc<dyn HardwareApi>,
    object: String,
    attribute: String,
    out: mpsc::Sender<AttrEvent>,
    shutdown: CancellationToken,
    poll_interval: Duration,
) -> BackendResult<usize> {
    let mut events = Some(hw.monitor(&object, &attribute).await?);
    let mut forwarded = 0;

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = recv(&mut events) => event,
        };
        match event {
            Some(AttrEvent::ObjectGone { .. }) => {
                info!("Monitored object removed");
                return Ok(forwarded);
            }
            Some(event) => {
                if out.send(event).await.is_ok() {
                    forwarded += 1;
                }
            }
            None => {
                debug!("Monitor subscription closed, waiting for shutdown");
                events = None;
            }
        }
    }

    debug!("Monitor cancelled, draining until object is gone");
    loop {
        if object_gone(hw.as_ref(), &object, &attribute).await? {
            break;
        }
        tokio::select! {
            event = recv(&mut events) => match event {
                Some(AttrEvent::ObjectGone { .. }) => break,
                Some(_) => {}
                None => events = None,
            },
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    info!(forwarded, "Monitor stopped");
    Ok(forwarded)
}

async fn recv(events: &mut Option<mpsc::Receiver<AttrEvent>>) -> Option<AttrEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn object_gone(hw: &dyn HardwareApi, object: &str, attribute: &str) -> BackendResult<bool> {
    match hw.get(object, attribute).await {
        Ok(None) | Err(BackendError::ObjectNotFound(_)) => Ok(true),
        Ok(Some(_)) | Err(BackendError::AttributeUnsupported { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}
