//! Domain locks serializing change batches.
//!
//! Every batch takes the same domains in the same fixed order (the order
//! the manager was created with), so two batches can never deadlock on
//! each other. Each domain is an in-process async mutex, optionally backed
//! by the datastore's advisory lock so that other datastore sessions are
//! excluded too. The advisory lock cannot be waited on, only polled, so it
//! is retried at a fixed interval.

use crate::error::{TxnError, TxnResult};
use cfgtxn_backend::{BackendError, Datastore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

/// Lock acquisition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Delay between advisory lock attempts.
    pub retry_interval: Duration,
    /// Upper bound on the whole acquisition; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(100),
            timeout: None,
        }
    }
}

struct DomainSlot {
    name: String,
    local: Arc<Mutex<()>>,
}

struct HeldDomain {
    name: String,
    _local: OwnedMutexGuard<()>,
    advisory: bool,
}

/// Holds a set of domain locks; releases them in reverse order on drop.
pub struct DomainGuard {
    held: Vec<HeldDomain>,
    advisory: Option<Arc<dyn Datastore>>,
}

impl DomainGuard {
    /// Held domains in acquisition order.
    pub fn domains(&self) -> Vec<&str> {
        self.held.iter().map(|h| h.name.as_str()).collect()
    }
}

impl Drop for DomainGuard {
    fn drop(&mut self) {
        while let Some(held) = self.held.pop() {
            if held.advisory {
                if let Some(datastore) = &self.advisory {
                    datastore.unlock(&held.name);
                }
            }
            trace!(domain = %held.name, "Released domain lock");
        }
    }
}

pub struct LockManager {
    domains: Vec<DomainSlot>,
    advisory: Option<Arc<dyn Datastore>>,
    policy: LockPolicy,
}

impl LockManager {
    /// Creates a manager whose lock order is the order of `domains`.
    pub fn new(domains: &[&str], policy: LockPolicy) -> Self {
        Self {
            domains: domains
                .iter()
                .map(|name| DomainSlot {
                    name: name.to_string(),
                    local: Arc::new(Mutex::new(())),
                })
                .collect(),
            advisory: None,
            policy,
        }
    }

    /// Also takes the datastore's advisory lock for every domain.
    pub fn with_advisory(mut self, datastore: Arc<dyn Datastore>) -> Self {
        self.advisory = Some(datastore);
        self
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    pub fn domains(&self) -> Vec<&str> {
        self.domains.iter().map(|d| d.name.as_str()).collect()
    }

    /// Acquires every domain, in the fixed order.
    pub async fn acquire_all(&self) -> TxnResult<DomainGuard> {
        self.acquire_slots(self.domains.iter().collect()).await
    }

    /// Acquires a subset of domains, still in the fixed order.
    pub async fn acquire(&self, names: &[&str]) -> TxnResult<DomainGuard> {
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.domains.iter().any(|d| d.name == **n))
        {
            return Err(TxnError::internal(format!("unknown lock domain '{}'", unknown)));
        }
        let slots = self
            .domains
            .iter()
            .filter(|d| names.contains(&d.name.as_str()))
            .collect();
        self.acquire_slots(slots).await
    }

    async fn acquire_slots(&self, slots: Vec<&DomainSlot>) -> TxnResult<DomainGuard> {
        let started = Instant::now();
        // Dropping the guard on an early return releases what was taken.
        let mut guard = DomainGuard {
            held: Vec::with_capacity(slots.len()),
            advisory: self.advisory.clone(),
        };

        for slot in slots {
            let local = match self.policy.timeout {
                None => slot.local.clone().lock_owned().await,
                Some(limit) => {
                    let remaining = limit.saturating_sub(started.elapsed());
                    tokio::time::timeout(remaining, slot.local.clone().lock_owned())
                        .await
                        .map_err(|_| TxnError::LockTimeout {
                            domain: slot.name.clone(),
                            waited: started.elapsed(),
                        })?
                }
            };
            let mut held = HeldDomain {
                name: slot.name.clone(),
                _local: local,
                advisory: false,
            };

            if let Some(datastore) = &self.advisory {
                self.take_advisory(datastore.as_ref(), &slot.name, started)
                    .await?;
                held.advisory = true;
            }

            trace!(domain = %slot.name, "Acquired domain lock");
            guard.held.push(held);
        }

        Ok(guard)
    }

    async fn take_advisory(
        &self,
        datastore: &dyn Datastore,
        domain: &str,
        started: Instant,
    ) -> TxnResult<()> {
        loop {
            match datastore.try_lock(domain) {
                Ok(()) => return Ok(()),
                Err(BackendError::LockHeld(_)) => {
                    if let Some(limit) = self.policy.timeout {
                        if started.elapsed() >= limit {
                            return Err(TxnError::LockTimeout {
                                domain: domain.to_string(),
                                waited: started.elapsed(),
                            });
                        }
                    }
                    debug!(domain, "Domain locked by another session, retrying");
                    tokio::time::sleep(self.policy.retry_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
