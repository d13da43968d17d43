//! Operational state shared between orchestration and the read path.
//!
//! [`OperationalState`] holds what the read side needs beyond the stored
//! derived tree: the rebooting flag, counter baselines taken after the
//! last dataplane restart, and the last link state seen per interface.

use crate::tables::{
    fields, leaves, APP_PORT_TABLE_NAME, COUNTERS_PORT_NAME_MAP, COUNTERS_TABLE_NAME,
    INTERFACES_DOMAIN, PORT_COUNTERS,
};
use cfgtxn_backend::{find_node, BackendResult, Datastore, DbId, SwitchStore};
use cfgtxn_core::TxnResult;
use cfgtxn_types::DataPath;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Counter field → value for one interface.
pub type CounterValues = BTreeMap<String, u64>;

/// Counter baselines keyed by interface name.
pub type CounterBaselines = BTreeMap<String, CounterValues>;

#[derive(Debug, Default)]
pub struct OperationalState {
    rebooting: AtomicBool,
    baselines: Mutex<CounterBaselines>,
    link_state: Mutex<HashMap<String, String>>,
}

impl OperationalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_rebooting(&self) -> bool {
        self.rebooting.load(Ordering::SeqCst)
    }

    pub fn set_rebooting(&self, rebooting: bool) {
        let was = self.rebooting.swap(rebooting, Ordering::SeqCst);
        if was != rebooting {
            info!(rebooting, "Dataplane rebooting mode changed");
        }
    }

    /// Replaces the baselines and forgets the link states observed before
    /// them.
    pub fn set_baselines(&self, baselines: CounterBaselines) {
        *self.baselines.lock() = baselines;
        self.link_state.lock().clear();
    }

    pub fn baseline(&self, ifname: &str) -> Option<CounterValues> {
        self.baselines.lock().get(ifname).cloned()
    }

    pub fn baselines(&self) -> CounterBaselines {
        self.baselines.lock().clone()
    }

    /// Records a link state; returns true when it differs from the last
    /// one seen for the interface.
    pub fn record_link_state(&self, ifname: &str, state: &str) -> bool {
        let mut states = self.link_state.lock();
        match states.get(ifname) {
            Some(previous) if previous == state => false,
            _ => {
                states.insert(ifname.to_string(), state.to_string());
                true
            }
        }
    }
}

/// Reads the port counters of every interface in the counter name map.
pub async fn read_counters(store: &dyn SwitchStore) -> BackendResult<CounterBaselines> {
    let name_map = store.hgetall(DbId::CountersDb, COUNTERS_PORT_NAME_MAP).await?;
    let mut counters = CounterBaselines::new();
    for (ifname, oid) in name_map {
        let key = DbId::CountersDb.key(COUNTERS_TABLE_NAME, &[oid.as_str()]);
        let raw = store.hgetall(DbId::CountersDb, &key).await?;
        let values = PORT_COUNTERS
            .iter()
            .filter_map(|(field, _)| {
                let value = raw.get(*field)?.parse::<u64>().ok()?;
                Some((field.to_string(), value))
            })
            .collect();
        counters.insert(ifname, values);
    }
    Ok(counters)
}

/// Takes a fresh baseline snapshot into `state`.
pub async fn snapshot_counters(
    store: &dyn SwitchStore,
    state: &OperationalState,
) -> BackendResult<()> {
    let baselines = read_counters(store).await?;
    debug!(interfaces = baselines.len(), "Counter baselines taken");
    state.set_baselines(baselines);
    Ok(())
}

/// Result of a derived-state read.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedRead {
    /// The dataplane is restarting; derived state is stale.
    Unavailable,
    /// Node at the requested path; `Null` when absent.
    Ready(Value),
}

/// Read surface over derived state.
pub struct DerivedStateReader {
    datastore: Arc<dyn Datastore>,
    store: Option<Arc<dyn SwitchStore>>,
    state: Arc<OperationalState>,
}

impl DerivedStateReader {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        store: Option<Arc<dyn SwitchStore>>,
        state: Arc<OperationalState>,
    ) -> Self {
        Self {
            datastore,
            store,
            state,
        }
    }

    pub async fn read(&self, path: &DataPath) -> TxnResult<DerivedRead> {
        if self.state.is_rebooting() {
            return Ok(DerivedRead::Unavailable);
        }
        let domain = path.root();
        let mut tree = self.datastore.operational_tree(domain).await?;
        if domain == INTERFACES_DOMAIN {
            self.enrich_interfaces(&mut tree).await?;
        }
        Ok(DerivedRead::Ready(
            find_node(&tree, path).cloned().unwrap_or(Value::Null),
        ))
    }

    /// Counters accumulated since the last baseline.
    fn relative(&self, ifname: &str, values: &CounterValues) -> Map<String, Value> {
        let baseline = self.state.baseline(ifname).unwrap_or_default();
        PORT_COUNTERS
            .iter()
            .filter_map(|(field, leaf)| {
                let value = values.get(*field)?;
                let base = baseline.get(*field).copied().unwrap_or(0);
                Some((leaf.to_string(), Value::String(value.saturating_sub(base).to_string())))
            })
            .collect()
    }

    async fn enrich_interfaces(&self, tree: &mut Value) -> TxnResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(entries) = tree.get_mut("interface").and_then(Value::as_array_mut) else {
            return Ok(());
        };
        let counters = read_counters(store.as_ref()).await?;
        for entry in entries.iter_mut() {
            let Some(ifname) = entry.get(leaves::NAME).and_then(Value::as_str).map(str::to_string)
            else {
                continue;
            };
            let key = DbId::ApplDb.key(APP_PORT_TABLE_NAME, &[ifname.as_str()]);
            let oper = store.hget(DbId::ApplDb, &key, fields::OPER_STATUS).await?;
            let stats = counters.get(&ifname).map(|values| self.relative(&ifname, values));

            let Some(obj) = entry.as_object_mut() else {
                continue;
            };
            if let Some(oper) = oper {
                obj.insert(leaves::OPER_STATUS.to_string(), Value::String(oper.to_lowercase()));
            }
            if let Some(stats) = stats {
                obj.insert(leaves::STATISTICS.to_string(), Value::Object(stats));
            }
        }
        Ok(())
    }
}
