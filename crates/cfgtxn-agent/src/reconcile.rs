//! Full replay of the running configuration and rebuild of derived state.
//!
//! A pass writes every configured leaf to the backend of record (schema
//! defaults standing in for unset leaves), then throws away the derived
//! trees and rebuilds them from what the backend holds. Writes are skipped
//! when the backend already holds the value, so a second pass with no
//! intervening change writes nothing.

use crate::handlers::{AttrKind, AttributeBackend};
use crate::schema::{leaf, list_entries, set_leaf, SchemaDefaults};
use crate::tables::{
    fields, leaves, CFG_VLAN_MEMBER_TABLE_NAME, CFG_VLAN_TABLE_NAME, INTERFACES_DOMAIN,
    VLAN_DOMAIN,
};
use cfgtxn_backend::{scalar_string, Datastore, DbId, FieldValues, SwitchStore};
use cfgtxn_core::TxnResult;
use cfgtxn_types::{ChannelSpeed, InterfaceName, TaggingMode};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Interfaces present in the rebuilt derived tree.
    pub interfaces: usize,
    pub vlans: usize,
    /// Backend writes the pass had to perform.
    pub backend_writes: usize,
}

pub struct ReconciliationEngine {
    datastore: Arc<dyn Datastore>,
    attrs: Arc<dyn AttributeBackend>,
    /// Switch-state store; VLANs are reconciled only when present.
    store: Option<Arc<dyn SwitchStore>>,
    defaults: Arc<SchemaDefaults>,
}

impl ReconciliationEngine {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        attrs: Arc<dyn AttributeBackend>,
        store: Option<Arc<dyn SwitchStore>>,
        defaults: Arc<SchemaDefaults>,
    ) -> Self {
        Self {
            datastore,
            attrs,
            store,
            defaults,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> TxnResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let running = self.datastore.running_tree(INTERFACES_DOMAIN).await?;
        report.backend_writes += self.replay_interfaces(&running).await?;
        report.backend_writes += self.fill_defaults().await?;

        if let Some(store) = &self.store {
            let vlans = self.datastore.running_tree(VLAN_DOMAIN).await?;
            report.backend_writes += replay_vlans(store.as_ref(), &vlans).await?;
        }

        let (interfaces, count) = self.derive_interfaces().await?;
        report.interfaces = count;
        self.datastore
            .replace_operational(INTERFACES_DOMAIN, interfaces)
            .await?;

        if let Some(store) = &self.store {
            let (vlans, count) = derive_vlans(store.as_ref()).await?;
            report.vlans = count;
            self.datastore.replace_operational(VLAN_DOMAIN, vlans).await?;
        }

        info!(
            interfaces = report.interfaces,
            vlans = report.vlans,
            writes = report.backend_writes,
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Writes `raw` unless the backend already holds it.
    async fn converge(&self, entity: &str, kind: AttrKind, raw: &str) -> TxnResult<bool> {
        let current = self.attrs.read(entity, kind).await?;
        if current.as_deref() == Some(raw) {
            return Ok(false);
        }
        self.attrs.write(entity, kind, raw).await?;
        debug!(entity, leaf = kind.leaf(), value = raw, "Replayed attribute");
        Ok(true)
    }

    async fn replay_interfaces(&self, running: &Value) -> TxnResult<usize> {
        let mut entries: Vec<(String, &Value)> = list_entries(running, "interface")
            .filter_map(|e| leaf(e, leaves::NAME).map(|name| (name, e)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut writes = 0;
        for (name, entry) in entries {
            let Some(entity) = self.attrs.resolve(&name).await? else {
                warn!(
                    interface = %name,
                    backend = self.attrs.name(),
                    "Configured interface not in backend, skipping"
                );
                continue;
            };
            for kind in AttrKind::REPLAY_ORDER {
                if self.attrs.attribute(kind).is_none() {
                    continue;
                }
                let value = leaf(entry, kind.leaf())
                    .or_else(|| self.defaults.get(kind.leaf()).map(str::to_string));
                let Some(value) = value else {
                    continue;
                };
                let raw = self.attrs.encode(kind, &value);
                if self.converge(&entity, kind, &raw).await? {
                    writes += 1;
                }
            }
        }
        Ok(writes)
    }

    /// Backend entities with no configuration still get schema defaults
    /// for attributes they leave unset.
    async fn fill_defaults(&self) -> TxnResult<usize> {
        let mut writes = 0;
        for entity in self.attrs.entities().await? {
            for kind in AttrKind::REPLAY_ORDER {
                let Some(default) = self.defaults.get(kind.leaf()) else {
                    continue;
                };
                if self.attrs.attribute(kind).is_none() {
                    continue;
                }
                if self.attrs.read(&entity, kind).await?.is_none() {
                    let raw = self.attrs.encode(kind, default);
                    self.attrs.write(&entity, kind, &raw).await?;
                    writes += 1;
                }
            }
        }
        Ok(writes)
    }

    /// Interfaces tree rebuilt from the backend, with breakout
    /// parent/child relations recomputed from the interface names.
    async fn derive_interfaces(&self) -> TxnResult<(Value, usize)> {
        let entities = self.attrs.entities().await?;
        let names: BTreeSet<InterfaceName> =
            entities.iter().filter_map(|e| e.parse().ok()).collect();

        let mut list = Vec::with_capacity(entities.len());
        for entity in &entities {
            let mut entry = Map::new();
            entry.insert(leaves::NAME.to_string(), Value::String(entity.clone()));

            let mut speed = None;
            for kind in AttrKind::REPLAY_ORDER {
                if self.attrs.attribute(kind).is_none() {
                    continue;
                }
                if let Some(raw) = self.attrs.read(entity, kind).await? {
                    let value = self.attrs.decode(kind, &raw);
                    if kind == AttrKind::Speed {
                        speed = value.parse::<u32>().ok();
                    }
                    set_leaf(&mut entry, kind.leaf(), Value::String(value));
                }
            }

            if let Ok(name) = entity.parse::<InterfaceName>() {
                if name.is_breakout_child() {
                    set_leaf(
                        &mut entry,
                        "breakout/parent",
                        Value::String(name.parent().to_string()),
                    );
                } else {
                    let children = names
                        .iter()
                        .filter(|n| n.port() == name.port() && n.is_breakout_child())
                        .count();
                    if children > 0 {
                        set_leaf(&mut entry, "breakout/num-channels", json!(children + 1));
                        if let Some(speed) = speed.and_then(ChannelSpeed::from_mbps) {
                            set_leaf(&mut entry, "breakout/channel-speed", json!(speed.as_str()));
                        }
                    }
                }
            }
            list.push(Value::Object(entry));
        }
        let count = list.len();
        Ok((json!({ "interface": list }), count))
    }
}

async fn converge_row(
    store: &dyn SwitchStore,
    key: &str,
    desired: &FieldValues,
) -> TxnResult<usize> {
    let current = store.hgetall(DbId::ConfigDb, key).await?;
    let changed: FieldValues = desired
        .iter()
        .filter(|(f, v)| current.get(*f) != Some(*v))
        .map(|(f, v)| (f.clone(), v.clone()))
        .collect();
    if changed.is_empty() {
        return Ok(0);
    }
    store.hset_multiple(DbId::ConfigDb, key, &changed).await?;
    debug!(key, fields = changed.len(), "Replayed row");
    Ok(changed.len())
}

async fn replay_vlans(store: &dyn SwitchStore, running: &Value) -> TxnResult<usize> {
    let mut writes = 0;
    let empty = Value::Null;
    let vlan_lists = running.get("VLAN").unwrap_or(&empty);
    for entry in list_entries(vlan_lists, "VLAN_LIST") {
        let Some(name) = leaf(entry, leaves::NAME) else {
            continue;
        };
        let mut row = FieldValues::new();
        if let Some(obj) = entry.as_object() {
            for (field, value) in obj {
                if field == leaves::NAME {
                    continue;
                }
                if field == leaves::MEMBERS {
                    let members: Vec<String> = value
                        .as_array()
                        .map(|m| m.iter().filter_map(scalar_string).collect())
                        .unwrap_or_default();
                    if !members.is_empty() {
                        row.insert(fields::MEMBERS.to_string(), members.join(","));
                    }
                } else if let Some(value) = scalar_string(value) {
                    row.insert(field.clone(), value);
                }
            }
        }
        let key = DbId::ConfigDb.key(CFG_VLAN_TABLE_NAME, &[name.as_str()]);
        writes += converge_row(store, &key, &row).await?;
    }

    let member_lists = running.get("VLAN_MEMBER").unwrap_or(&empty);
    for entry in list_entries(member_lists, "VLAN_MEMBER_LIST") {
        let (Some(name), Some(ifname)) = (leaf(entry, leaves::NAME), leaf(entry, leaves::IFNAME))
        else {
            continue;
        };
        let mode = leaf(entry, leaves::TAGGING_MODE)
            .unwrap_or_else(|| TaggingMode::default().as_str().to_string());
        let mut row = FieldValues::new();
        row.insert(fields::TAGGING_MODE.to_string(), mode);
        let key = DbId::ConfigDb.key(CFG_VLAN_MEMBER_TABLE_NAME, &[name.as_str(), ifname.as_str()]);
        writes += converge_row(store, &key, &row).await?;
    }
    Ok(writes)
}

/// VLAN tree rebuilt from the switch-state store.
async fn derive_vlans(store: &dyn SwitchStore) -> TxnResult<(Value, usize)> {
    let vlan_keys = store
        .keys(DbId::ConfigDb, &DbId::ConfigDb.key(CFG_VLAN_TABLE_NAME, &["*"]))
        .await?;
    let mut vlans = Vec::with_capacity(vlan_keys.len());
    for key in &vlan_keys {
        let Some((_, name)) = DbId::ConfigDb.split_key(key) else {
            continue;
        };
        let mut entry = Map::new();
        entry.insert(leaves::NAME.to_string(), Value::String(name.to_string()));
        for (field, value) in store.hgetall(DbId::ConfigDb, key).await? {
            if field == fields::MEMBERS {
                let members: Vec<Value> = value
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(|m| Value::String(m.to_string()))
                    .collect();
                entry.insert(leaves::MEMBERS.to_string(), Value::Array(members));
            } else {
                entry.insert(field, Value::String(value));
            }
        }
        vlans.push(Value::Object(entry));
    }

    let member_keys = store
        .keys(DbId::ConfigDb, &DbId::ConfigDb.key(CFG_VLAN_MEMBER_TABLE_NAME, &["*"]))
        .await?;
    let mut members = Vec::with_capacity(member_keys.len());
    for key in &member_keys {
        let Some((name, ifname)) = DbId::ConfigDb
            .split_key(key)
            .and_then(|(_, rest)| rest.split_once(DbId::ConfigDb.separator()))
        else {
            continue;
        };
        let mut entry: BTreeMap<String, Value> = BTreeMap::new();
        entry.insert(leaves::NAME.to_string(), Value::String(name.to_string()));
        entry.insert(leaves::IFNAME.to_string(), Value::String(ifname.to_string()));
        for (field, value) in store.hgetall(DbId::ConfigDb, key).await? {
            entry.insert(field, Value::String(value));
        }
        members.push(Value::Object(entry.into_iter().collect()));
    }

    let count = vlans.len();
    Ok((
        json!({
            "VLAN": { "VLAN_LIST": vlans },
            "VLAN_MEMBER": { "VLAN_MEMBER_LIST": members },
        }),
        count,
    ))
}
