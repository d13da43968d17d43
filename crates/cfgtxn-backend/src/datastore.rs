//! Authoritative datastore boundary.
//!
//! The datastore owns the intended-state tree, per-domain advisory locks,
//! the operational (derived) tree published to readers, and asynchronous
//! notifications. Trees are JSON values shaped like the schema; a domain's
//! tree holds the children of its root container.

use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use cfgtxn_types::{DataPath, PathSegment};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[async_trait]
pub trait Datastore: Send + Sync {
    /// Running configuration of one domain (`Value::Null` when empty).
    async fn running_tree(&self, domain: &str) -> BackendResult<Value>;

    /// Takes the advisory lock on `domain` without waiting.
    ///
    /// Fails with [`BackendError::LockHeld`] when another session holds it.
    fn try_lock(&self, domain: &str) -> BackendResult<()>;

    fn unlock(&self, domain: &str);

    async fn send_notification(&self, name: &str, payload: Value) -> BackendResult<()>;

    /// Replaces the operational tree of one domain.
    async fn replace_operational(&self, domain: &str, tree: Value) -> BackendResult<()>;

    async fn operational_tree(&self, domain: &str) -> BackendResult<Value>;
}

/// Stringifies a scalar tree value.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn entry_matches(entry: &Value, keys: &[(String, String)]) -> bool {
    keys.iter()
        .all(|(k, v)| entry.get(k).and_then(scalar_string).as_deref() == Some(v.as_str()))
}

/// Finds the node addressed by `path` inside its domain tree.
pub fn find_node<'v>(tree: &'v Value, path: &DataPath) -> Option<&'v Value> {
    let mut node = tree;
    for seg in &path.segments()[1..] {
        let child = node.get(&seg.name)?;
        node = if seg.keys.is_empty() {
            child
        } else {
            child
                .as_array()?
                .iter()
                .find(|entry| entry_matches(entry, &seg.keys))?
        };
    }
    Some(node)
}

fn child_mut<'v>(node: &'v mut Value, seg: &PathSegment, create: bool) -> Option<&'v mut Value> {
    let obj = node.as_object_mut()?;
    if !obj.contains_key(&seg.name) {
        if !create {
            return None;
        }
        let empty = if seg.keys.is_empty() {
            Value::Object(Map::new())
        } else {
            Value::Array(Vec::new())
        };
        obj.insert(seg.name.clone(), empty);
    }
    let child = obj.get_mut(&seg.name)?;
    if seg.keys.is_empty() {
        return Some(child);
    }

    let list = child.as_array_mut()?;
    let pos = match list.iter().position(|e| entry_matches(e, &seg.keys)) {
        Some(pos) => pos,
        None if create => {
            let entry: Map<String, Value> = seg
                .keys
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            list.push(Value::Object(entry));
            list.len() - 1
        }
        None => return None,
    };
    list.get_mut(pos)
}

/// In-memory [`Datastore`], optionally seeded from a JSON file of
/// `{ "<domain>": <tree>, ... }`.
#[derive(Default)]
pub struct MemoryDatastore {
    running: Mutex<BTreeMap<String, Value>>,
    operational: Mutex<BTreeMap<String, Value>>,
    locks: Mutex<BTreeSet<String>>,
    notifications: Mutex<Vec<(String, Value)>>,
    operational_writes: AtomicUsize,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(config: Value) -> BackendResult<Self> {
        let domains = match config {
            Value::Object(domains) => domains,
            Value::Null => Map::new(),
            _ => {
                return Err(BackendError::datastore(
                    "load",
                    "startup configuration must be an object keyed by domain",
                ))
            }
        };
        let store = Self::new();
        store.running.lock().extend(domains);
        Ok(store)
    }

    pub fn load(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BackendError::datastore("load", format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(serde_json::from_str(&raw)?)
    }

    pub fn set_running(&self, domain: &str, tree: Value) {
        self.running.lock().insert(domain.to_string(), tree);
    }

    /// Creates or updates the node at `path`. `None` creates a container,
    /// list entry or leaf-list member without a scalar value.
    pub fn set_node(&self, path: &DataPath, value: Option<&str>) -> BackendResult<()> {
        let mut running = self.running.lock();
        let root = running
            .entry(path.root().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if root.is_null() {
            *root = Value::Object(Map::new());
        }
        let bad_shape =
            || BackendError::datastore("edit", format!("{} does not fit the tree", path));

        let Some((last, inner)) = path.segments()[1..].split_last() else {
            return Err(BackendError::datastore("edit", "cannot replace a whole domain"));
        };
        let mut node = root;
        for seg in inner {
            node = child_mut(node, seg, true).ok_or_else(bad_shape)?;
        }

        if let Some(member) = last.key(".") {
            let obj = node.as_object_mut().ok_or_else(bad_shape)?;
            let list = obj
                .entry(last.name.clone())
                .or_insert_with(|| Value::Array(Vec::new()))
                .as_array_mut()
                .ok_or_else(bad_shape)?;
            if !list.iter().any(|m| m.as_str() == Some(member)) {
                list.push(Value::String(member.to_string()));
            }
        } else if !last.keys.is_empty() {
            child_mut(node, last, true).ok_or_else(bad_shape)?;
        } else {
            let obj = node.as_object_mut().ok_or_else(bad_shape)?;
            let leaf = match value {
                Some(v) => Value::String(v.to_string()),
                None => Value::Object(Map::new()),
            };
            obj.insert(last.name.clone(), leaf);
        }
        debug!(path = %path, "Running configuration updated");
        Ok(())
    }

    /// Removes the node at `path`; absent nodes are ignored.
    pub fn delete_node(&self, path: &DataPath) -> BackendResult<()> {
        let mut running = self.running.lock();
        let Some(root) = running.get_mut(path.root()) else {
            return Ok(());
        };
        let Some((last, inner)) = path.segments()[1..].split_last() else {
            *root = Value::Null;
            return Ok(());
        };
        let mut node = root;
        for seg in inner {
            match child_mut(node, seg, false) {
                Some(child) => node = child,
                None => return Ok(()),
            }
        }
        let Some(obj) = node.as_object_mut() else {
            return Ok(());
        };

        if let Some(member) = last.key(".") {
            if let Some(list) = obj.get_mut(&last.name).and_then(Value::as_array_mut) {
                list.retain(|m| m.as_str() != Some(member));
            }
        } else if !last.keys.is_empty() {
            if let Some(list) = obj.get_mut(&last.name).and_then(Value::as_array_mut) {
                list.retain(|e| !entry_matches(e, &last.keys));
            }
        } else {
            obj.remove(&last.name);
        }
        Ok(())
    }

    pub fn notifications(&self) -> Vec<(String, Value)> {
        self.notifications.lock().clone()
    }

    /// Number of operational tree replacements so far.
    pub fn operational_writes(&self) -> usize {
        self.operational_writes.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self, domain: &str) -> bool {
        self.locks.lock().contains(domain)
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn running_tree(&self, domain: &str) -> BackendResult<Value> {
        Ok(self
            .running
            .lock()
            .get(domain)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn try_lock(&self, domain: &str) -> BackendResult<()> {
        if self.locks.lock().insert(domain.to_string()) {
            Ok(())
        } else {
            Err(BackendError::LockHeld(domain.to_string()))
        }
    }

    fn unlock(&self, domain: &str) {
        self.locks.lock().remove(domain);
    }

    async fn send_notification(&self, name: &str, payload: Value) -> BackendResult<()> {
        self.notifications.lock().push((name.to_string(), payload));
        Ok(())
    }

    async fn replace_operational(&self, domain: &str, tree: Value) -> BackendResult<()> {
        self.operational.lock().insert(domain.to_string(), tree);
        self.operational_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn operational_tree(&self, domain: &str) -> BackendResult<Value> {
        Ok(self
            .operational
            .lock()
            .get(domain)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn path(s: &str) -> DataPath {
        DataPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_set_and_find_nodes() {
        let ds = MemoryDatastore::new();
        ds.set_node(
            &path("/interfaces/interface[name='Ethernet1_1']/ipv4/mtu"),
            Some("9000"),
        )
        .unwrap();
        ds.set_node(
            &path("/interfaces/interface[name='Ethernet1_1']/admin-status"),
            Some("up"),
        )
        .unwrap();

        let tree = ds.running_tree("interfaces").await.unwrap();
        assert_eq!(
            tree,
            json!({"interface": [
                {"name": "Ethernet1_1", "ipv4": {"mtu": "9000"}, "admin-status": "up"}
            ]})
        );
        assert_eq!(
            find_node(&tree, &path("/interfaces/interface[name='Ethernet1_1']/ipv4/mtu")),
            Some(&json!("9000"))
        );
        assert_eq!(
            find_node(&tree, &path("/interfaces/interface[name='Ethernet2_1']/ipv4/mtu")),
            None
        );
    }

    #[tokio::test]
    async fn test_leaf_list_and_entry_edits() {
        let ds = MemoryDatastore::new();
        let member = path("/vlan/VLAN/VLAN_LIST[name='Vlan10']/members[.='Ethernet1_1']");
        ds.set_node(&member, None).unwrap();
        ds.set_node(&member, None).unwrap();
        ds.set_node(&path("/vlan/VLAN/VLAN_LIST[name='Vlan10']/vlanid"), Some("10"))
            .unwrap();

        let tree = ds.running_tree("vlan").await.unwrap();
        assert_eq!(
            tree,
            json!({"VLAN": {"VLAN_LIST": [
                {"name": "Vlan10", "members": ["Ethernet1_1"], "vlanid": "10"}
            ]}})
        );

        ds.delete_node(&member).unwrap();
        ds.delete_node(&path("/vlan/VLAN/VLAN_LIST[name='Vlan10']")).unwrap();
        assert_eq!(
            ds.running_tree("vlan").await.unwrap(),
            json!({"VLAN": {"VLAN_LIST": []}})
        );
    }

    #[test]
    fn test_find_node_numeric_keys() {
        let tree = json!({"interface": [{"name": "Ethernet1_1", "breakout": {"num-channels": 4}}]});
        assert_eq!(
            find_node(
                &tree,
                &path("/interfaces/interface[name='Ethernet1_1']/breakout/num-channels")
            )
            .and_then(scalar_string),
            Some("4".to_string())
        );
    }

    #[test]
    fn test_advisory_locks() {
        let ds = MemoryDatastore::new();
        ds.try_lock("interfaces").unwrap();
        assert!(matches!(
            ds.try_lock("interfaces"),
            Err(BackendError::LockHeld(_))
        ));
        ds.unlock("interfaces");
        assert!(ds.try_lock("interfaces").is_ok());
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(MemoryDatastore::from_json(json!([1, 2])).is_err());
        assert!(MemoryDatastore::from_json(Value::Null).is_ok());
    }
}
