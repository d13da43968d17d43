//! Schema defaults and helpers over domain trees.
//!
//! Domain trees are JSON values holding the children of the domain root,
//! e.g. `{"interface": [{"name": "Ethernet1_1", "ipv4": {"mtu": "9100"}}]}`.
//! Leaves are addressed relative to their list entry (`ipv4/mtu`).

use cfgtxn_backend::scalar_string;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Default values the schema declares for optional leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDefaults {
    defaults: BTreeMap<String, String>,
}

impl SchemaDefaults {
    pub fn builtin() -> Self {
        let defaults = [("admin-status", "down"), ("ipv4/mtu", "9100"), ("fec", "none")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { defaults }
    }

    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (leaf, value) in overrides {
            self.defaults.insert(leaf.clone(), value.clone());
        }
        self
    }

    pub fn get(&self, leaf: &str) -> Option<&str> {
        self.defaults.get(leaf).map(String::as_str)
    }
}

/// Entries of the list `name` directly under `tree`.
pub fn list_entries<'v>(tree: &'v Value, name: &str) -> impl Iterator<Item = &'v Value> {
    tree.get(name)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|e| e.is_object())
}

/// Reads a scalar leaf at a relative path like `ipv4/mtu`.
pub fn leaf(entry: &Value, rel: &str) -> Option<String> {
    let mut node = entry;
    for part in rel.split('/') {
        node = node.get(part)?;
    }
    scalar_string(node)
}

/// Writes a leaf at a relative path, creating containers on the way.
pub fn set_leaf(entry: &mut Map<String, Value>, rel: &str, value: Value) {
    let mut parts: Vec<&str> = rel.split('/').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut node = entry;
    for part in parts {
        let child = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        // Just made sure it is an object.
        let Some(obj) = child.as_object_mut() else {
            return;
        };
        node = obj;
    }
    node.insert(last.to_string(), value);
}
