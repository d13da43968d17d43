//! VLAN handlers on the switch-state store.
//!
//! Every VLAN change touches exactly one row (`VLAN|<name>` or
//! `VLAN_MEMBER|<name>|<ifname>`); apply captures the whole row so revert
//! can put it back verbatim.

use crate::tables::{
    fields, leaves, CFG_PORT_TABLE_NAME, CFG_VLAN_MEMBER_TABLE_NAME, CFG_VLAN_TABLE_NAME,
};
use async_trait::async_trait;
use cfgtxn_backend::{DbId, FieldValues, SwitchStore};
use cfgtxn_core::{ApplyOutcome, Change, ChangeHandler, ChangeKind, TxnError, TxnResult};
use cfgtxn_types::{DataPath, ParseError, TaggingMode, VlanId};
use std::sync::Arc;
use tracing::debug;

/// Which node of the VLAN tree a handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanNode {
    /// `VLAN_LIST` entry.
    Entry,
    /// Scalar leaf of a `VLAN_LIST` entry, stored under its own name.
    Field,
    /// `members` leaf-list of a `VLAN_LIST` entry.
    Members,
    /// `VLAN_MEMBER_LIST` entry.
    MemberEntry,
    /// `tagging_mode` of a `VLAN_MEMBER_LIST` entry.
    TaggingMode,
}

impl VlanNode {
    pub const fn handler_name(&self) -> &'static str {
        match self {
            VlanNode::Entry => "vlan",
            VlanNode::Field => "vlan-field",
            VlanNode::Members => "vlan-members",
            VlanNode::MemberEntry => "vlan-member",
            VlanNode::TaggingMode => "vlan-tagging-mode",
        }
    }

    const fn list(&self) -> &'static str {
        match self {
            VlanNode::Entry | VlanNode::Field | VlanNode::Members => "VLAN_LIST",
            VlanNode::MemberEntry | VlanNode::TaggingMode => "VLAN_MEMBER_LIST",
        }
    }
}

/// Resolved target of one VLAN change.
#[derive(Debug, Clone)]
struct VlanTarget {
    path: DataPath,
    kind: ChangeKind,
    vlan: VlanId,
    /// Member interface for membership nodes.
    ifname: Option<String>,
    key: String,
    value: Option<String>,
}

pub struct VlanHandler {
    node: VlanNode,
    store: Arc<dyn SwitchStore>,
    target: Option<VlanTarget>,
    prior: Option<FieldValues>,
}

impl VlanHandler {
    pub fn new(node: VlanNode, store: Arc<dyn SwitchStore>) -> Self {
        Self {
            node,
            store,
            target: None,
            prior: None,
        }
    }

    fn target(&self) -> TxnResult<&VlanTarget> {
        self.target.as_ref().ok_or_else(|| {
            TxnError::internal(format!("{} handler used before init", self.node.handler_name()))
        })
    }

    async fn port_exists(&self, ifname: &str) -> TxnResult<bool> {
        let key = DbId::ConfigDb.key(CFG_PORT_TABLE_NAME, &[ifname]);
        Ok(self.store.exists(DbId::ConfigDb, &key).await?)
    }

    /// Row contents after applying the change to `row`.
    fn next_row(&self, target: &VlanTarget, row: &FieldValues) -> Option<FieldValues> {
        let mut next = row.clone();
        let deleting = target.kind == ChangeKind::Deleted;
        match self.node {
            VlanNode::Entry | VlanNode::MemberEntry if deleting => return None,
            VlanNode::Entry => {
                next.entry(fields::VLANID.to_string())
                    .or_insert_with(|| target.vlan.to_string());
            }
            VlanNode::MemberEntry => {
                next.entry(fields::TAGGING_MODE.to_string())
                    .or_insert_with(|| TaggingMode::default().as_str().to_string());
            }
            VlanNode::Field => {
                let field = target.path.leaf().to_string();
                match &target.value {
                    Some(value) if !deleting => {
                        next.insert(field, value.clone());
                    }
                    _ => {
                        next.remove(&field);
                    }
                }
            }
            VlanNode::Members => {
                let ifname = target.ifname.clone().unwrap_or_default();
                let mut members: Vec<String> = next
                    .get(fields::MEMBERS)
                    .map(|m| m.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
                    .unwrap_or_default();
                if deleting {
                    members.retain(|m| m != &ifname);
                } else if !members.contains(&ifname) {
                    members.push(ifname);
                }
                if members.is_empty() {
                    next.remove(fields::MEMBERS);
                } else {
                    next.insert(fields::MEMBERS.to_string(), members.join(","));
                }
            }
            VlanNode::TaggingMode => {
                let mode = match &target.value {
                    Some(value) if !deleting => value.clone(),
                    _ => TaggingMode::default().as_str().to_string(),
                };
                next.insert(fields::TAGGING_MODE.to_string(), mode);
            }
        }
        Some(next)
    }

    /// Replaces the row at `key` with `row`, touching only what differs.
    async fn write_row(
        &self,
        key: &str,
        current: &FieldValues,
        row: Option<&FieldValues>,
    ) -> TxnResult<()> {
        let Some(row) = row.filter(|r| !r.is_empty()) else {
            self.store.del(DbId::ConfigDb, key).await?;
            return Ok(());
        };
        for field in current.keys().filter(|f| !row.contains_key(*f)) {
            self.store.hdel(DbId::ConfigDb, key, field).await?;
        }
        let changed: FieldValues = row
            .iter()
            .filter(|(f, v)| current.get(*f) != Some(*v))
            .map(|(f, v)| (f.clone(), v.clone()))
            .collect();
        if !changed.is_empty() {
            self.store.hset_multiple(DbId::ConfigDb, key, &changed).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeHandler for VlanHandler {
    fn name(&self) -> &str {
        self.node.handler_name()
    }

    async fn init(&mut self, change: &Change) -> TxnResult<()> {
        let path = &change.path;
        let list = self.node.list();
        let name = path
            .key(list, leaves::NAME)
            .ok_or_else(|| TxnError::invalid_target(path, "missing VLAN name"))?;
        let vlan: VlanId = name
            .parse()
            .map_err(|e: ParseError| TxnError::invalid_target(path, e.to_string()))?;

        let vlan_name = vlan.name();
        let (ifname, key) = match self.node {
            VlanNode::Entry | VlanNode::Field => {
                (None, DbId::ConfigDb.key(CFG_VLAN_TABLE_NAME, &[vlan_name.as_str()]))
            }
            VlanNode::Members => {
                let ifname = path
                    .leaf_key(".")
                    .map(str::to_string)
                    .or_else(|| change.new_value.clone())
                    .or_else(|| change.old_value.clone())
                    .ok_or_else(|| TxnError::invalid_target(path, "missing member interface"))?;
                (Some(ifname), DbId::ConfigDb.key(CFG_VLAN_TABLE_NAME, &[vlan_name.as_str()]))
            }
            VlanNode::MemberEntry | VlanNode::TaggingMode => {
                let ifname = path
                    .key(list, leaves::IFNAME)
                    .ok_or_else(|| TxnError::invalid_target(path, "missing member interface"))?
                    .to_string();
                let key = DbId::ConfigDb.key(
                    CFG_VLAN_MEMBER_TABLE_NAME,
                    &[vlan_name.as_str(), ifname.as_str()],
                );
                (Some(ifname), key)
            }
        };

        self.target = Some(VlanTarget {
            path: path.clone(),
            kind: change.kind,
            vlan,
            ifname,
            key,
            value: change.new_value.clone(),
        });
        Ok(())
    }

    async fn validate(&mut self) -> TxnResult<()> {
        let target = self.target()?.clone();
        let adding = target.kind != ChangeKind::Deleted;

        if let (Some(ifname), true) = (&target.ifname, adding) {
            if matches!(self.node, VlanNode::Members | VlanNode::MemberEntry)
                && !self.port_exists(ifname).await?
            {
                return Err(TxnError::invalid_target(
                    &target.path,
                    format!("interface {} not found", ifname),
                ));
            }
        }

        match (self.node, &target.value) {
            (VlanNode::Field, Some(value)) if target.path.leaf() == fields::VLANID => {
                if value.parse::<u16>().ok() != Some(target.vlan.as_u16()) {
                    return Err(TxnError::constraint(
                        &target.path,
                        format!("vlanid {} does not match {}", value, target.vlan.name()),
                    ));
                }
            }
            (VlanNode::TaggingMode, Some(value)) => {
                value
                    .parse::<TaggingMode>()
                    .map_err(|e| TxnError::constraint(&target.path, e.to_string()))?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn apply(&mut self) -> TxnResult<ApplyOutcome> {
        let target = self.target()?.clone();
        let current = self.store.hgetall(DbId::ConfigDb, &target.key).await?;
        self.prior = Some(current.clone());

        let next = self.next_row(&target, &current);
        let unchanged = match &next {
            Some(row) => row == &current,
            None => current.is_empty(),
        };
        if unchanged {
            return Ok(ApplyOutcome::Unchanged);
        }

        self.write_row(&target.key, &current, next.as_ref()).await?;
        debug!(key = %target.key, node = ?self.node, "Applied VLAN change");
        Ok(ApplyOutcome::Written)
    }

    async fn revert(&mut self) -> TxnResult<()> {
        let Some(prior) = self.prior.take() else {
            return Ok(());
        };
        let key = self.target()?.key.clone();
        let current = self.store.hgetall(DbId::ConfigDb, &key).await?;
        if current != prior {
            self.write_row(&key, &current, Some(&prior)).await?;
            debug!(key = %key, "Reverted VLAN row");
        }
        Ok(())
    }
}
