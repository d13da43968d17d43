//! Change records and batches delivered by the datastore.

use cfgtxn_types::DataPath;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One edit of the configuration tree. Immutable once delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub path: DataPath,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
}

impl Change {
    pub fn created(path: DataPath, value: impl Into<String>) -> Self {
        Self {
            path,
            kind: ChangeKind::Created,
            old_value: None,
            new_value: Some(value.into()),
        }
    }

    /// A created node without a scalar value (container, list entry, leaf-list member).
    pub fn created_node(path: DataPath) -> Self {
        Self {
            path,
            kind: ChangeKind::Created,
            old_value: None,
            new_value: None,
        }
    }

    pub fn modified(path: DataPath, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            path,
            kind: ChangeKind::Modified,
            old_value: Some(old.into()),
            new_value: Some(new.into()),
        }
    }

    pub fn deleted(path: DataPath, old: Option<String>) -> Self {
        Self {
            path,
            kind: ChangeKind::Deleted,
            old_value: old,
            new_value: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Deleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPhase {
    /// Validation only; the edit may still be rejected.
    PreCommit,
    /// The edit is final; only an explicit revert can undo it.
    Commit,
    /// The datastore abandoned an edit that passed pre-commit.
    Abort,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchPhase::PreCommit => "pre-commit",
            BatchPhase::Commit => "commit",
            BatchPhase::Abort => "abort",
        };
        f.write_str(s)
    }
}

/// Shared by the pre-commit and commit deliveries of one logical edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordered changes delivered together in one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: CorrelationId,
    pub phase: BatchPhase,
    pub changes: Vec<Change>,
}

impl Batch {
    pub fn new(id: u64, phase: BatchPhase, changes: Vec<Change>) -> Self {
        Self {
            id: CorrelationId(id),
            phase,
            changes,
        }
    }

    /// The same edit delivered in another phase.
    pub fn with_phase(&self, phase: BatchPhase) -> Self {
        Self {
            id: self.id,
            phase,
            changes: self.changes.clone(),
        }
    }
}
