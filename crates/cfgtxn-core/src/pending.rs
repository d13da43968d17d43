//! Paired structural fields waiting for their partner.
//!
//! A structural entity (e.g. a breakout group) can only be acted on once
//! every required field is known. Fields arrive one change at a time,
//! possibly across batches; entries are dropped once consumed.

use std::collections::BTreeMap;

/// Field → value of one pending entity; `None` records a deletion.
pub type PendingFields = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingStatus {
    /// Still waiting for the listed fields.
    Incomplete { missing: Vec<String> },
    Ready,
    /// The entity's structure is being removed; no partner is needed.
    Removal,
}

#[derive(Debug, Clone, Default)]
struct PendingEntry {
    fields: PendingFields,
    removal: bool,
}

#[derive(Debug, Clone)]
pub struct PendingBackendChanges {
    required: Vec<String>,
    entries: BTreeMap<String, PendingEntry>,
}

impl PendingBackendChanges {
    /// `required` lists the fields that must all be present.
    pub fn new(required: &[&str]) -> Self {
        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entries.contains_key(entity)
    }

    /// Records a field value for `entity`.
    pub fn record(&mut self, entity: &str, field: &str, value: Option<String>) -> PendingStatus {
        let entry = self.entries.entry(entity.to_string()).or_default();
        entry.fields.insert(field.to_string(), value);
        self.status(entity)
    }

    /// Marks `entity` for structural removal.
    pub fn record_removal(&mut self, entity: &str) -> PendingStatus {
        self.entries.entry(entity.to_string()).or_default().removal = true;
        PendingStatus::Removal
    }

    pub fn missing(&self, entity: &str) -> Vec<String> {
        match self.entries.get(entity) {
            Some(entry) if !entry.removal => self
                .required
                .iter()
                .filter(|f| !matches!(entry.fields.get(*f), Some(Some(_))))
                .cloned()
                .collect(),
            Some(_) => Vec::new(),
            None => self.required.clone(),
        }
    }

    pub fn status(&self, entity: &str) -> PendingStatus {
        match self.entries.get(entity) {
            Some(entry) if entry.removal => PendingStatus::Removal,
            _ => {
                let missing = self.missing(entity);
                if missing.is_empty() {
                    PendingStatus::Ready
                } else {
                    PendingStatus::Incomplete { missing }
                }
            }
        }
    }

    /// Entities still waiting for a field.
    pub fn incomplete(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter(|e| matches!(self.status(e), PendingStatus::Incomplete { .. }))
            .cloned()
            .collect()
    }

    /// Removes and returns every ready or removal entry.
    ///
    /// Removals carry no fields.
    pub fn drain_ready(&mut self) -> Vec<(String, Option<PendingFields>)> {
        let ready: Vec<String> = self
            .entries
            .keys()
            .filter(|e| !matches!(self.status(e), PendingStatus::Incomplete { .. }))
            .cloned()
            .collect();

        ready
            .into_iter()
            .filter_map(|entity| {
                let entry = self.entries.remove(&entity)?;
                let fields = if entry.removal {
                    None
                } else {
                    Some(entry.fields)
                };
                Some((entity, fields))
            })
            .collect()
    }

    pub fn remove(&mut self, entity: &str) -> bool {
        self.entries.remove(entity).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
