//! Switch-state key-value store boundary.
//!
//! The store is organized as numbered databases holding hashes. Keys are
//! `TABLE<sep>name` where the separator is `|` for CONFIG_DB/STATE_DB and
//! `:` for APPL_DB/COUNTERS_DB.

use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tokio::sync::mpsc;

/// Field → value map of one hash, ordered for deterministic iteration.
pub type FieldValues = BTreeMap<String, String>;

/// Switch-state database selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DbId {
    /// APPL_DB (database 0) - application state
    ApplDb,
    /// COUNTERS_DB (database 2) - counter statistics
    CountersDb,
    /// CONFIG_DB (database 4) - switch configuration
    ConfigDb,
    /// STATE_DB (database 6) - hardware state
    StateDb,
}

impl DbId {
    pub const ALL: [DbId; 4] = [DbId::ApplDb, DbId::CountersDb, DbId::ConfigDb, DbId::StateDb];

    /// Redis database index.
    pub const fn index(&self) -> i64 {
        match self {
            DbId::ApplDb => 0,
            DbId::CountersDb => 2,
            DbId::ConfigDb => 4,
            DbId::StateDb => 6,
        }
    }

    /// Table/name separator used by keys in this database.
    pub const fn separator(&self) -> char {
        match self {
            DbId::ConfigDb | DbId::StateDb => '|',
            DbId::ApplDb | DbId::CountersDb => ':',
        }
    }

    /// Builds `TABLE<sep>part1<sep>part2...`.
    pub fn key(&self, table: &str, parts: &[&str]) -> String {
        let mut key = table.to_string();
        for part in parts {
            key.push(self.separator());
            key.push_str(part);
        }
        key
    }

    /// Splits a key into its table and the remainder.
    pub fn split_key<'a>(&self, key: &'a str) -> Option<(&'a str, &'a str)> {
        key.split_once(self.separator())
    }
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbId::ApplDb => "APPL_DB",
            DbId::CountersDb => "COUNTERS_DB",
            DbId::ConfigDb => "CONFIG_DB",
            DbId::StateDb => "STATE_DB",
        };
        f.write_str(name)
    }
}

/// Flat key → field → value store (the switch-state backend of record).
#[async_trait]
pub trait SwitchStore: Send + Sync {
    async fn hget(&self, db: DbId, key: &str, field: &str) -> BackendResult<Option<String>>;

    /// Returns all fields of `key`; empty when the key does not exist.
    async fn hgetall(&self, db: DbId, key: &str) -> BackendResult<FieldValues>;

    async fn hset(&self, db: DbId, key: &str, field: &str, value: &str) -> BackendResult<()>;

    async fn hset_multiple(&self, db: DbId, key: &str, fvs: &FieldValues) -> BackendResult<()> {
        for (field, value) in fvs {
            self.hset(db, key, field, value).await?;
        }
        Ok(())
    }

    async fn hdel(&self, db: DbId, key: &str, field: &str) -> BackendResult<()>;

    async fn del(&self, db: DbId, key: &str) -> BackendResult<()>;

    /// Keys matching a glob pattern (`*`, `?`), sorted.
    async fn keys(&self, db: DbId, pattern: &str) -> BackendResult<Vec<String>>;

    async fn exists(&self, db: DbId, key: &str) -> BackendResult<bool> {
        Ok(!self.hgetall(db, key).await?.is_empty())
    }
}

/// Out-of-band key change observed on the store's pub/sub channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub db: DbId,
    pub key: String,
    /// Command that touched the key (`hset`, `del`, ...).
    pub operation: String,
}

/// A blocking producer of key events.
///
/// `run` is called on a dedicated OS thread and hands every event to the
/// scheduler through `tx` until the source ends or the receiver is dropped.
pub trait KeyEventSource: Send + 'static {
    fn run(self: Box<Self>, tx: mpsc::Sender<KeyEvent>) -> BackendResult<()>;
}

impl KeyEventSource for Vec<KeyEvent> {
    fn run(self: Box<Self>, tx: mpsc::Sender<KeyEvent>) -> BackendResult<()> {
        for event in *self {
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Matches `text` against a glob with `*` and `?` wildcards.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// A write observed by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Set {
        db: DbId,
        key: String,
        field: String,
        value: String,
    },
    DelField {
        db: DbId,
        key: String,
        field: String,
    },
    DelKey {
        db: DbId,
        key: String,
    },
}

impl StoreWrite {
    pub fn key(&self) -> &str {
        match self {
            StoreWrite::Set { key, .. }
            | StoreWrite::DelField { key, .. }
            | StoreWrite::DelKey { key, .. } => key,
        }
    }
}

/// In-memory [`SwitchStore`] with a write log and write fault injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<(DbId, String), FieldValues>>,
    writes: Mutex<Vec<StoreWrite>>,
    failing: Mutex<BTreeSet<(String, Option<String>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts fields without recording a write.
    pub fn seed(&self, db: DbId, key: &str, fields: &[(&str, &str)]) {
        let mut tables = self.tables.lock();
        let entry = tables.entry((db, key.to_string())).or_default();
        for (field, value) in fields {
            entry.insert(field.to_string(), value.to_string());
        }
    }

    /// Snapshot of one hash.
    pub fn table(&self, db: DbId, key: &str) -> FieldValues {
        self.tables
            .lock()
            .get(&(db, key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every hash in every database.
    pub fn dump(&self) -> BTreeMap<(DbId, String), FieldValues> {
        self.tables.lock().clone()
    }

    pub fn writes(&self) -> Vec<StoreWrite> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    /// Makes writes to `key` fail; restricted to `field` when given.
    pub fn fail_writes(&self, key: &str, field: Option<&str>) {
        self.failing
            .lock()
            .insert((key.to_string(), field.map(str::to_string)));
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    fn check_failure(&self, operation: &str, key: &str, field: Option<&str>) -> BackendResult<()> {
        let failing = self.failing.lock();
        let hit = failing.contains(&(key.to_string(), None))
            || field.is_some_and(|f| failing.contains(&(key.to_string(), Some(f.to_string()))));
        if hit {
            Err(BackendError::store(operation, key, "injected write failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SwitchStore for MemoryStore {
    async fn hget(&self, db: DbId, key: &str, field: &str) -> BackendResult<Option<String>> {
        Ok(self
            .tables
            .lock()
            .get(&(db, key.to_string()))
            .and_then(|fvs| fvs.get(field).cloned()))
    }

    async fn hgetall(&self, db: DbId, key: &str) -> BackendResult<FieldValues> {
        Ok(self.table(db, key))
    }

    async fn hset(&self, db: DbId, key: &str, field: &str, value: &str) -> BackendResult<()> {
        self.check_failure("hset", key, Some(field))?;
        self.tables
            .lock()
            .entry((db, key.to_string()))
            .or_default()
            .insert(field.to_string(), value.to_string());
        self.writes.lock().push(StoreWrite::Set {
            db,
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn hdel(&self, db: DbId, key: &str, field: &str) -> BackendResult<()> {
        self.check_failure("hdel", key, Some(field))?;
        let mut tables = self.tables.lock();
        let id = (db, key.to_string());
        if let Some(fvs) = tables.get_mut(&id) {
            fvs.remove(field);
            // A hash without fields does not exist.
            if fvs.is_empty() {
                tables.remove(&id);
            }
        }
        self.writes.lock().push(StoreWrite::DelField {
            db,
            key: key.to_string(),
            field: field.to_string(),
        });
        Ok(())
    }

    async fn del(&self, db: DbId, key: &str) -> BackendResult<()> {
        self.check_failure("del", key, None)?;
        self.tables.lock().remove(&(db, key.to_string()));
        self.writes.lock().push(StoreWrite::DelKey {
            db,
            key: key.to_string(),
        });
        Ok(())
    }

    async fn keys(&self, db: DbId, pattern: &str) -> BackendResult<Vec<String>> {
        Ok(self
            .tables
            .lock()
            .keys()
            .filter(|(d, key)| *d == db && glob_match(pattern, key))
            .map(|(_, key)| key.clone())
            .collect())
    }
}
