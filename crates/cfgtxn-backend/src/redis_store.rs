//! Redis-backed switch-state store.
//!
//! One [`ConnectionManager`] per database; managers are cheap to clone and
//! reconnect on their own, so every call works on a clone.

use crate::error::{BackendError, BackendResult};
use crate::store::{DbId, FieldValues, KeyEvent, KeyEventSource, SwitchStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

fn db_uri(host: &str, port: u16, db: DbId) -> String {
    format!("redis://{}:{}/{}", host, port, db.index())
}

/// [`SwitchStore`] over the SONiC Redis databases.
pub struct RedisStore {
    connections: HashMap<DbId, ConnectionManager>,
}

impl RedisStore {
    /// Connects to every switch-state database on `host:port`.
    #[instrument(skip_all)]
    pub async fn connect(host: &str, port: u16) -> BackendResult<Self> {
        debug!(host, port, "Connecting to switch-state databases");

        let mut connections = HashMap::new();
        for db in DbId::ALL {
            let uri = db_uri(host, port, db);
            let client = redis::Client::open(uri.as_str())
                .map_err(|e| BackendError::store("connect", &uri, e.to_string()))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(|e| BackendError::store("connect", &uri, e.to_string()))?;
            connections.insert(db, conn);
        }

        info!(host, port, "Connected to switch-state databases");
        Ok(Self { connections })
    }

    fn conn(&self, db: DbId) -> BackendResult<ConnectionManager> {
        self.connections
            .get(&db)
            .cloned()
            .ok_or_else(|| BackendError::store("select", db.to_string(), "database not connected"))
    }
}

#[async_trait]
impl SwitchStore for RedisStore {
    async fn hget(&self, db: DbId, key: &str, field: &str) -> BackendResult<Option<String>> {
        let mut conn = self.conn(db)?;
        conn.hget(key, field)
            .await
            .map_err(|e| BackendError::store("hget", key, e.to_string()))
    }

    async fn hgetall(&self, db: DbId, key: &str) -> BackendResult<FieldValues> {
        let mut conn = self.conn(db)?;
        conn.hgetall(key)
            .await
            .map_err(|e| BackendError::store("hgetall", key, e.to_string()))
    }

    #[instrument(skip(self))]
    async fn hset(&self, db: DbId, key: &str, field: &str, value: &str) -> BackendResult<()> {
        let mut conn = self.conn(db)?;
        debug!("HSET");
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| BackendError::store("hset", key, e.to_string()))
    }

    async fn hset_multiple(&self, db: DbId, key: &str, fvs: &FieldValues) -> BackendResult<()> {
        if fvs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn(db)?;
        let items: Vec<(&str, &str)> = fvs.iter().map(|(f, v)| (f.as_str(), v.as_str())).collect();
        conn.hset_multiple::<_, _, _, ()>(key, &items)
            .await
            .map_err(|e| BackendError::store("hmset", key, e.to_string()))
    }

    #[instrument(skip(self))]
    async fn hdel(&self, db: DbId, key: &str, field: &str) -> BackendResult<()> {
        let mut conn = self.conn(db)?;
        debug!("HDEL");
        conn.hdel::<_, _, ()>(key, field)
            .await
            .map_err(|e| BackendError::store("hdel", key, e.to_string()))
    }

    #[instrument(skip(self))]
    async fn del(&self, db: DbId, key: &str) -> BackendResult<()> {
        let mut conn = self.conn(db)?;
        debug!("DEL");
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| BackendError::store("del", key, e.to_string()))
    }

    async fn keys(&self, db: DbId, pattern: &str) -> BackendResult<Vec<String>> {
        let mut conn = self.conn(db)?;
        let mut keys: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| BackendError::store("keys", pattern, e.to_string()))?;
        keys.sort();
        Ok(keys)
    }
}

/// Blocking keyspace-notification subscription for one database.
///
/// Requires `notify-keyspace-events` to include `K` and hash events on the
/// server.
#[derive(Debug, Clone)]
pub struct RedisKeyspaceSource {
    pub host: String,
    pub port: u16,
    pub db: DbId,
    /// Key pattern, e.g. `PORT_TABLE:*`.
    pub pattern: String,
}

impl KeyEventSource for RedisKeyspaceSource {
    fn run(self: Box<Self>, tx: mpsc::Sender<KeyEvent>) -> BackendResult<()> {
        let client = redis::Client::open(db_uri(&self.host, self.port, self.db))?;
        let mut conn = client.get_connection()?;
        let mut pubsub = conn.as_pubsub();
        let channel = format!("__keyspace@{}__:{}", self.db.index(), self.pattern);
        pubsub.psubscribe(&channel)?;
        info!(channel = %channel, "Subscribed to keyspace notifications");

        loop {
            let msg = pubsub.get_message()?;
            let Some((_, key)) = msg.get_channel_name().split_once("__:") else {
                continue;
            };
            let operation: String = msg.get_payload()?;
            let event = KeyEvent {
                db: self.db,
                key: key.to_string(),
                operation,
            };
            if tx.blocking_send(event).is_err() {
                debug!("Keyspace receiver dropped, stopping subscription");
                return Ok(());
            }
        }
    }
}
