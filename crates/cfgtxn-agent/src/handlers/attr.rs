//! Interface attribute handlers.
//!
//! One [`AttributeHandler`] implementation serves every scalar interface
//! leaf on every backend. What differs per backend (entity lookup,
//! attribute names, value encoding, capabilities) sits behind
//! [`AttributeBackend`].

use crate::config::InterfaceLimits;
use crate::schema::SchemaDefaults;
use crate::tables::{fields, CFG_PORT_TABLE_NAME};
use async_trait::async_trait;
use cfgtxn_backend::{
    AttrCapability, BackendError, BackendResult, DbId, HardwareApi, SwitchStore,
};
use cfgtxn_core::{ApplyOutcome, Change, ChangeHandler, HandlerContext, TxnError, TxnResult};
use std::sync::Arc;
use tracing::debug;

/// Interface leaves with a direct backend attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttrKind {
    AdminStatus,
    Speed,
    Fec,
    Mtu,
    Description,
    Alias,
}

impl AttrKind {
    /// Order in which a full replay writes an interface's attributes.
    /// Admin status goes last so a port comes up fully configured.
    pub const REPLAY_ORDER: [AttrKind; 6] = [
        AttrKind::Mtu,
        AttrKind::Speed,
        AttrKind::Fec,
        AttrKind::Description,
        AttrKind::Alias,
        AttrKind::AdminStatus,
    ];

    /// Leaf path relative to the interface entry.
    pub const fn leaf(&self) -> &'static str {
        match self {
            AttrKind::AdminStatus => "admin-status",
            AttrKind::Speed => "speed",
            AttrKind::Fec => "fec",
            AttrKind::Mtu => "ipv4/mtu",
            AttrKind::Description => "description",
            AttrKind::Alias => "alias",
        }
    }

    pub const fn handler_name(&self) -> &'static str {
        match self {
            AttrKind::AdminStatus => "admin-status",
            AttrKind::Speed => "speed",
            AttrKind::Fec => "fec",
            AttrKind::Mtu => "mtu",
            AttrKind::Description => "description",
            AttrKind::Alias => "alias",
        }
    }

    /// Free-form text leaves; deleting them clears the backend field.
    pub const fn is_free_form(&self) -> bool {
        matches!(self, AttrKind::Description | AttrKind::Alias)
    }

    /// Registry pattern of the leaf.
    pub fn pattern(&self) -> String {
        format!("/interfaces/interface/{}", self.leaf())
    }
}

/// Backend-specific side of the attribute handlers.
#[async_trait]
pub trait AttributeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Backend attribute for `kind`; `None` when the backend has none.
    fn attribute(&self, kind: AttrKind) -> Option<&'static str>;

    /// Every entity the backend holds, sorted.
    async fn entities(&self) -> BackendResult<Vec<String>>;

    /// Backend entity for an interface name; `None` when unknown.
    async fn resolve(&self, interface: &str) -> BackendResult<Option<String>>;

    /// Configuration value → backend value.
    fn encode(&self, _kind: AttrKind, value: &str) -> String {
        value.to_string()
    }

    /// Backend value → configuration value.
    fn decode(&self, _kind: AttrKind, raw: &str) -> String {
        raw.to_string()
    }

    /// Constraints on the encoded value.
    async fn capability(&self, entity: &str, kind: AttrKind) -> BackendResult<AttrCapability>;

    /// Current encoded value; `None` when unset.
    async fn read(&self, entity: &str, kind: AttrKind) -> BackendResult<Option<String>>;

    async fn write(&self, entity: &str, kind: AttrKind, raw: &str) -> BackendResult<()>;

    async fn clear(&self, entity: &str, kind: AttrKind) -> BackendResult<()>;
}

/// Interface attributes as fields of the CONFIG_DB `PORT` table.
pub struct SwitchPortAttributes {
    store: Arc<dyn SwitchStore>,
    limits: InterfaceLimits,
}

impl SwitchPortAttributes {
    pub fn new(store: Arc<dyn SwitchStore>, limits: InterfaceLimits) -> Self {
        Self { store, limits }
    }

    fn key(entity: &str) -> String {
        DbId::ConfigDb.key(CFG_PORT_TABLE_NAME, &[entity])
    }

    fn field(kind: AttrKind) -> &'static str {
        match kind {
            AttrKind::AdminStatus => fields::ADMIN_STATUS,
            AttrKind::Speed => fields::SPEED,
            AttrKind::Fec => fields::FEC,
            AttrKind::Mtu => fields::MTU,
            AttrKind::Description => fields::DESCRIPTION,
            AttrKind::Alias => fields::ALIAS,
        }
    }
}

#[async_trait]
impl AttributeBackend for SwitchPortAttributes {
    fn name(&self) -> &'static str {
        "switch-state"
    }

    fn attribute(&self, kind: AttrKind) -> Option<&'static str> {
        Some(Self::field(kind))
    }

    async fn entities(&self) -> BackendResult<Vec<String>> {
        let pattern = DbId::ConfigDb.key(CFG_PORT_TABLE_NAME, &["Ethernet*"]);
        Ok(self
            .store
            .keys(DbId::ConfigDb, &pattern)
            .await?
            .iter()
            .filter_map(|key| DbId::ConfigDb.split_key(key).map(|(_, name)| name.to_string()))
            .collect())
    }

    async fn resolve(&self, interface: &str) -> BackendResult<Option<String>> {
        let exists = self.store.exists(DbId::ConfigDb, &Self::key(interface)).await?;
        Ok(exists.then(|| interface.to_string()))
    }

    async fn capability(&self, _entity: &str, kind: AttrKind) -> BackendResult<AttrCapability> {
        Ok(match kind {
            AttrKind::AdminStatus => AttrCapability::enumerated(["up", "down"]),
            AttrKind::Fec => AttrCapability::enumerated(["none", "rs", "fc"]),
            AttrKind::Speed => {
                AttrCapability::enumerated(self.limits.valid_speeds.iter().map(u32::to_string))
            }
            AttrKind::Mtu => AttrCapability::range(
                f64::from(self.limits.mtu_min),
                f64::from(self.limits.mtu_max),
            ),
            AttrKind::Description | AttrKind::Alias => AttrCapability::default(),
        })
    }

    async fn read(&self, entity: &str, kind: AttrKind) -> BackendResult<Option<String>> {
        self.store
            .hget(DbId::ConfigDb, &Self::key(entity), Self::field(kind))
            .await
    }

    async fn write(&self, entity: &str, kind: AttrKind, raw: &str) -> BackendResult<()> {
        self.store
            .hset(DbId::ConfigDb, &Self::key(entity), Self::field(kind), raw)
            .await
    }

    async fn clear(&self, entity: &str, kind: AttrKind) -> BackendResult<()> {
        self.store
            .hdel(DbId::ConfigDb, &Self::key(entity), Self::field(kind))
            .await
    }
}

/// Interface attributes of hardware-abstraction objects.
///
/// Admin status maps onto transmitter disable (`tx-dis`, inverted); the
/// hardware has no speed, description or alias attribute.
pub struct HardwareAttributes {
    hw: Arc<dyn HardwareApi>,
}

impl HardwareAttributes {
    pub const TX_DISABLE: &'static str = "tx-dis";
    pub const FEC_TYPE: &'static str = "fec-type";
    pub const MTU: &'static str = "mtu";

    pub fn new(hw: Arc<dyn HardwareApi>) -> Self {
        Self { hw }
    }

    fn require(&self, kind: AttrKind) -> BackendResult<&'static str> {
        self.attribute(kind).ok_or_else(|| BackendError::AttributeUnsupported {
            object: "*".to_string(),
            attribute: kind.leaf().to_string(),
        })
    }
}

#[async_trait]
impl AttributeBackend for HardwareAttributes {
    fn name(&self) -> &'static str {
        "hardware"
    }

    fn attribute(&self, kind: AttrKind) -> Option<&'static str> {
        match kind {
            AttrKind::AdminStatus => Some(Self::TX_DISABLE),
            AttrKind::Fec => Some(Self::FEC_TYPE),
            AttrKind::Mtu => Some(Self::MTU),
            AttrKind::Speed | AttrKind::Description | AttrKind::Alias => None,
        }
    }

    async fn entities(&self) -> BackendResult<Vec<String>> {
        let mut objects = self.hw.list_objects().await?;
        objects.sort();
        Ok(objects)
    }

    async fn resolve(&self, interface: &str) -> BackendResult<Option<String>> {
        let known = self.hw.has_object(interface).await?;
        Ok(known.then(|| interface.to_string()))
    }

    fn encode(&self, kind: AttrKind, value: &str) -> String {
        match kind {
            AttrKind::AdminStatus => {
                if value.eq_ignore_ascii_case("up") {
                    "false".to_string()
                } else {
                    "true".to_string()
                }
            }
            AttrKind::Fec => value.to_lowercase(),
            _ => value.to_string(),
        }
    }

    fn decode(&self, kind: AttrKind, raw: &str) -> String {
        match kind {
            AttrKind::AdminStatus => {
                if raw == "false" {
                    "up".to_string()
                } else {
                    "down".to_string()
                }
            }
            _ => raw.to_string(),
        }
    }

    async fn capability(&self, entity: &str, kind: AttrKind) -> BackendResult<AttrCapability> {
        let attribute = self.require(kind)?;
        self.hw.capability(entity, attribute).await
    }

    async fn read(&self, entity: &str, kind: AttrKind) -> BackendResult<Option<String>> {
        let attribute = self.require(kind)?;
        match self.hw.get(entity, attribute).await {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => Err(BackendError::ObjectNotFound(entity.to_string())),
            Err(BackendError::AttributeUnsupported { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, entity: &str, kind: AttrKind, raw: &str) -> BackendResult<()> {
        let attribute = self.require(kind)?;
        self.hw.set(entity, attribute, raw).await
    }

    async fn clear(&self, entity: &str, kind: AttrKind) -> BackendResult<()> {
        Err(BackendError::AttributeUnsupported {
            object: entity.to_string(),
            attribute: self.require(kind)?.to_string(),
        })
    }
}

/// Handler for one scalar interface leaf.
pub struct AttributeHandler {
    kind: AttrKind,
    backend: Arc<dyn AttributeBackend>,
    defaults: Arc<SchemaDefaults>,
    ctx: Option<HandlerContext>,
    /// Encoded value to write; `None` clears the attribute.
    effective: Option<String>,
    /// The backend has no attribute for this leaf.
    unsupported: bool,
}

impl AttributeHandler {
    pub fn new(
        kind: AttrKind,
        backend: Arc<dyn AttributeBackend>,
        defaults: Arc<SchemaDefaults>,
    ) -> Self {
        Self {
            kind,
            backend,
            defaults,
            ctx: None,
            effective: None,
            unsupported: false,
        }
    }

    fn ctx(&self) -> TxnResult<&HandlerContext> {
        self.ctx
            .as_ref()
            .ok_or_else(|| TxnError::internal(format!("{} handler used before init", self.name())))
    }

    /// Value to fall back to when the leaf is deleted.
    async fn deletion_value(&self, ctx: &HandlerContext) -> TxnResult<Option<String>> {
        if let Some(default) = self.defaults.get(self.kind.leaf()) {
            return Ok(Some(self.backend.encode(self.kind, default)));
        }
        if self.kind.is_free_form() {
            return Ok(None);
        }
        let capability = self.backend.capability(&ctx.target, self.kind).await?;
        match capability.default_value {
            Some(default) => Ok(Some(default)),
            None => Err(TxnError::constraint(
                &ctx.path,
                "no default value, cannot remove the configuration",
            )),
        }
    }
}

#[async_trait]
impl ChangeHandler for AttributeHandler {
    fn name(&self) -> &str {
        self.kind.handler_name()
    }

    async fn init(&mut self, change: &Change) -> TxnResult<()> {
        let interface = change
            .path
            .key("interface", "name")
            .ok_or_else(|| TxnError::invalid_target(&change.path, "missing interface name"))?;
        let entity = self.backend.resolve(interface).await?.ok_or_else(|| {
            TxnError::invalid_target(
                &change.path,
                format!("interface {} not found in {}", interface, self.backend.name()),
            )
        })?;

        let attribute = match self.backend.attribute(self.kind) {
            Some(attribute) => attribute,
            None => {
                debug!(
                    leaf = self.kind.leaf(),
                    backend = self.backend.name(),
                    "No backend attribute, ignoring"
                );
                self.unsupported = true;
                ""
            }
        };
        self.ctx = Some(HandlerContext::new(change, entity, attribute));
        Ok(())
    }

    async fn validate(&mut self) -> TxnResult<()> {
        if self.unsupported {
            return Ok(());
        }
        let ctx = self.ctx()?.clone();

        self.effective = match &ctx.value {
            None => self.deletion_value(&ctx).await?,
            Some(value) => {
                let raw = self.backend.encode(self.kind, value);
                let capability = self.backend.capability(&ctx.target, self.kind).await?;
                capability
                    .check(&raw)
                    .map_err(|reason| TxnError::constraint(&ctx.path, reason))?;
                Some(raw)
            }
        };
        Ok(())
    }

    async fn apply(&mut self) -> TxnResult<ApplyOutcome> {
        if self.unsupported {
            return Ok(ApplyOutcome::Unchanged);
        }
        let (target, path) = {
            let ctx = self.ctx()?;
            (ctx.target.clone(), ctx.path.clone())
        };

        let prior = self.backend.read(&target, self.kind).await?;
        let unchanged = prior == self.effective;
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.record_prior(prior);
        }
        if unchanged {
            debug!(path = %path, "Backend already holds the value");
            return Ok(ApplyOutcome::Unchanged);
        }

        match &self.effective {
            Some(raw) => self.backend.write(&target, self.kind, raw).await?,
            None => self.backend.clear(&target, self.kind).await?,
        }
        debug!(path = %path, entity = %target, value = ?self.effective, "Applied attribute");
        Ok(ApplyOutcome::Written)
    }

    async fn revert(&mut self) -> TxnResult<()> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Ok(());
        };
        let Some(prior) = ctx.take_prior() else {
            return Ok(());
        };
        let target = ctx.target.clone();
        match prior {
            Some(raw) => self.backend.write(&target, self.kind, &raw).await?,
            None => self.backend.clear(&target, self.kind).await?,
        }
        debug!(entity = %target, leaf = self.kind.leaf(), "Reverted attribute");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgtxn_backend::{MemoryHardware, MemoryStore};
    use cfgtxn_core::ChangeKind;
    use cfgtxn_types::DataPath;
    use pretty_assertions::assert_eq;

    fn path(leaf: &str) -> DataPath {
        DataPath::parse(&format!(
            "/interfaces/interface[name='Ethernet1_1']/{}",
            leaf
        ))
        .unwrap()
    }

    fn switch() -> (Arc<MemoryStore>, Arc<dyn AttributeBackend>) {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            DbId::ConfigDb,
            "PORT|Ethernet1_1",
            &[("mtu", "9100"), ("speed", "100000"), ("admin_status", "down")],
        );
        let backend = Arc::new(SwitchPortAttributes::new(
            store.clone(),
            InterfaceLimits::default(),
        ));
        (store, backend)
    }

    fn handler(kind: AttrKind, backend: &Arc<dyn AttributeBackend>) -> AttributeHandler {
        AttributeHandler::new(kind, backend.clone(), Arc::new(SchemaDefaults::builtin()))
    }

    #[tokio::test]
    async fn test_apply_and_revert_restores_prior() {
        let (store, backend) = switch();
        let mut h = handler(AttrKind::Mtu, &backend);
        h.init(&Change::modified(path("ipv4/mtu"), "9100", "1500"))
            .await
            .unwrap();
        h.validate().await.unwrap();
        assert_eq!(h.apply().await.unwrap(), ApplyOutcome::Written);
        assert_eq!(store.table(DbId::ConfigDb, "PORT|Ethernet1_1")["mtu"], "1500");

        h.revert().await.unwrap();
        assert_eq!(store.table(DbId::ConfigDb, "PORT|Ethernet1_1")["mtu"], "9100");
        // Nothing left to undo.
        store.clear_writes();
        h.revert().await.unwrap();
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let (_, backend) = switch();
        let mut h = handler(AttrKind::Speed, &backend);
        h.init(&Change::modified(path("speed"), "100000", "25000"))
            .await
            .unwrap();
        assert!(matches!(
            h.validate().await,
            Err(TxnError::ConstraintViolation { .. })
        ));

        let mut h = handler(AttrKind::Mtu, &backend);
        h.init(&Change::created(path("ipv4/mtu"), "20000")).await.unwrap();
        assert!(matches!(
            h.validate().await,
            Err(TxnError::ConstraintViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_interface() {
        let (_, backend) = switch();
        let mut h = handler(AttrKind::AdminStatus, &backend);
        let change = Change::created(
            DataPath::parse("/interfaces/interface[name='Ethernet9_1']/admin-status").unwrap(),
            "up",
        );
        assert!(matches!(
            h.init(&change).await,
            Err(TxnError::InvalidTarget { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_policies() {
        let (store, backend) = switch();

        // Schema default.
        let mut h = handler(AttrKind::Mtu, &backend);
        h.init(&Change::deleted(path("ipv4/mtu"), Some("1500".into())))
            .await
            .unwrap();
        h.validate().await.unwrap();
        h.apply().await.unwrap();
        assert_eq!(store.table(DbId::ConfigDb, "PORT|Ethernet1_1")["mtu"], "9100");

        // Free-form leaf is removed.
        store.seed(DbId::ConfigDb, "PORT|Ethernet1_1", &[("description", "uplink")]);
        let mut h = handler(AttrKind::Description, &backend);
        h.init(&Change::deleted(path("description"), None)).await.unwrap();
        h.validate().await.unwrap();
        assert_eq!(h.apply().await.unwrap(), ApplyOutcome::Written);
        assert!(!store
            .table(DbId::ConfigDb, "PORT|Ethernet1_1")
            .contains_key("description"));

        // No default anywhere.
        let mut h = handler(AttrKind::Speed, &backend);
        h.init(&Change::deleted(path("speed"), None)).await.unwrap();
        match h.validate().await {
            Err(TxnError::ConstraintViolation { message, .. }) => {
                assert_eq!(message, "no default value, cannot remove the configuration")
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_hardware_adapter_encoding() {
        let hw = Arc::new(MemoryHardware::new());
        hw.add_object(
            "Ethernet1_1",
            &[("tx-dis", "true"), ("fec-type", "none"), ("mtu", "1500")],
        );
        hw.set_capability("fec-type", AttrCapability::enumerated(["none", "rs", "fc"]));
        hw.set_capability("mtu", AttrCapability::range(1500.0, 9600.0).with_default("1500"));
        let backend: Arc<dyn AttributeBackend> = Arc::new(HardwareAttributes::new(hw.clone()));

        let mut h = handler(AttrKind::AdminStatus, &backend);
        h.init(&Change::modified(path("admin-status"), "down", "up"))
            .await
            .unwrap();
        h.validate().await.unwrap();
        h.apply().await.unwrap();
        assert_eq!(hw.value("Ethernet1_1", "tx-dis").as_deref(), Some("false"));

        let mut h = handler(AttrKind::Fec, &backend);
        h.init(&Change::modified(path("fec"), "none", "RS")).await.unwrap();
        h.validate().await.unwrap();
        h.apply().await.unwrap();
        assert_eq!(hw.value("Ethernet1_1", "fec-type").as_deref(), Some("rs"));

        // Speed has no hardware attribute.
        let mut h = handler(AttrKind::Speed, &backend);
        h.init(&Change::created(path("speed"), "100000")).await.unwrap();
        h.validate().await.unwrap();
        assert_eq!(h.apply().await.unwrap(), ApplyOutcome::Unchanged);

        assert_eq!(backend.decode(AttrKind::AdminStatus, "false"), "up");
        assert_eq!(hw.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_reverted() {
        let hw = Arc::new(MemoryHardware::new());
        hw.add_object("Ethernet1_1", &[("mtu", "1500")]);
        hw.fail_sets("Ethernet1_1", "mtu");
        let backend: Arc<dyn AttributeBackend> = Arc::new(HardwareAttributes::new(hw.clone()));

        let mut h = handler(AttrKind::Mtu, &backend);
        let change = Change::modified(path("ipv4/mtu"), "1500", "9000");
        assert_eq!(change.kind, ChangeKind::Modified);
        h.init(&change).await.unwrap();
        h.validate().await.unwrap();
        assert!(matches!(h.apply().await, Err(TxnError::Backend(_))));
        // The prior value was captured, so revert tries to restore it.
        assert!(h.revert().await.is_err());
        assert_eq!(hw.value("Ethernet1_1", "mtu").as_deref(), Some("1500"));
    }
}
