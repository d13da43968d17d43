//! Prebuilt handler tables.

use crate::handlers::{
    AttrKind, AttributeBackend, AttributeHandler, BreakoutHandler, VlanHandler, VlanNode,
};
use crate::schema::SchemaDefaults;
use crate::topology::Platform;
use cfgtxn_backend::SwitchStore;
use cfgtxn_core::HandlerRegistry;
use std::sync::Arc;

const INTERFACE: &str = "/interfaces/interface";
const VLAN_LIST: &str = "/vlan/VLAN/VLAN_LIST";
const VLAN_MEMBER_LIST: &str = "/vlan/VLAN_MEMBER/VLAN_MEMBER_LIST";

fn interface_handlers(
    registry: HandlerRegistry,
    attrs: &Arc<dyn AttributeBackend>,
    defaults: &Arc<SchemaDefaults>,
) -> HandlerRegistry {
    let mut registry = registry
        .subtree(INTERFACE)
        .noop(&format!("{}/name", INTERFACE))
        .noop(&format!("{}/ipv4/enabled", INTERFACE))
        .noop(&format!("{}/ipv4/forwarding", INTERFACE));

    for kind in AttrKind::REPLAY_ORDER {
        let attrs = attrs.clone();
        let defaults = defaults.clone();
        registry = registry.handler(&kind.pattern(), kind.handler_name(), move || {
            AttributeHandler::new(kind, attrs.clone(), defaults.clone())
        });
    }
    registry
}

/// Handler table for the switch-state backend: interfaces, breakout and
/// VLANs.
pub fn switch_registry(
    store: Arc<dyn SwitchStore>,
    attrs: Arc<dyn AttributeBackend>,
    platform: Arc<Platform>,
    defaults: Arc<SchemaDefaults>,
) -> HandlerRegistry {
    let registry = interface_handlers(HandlerRegistry::new(), &attrs, &defaults);

    let vlan = |node: VlanNode| {
        let store = store.clone();
        move || VlanHandler::new(node, store.clone())
    };

    registry
        .handler(&format!("{}/breakout/*", INTERFACE), "breakout", move || {
            BreakoutHandler::new(platform.clone())
        })
        .subtree("/vlan")
        .handler(VLAN_LIST, VlanNode::Entry.handler_name(), vlan(VlanNode::Entry))
        .handler(&format!("{}/*", VLAN_LIST), VlanNode::Field.handler_name(), vlan(VlanNode::Field))
        .handler(
            &format!("{}/members", VLAN_LIST),
            VlanNode::Members.handler_name(),
            vlan(VlanNode::Members),
        )
        .noop(&format!("{}/name", VLAN_LIST))
        .handler(
            VLAN_MEMBER_LIST,
            VlanNode::MemberEntry.handler_name(),
            vlan(VlanNode::MemberEntry),
        )
        .handler(
            &format!("{}/tagging_mode", VLAN_MEMBER_LIST),
            VlanNode::TaggingMode.handler_name(),
            vlan(VlanNode::TaggingMode),
        )
        .noop(&format!("{}/name", VLAN_MEMBER_LIST))
        .noop(&format!("{}/ifname", VLAN_MEMBER_LIST))
}

/// Handler table for the hardware-abstraction backend: interfaces only.
pub fn hardware_registry(
    attrs: Arc<dyn AttributeBackend>,
    defaults: Arc<SchemaDefaults>,
) -> HandlerRegistry {
    interface_handlers(HandlerRegistry::new(), &attrs, &defaults)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceLimits;
    use crate::handlers::SwitchPortAttributes;
    use crate::topology::tests::sample_platform;
    use cfgtxn_backend::MemoryStore;
    use cfgtxn_core::TxnError;
    use cfgtxn_types::DataPath;
    use pretty_assertions::assert_eq;

    fn registry() -> HandlerRegistry {
        let store: Arc<dyn SwitchStore> = Arc::new(MemoryStore::new());
        let attrs: Arc<dyn AttributeBackend> =
            Arc::new(SwitchPortAttributes::new(store.clone(), InterfaceLimits::default()));
        switch_registry(
            store,
            attrs,
            Arc::new(sample_platform()),
            Arc::new(SchemaDefaults::builtin()),
        )
    }

    fn name_of(registry: &HandlerRegistry, path: &str) -> &'static str {
        registry
            .lookup(&DataPath::parse(path).unwrap())
            .unwrap()
            .name()
    }

    #[test]
    fn test_switch_registry_routes() {
        let r = registry();
        let port = "/interfaces/interface[name='Ethernet1_1']";
        let vlan = "/vlan/VLAN/VLAN_LIST[name='Vlan100']";
        let member = "/vlan/VLAN_MEMBER/VLAN_MEMBER_LIST[name='Vlan100'][ifname='Ethernet1_1']";
        let prefixed = "/openconfig-interfaces:interfaces/interface[name='Ethernet1_1']/ipv4/mtu";
        assert_eq!(name_of(&r, prefixed), "mtu");
        assert_eq!(name_of(&r, &format!("{port}/admin-status")), "admin-status");
        assert_eq!(name_of(&r, &format!("{port}/breakout/num-channels")), "breakout");
        assert_eq!(name_of(&r, &format!("{port}/ipv4/enabled")), "noop");
        assert_eq!(name_of(&r, port), "noop");
        assert_eq!(name_of(&r, vlan), "vlan");
        assert_eq!(name_of(&r, &format!("{vlan}/description")), "vlan-field");
        assert_eq!(name_of(&r, &format!("{vlan}/members[.='Ethernet1_1']")), "vlan-members");
        assert_eq!(name_of(&r, &format!("{vlan}/name")), "noop");
        assert_eq!(name_of(&r, &format!("{member}/tagging_mode")), "vlan-tagging-mode");
    }

    #[test]
    fn test_hardware_registry_has_no_vlans() {
        let store: Arc<dyn SwitchStore> = Arc::new(MemoryStore::new());
        let attrs: Arc<dyn AttributeBackend> =
            Arc::new(SwitchPortAttributes::new(store, InterfaceLimits::default()));
        let r = hardware_registry(attrs, Arc::new(SchemaDefaults::builtin()));
        assert_eq!(name_of(&r, "/interfaces/interface[name='Ethernet1_1']/fec"), "fec");
        let path = DataPath::parse("/vlan/VLAN/VLAN_LIST[name='Vlan100']").unwrap();
        assert!(matches!(r.lookup(&path), Err(TxnError::UnknownSubtree { .. })));
    }
}
