//! Table, field and tree names shared by handlers, orchestration and the
//! read path.

/// CONFIG_DB table for port configuration.
pub const CFG_PORT_TABLE_NAME: &str = "PORT";

/// CONFIG_DB table for VLAN entries.
pub const CFG_VLAN_TABLE_NAME: &str = "VLAN";

/// CONFIG_DB table for VLAN membership.
pub const CFG_VLAN_MEMBER_TABLE_NAME: &str = "VLAN_MEMBER";

/// CONFIG_DB table for flex counter polling.
pub const CFG_FLEX_COUNTER_TABLE_NAME: &str = "FLEX_COUNTER_TABLE";

/// APPL_DB table carrying the port state published by the dataplane.
pub const APP_PORT_TABLE_NAME: &str = "PORT_TABLE";

/// COUNTERS_DB hash mapping interface names to counter object ids.
pub const COUNTERS_PORT_NAME_MAP: &str = "COUNTERS_PORT_NAME_MAP";

/// COUNTERS_DB table of per-object counters.
pub const COUNTERS_TABLE_NAME: &str = "COUNTERS";

/// Configuration domains, in lock order.
pub const INTERFACES_DOMAIN: &str = "interfaces";
pub const VLAN_DOMAIN: &str = "vlan";
pub const LOCK_ORDER: [&str; 2] = [INTERFACES_DOMAIN, VLAN_DOMAIN];

/// Notification sent on interface link state transitions.
pub const LINK_STATE_NOTIFY_EVENT: &str = "interface-link-state-notify-event";

/// Hardware alarm payload key carrying the PCS status list, and the
/// entries of that list that matter for link state.
pub const PCS_STATUS: &str = "pcs-status";
pub const PCS_READY: &str = "ready";
pub const PCS_FAULTS: [&str; 2] = ["rx-remote-fault", "rx-local-fault"];

/// Dataplane topology files.
pub const PORT_CONFIG_FILE: &str = "port_config.ini";
pub const CONFIG_BCM_FILE: &str = "config.bcm";
pub const LANEMAP_FILE: &str = "lanemap.ini";

/// Store field names.
pub mod fields {
    pub const ADMIN_STATUS: &str = "admin_status";
    pub const OPER_STATUS: &str = "oper_status";
    pub const MTU: &str = "mtu";
    pub const SPEED: &str = "speed";
    pub const FEC: &str = "fec";
    pub const DESCRIPTION: &str = "description";
    pub const ALIAS: &str = "alias";
    pub const LANES: &str = "lanes";
    pub const INDEX: &str = "index";
    pub const VLANID: &str = "vlanid";
    /// Comma-separated member list of a VLAN entry.
    pub const MEMBERS: &str = "members@";
    pub const TAGGING_MODE: &str = "tagging_mode";
    pub const FLEX_COUNTER_STATUS: &str = "FLEX_COUNTER_STATUS";
}

/// Schema leaf names.
pub mod leaves {
    pub const NAME: &str = "name";
    pub const IFNAME: &str = "ifname";
    pub const OPER_STATUS: &str = "oper-status";
    pub const STATISTICS: &str = "statistics";
    pub const BREAKOUT: &str = "breakout";
    pub const NUM_CHANNELS: &str = "num-channels";
    pub const CHANNEL_SPEED: &str = "channel-speed";
    pub const PARENT: &str = "parent";
    pub const MEMBERS: &str = "members";
    pub const TAGGING_MODE: &str = "tagging_mode";
}

/// Port counters: COUNTERS_DB field → `statistics` leaf.
pub const PORT_COUNTERS: [(&str, &str); 14] = [
    ("SAI_PORT_STAT_IF_IN_OCTETS", "in-octets"),
    ("SAI_PORT_STAT_IF_IN_UCAST_PKTS", "in-unicast-pkts"),
    ("SAI_PORT_STAT_IF_IN_BROADCAST_PKTS", "in-broadcast-pkts"),
    ("SAI_PORT_STAT_IF_IN_MULTICAST_PKTS", "in-multicast-pkts"),
    ("SAI_PORT_STAT_IF_IN_DISCARDS", "in-discards"),
    ("SAI_PORT_STAT_IF_IN_ERRORS", "in-errors"),
    ("SAI_PORT_STAT_IF_IN_UNKNOWN_PROTOS", "in-unknown-protos"),
    ("SAI_PORT_STAT_IF_OUT_OCTETS", "out-octets"),
    ("SAI_PORT_STAT_IF_OUT_UCAST_PKTS", "out-unicast-pkts"),
    ("SAI_PORT_STAT_IF_OUT_BROADCAST_PKTS", "out-broadcast-pkts"),
    ("SAI_PORT_STAT_IF_OUT_MULTICAST_PKTS", "out-multicast-pkts"),
    ("SAI_PORT_STAT_IF_OUT_DISCARDS", "out-discards"),
    ("SAI_PORT_STAT_IF_OUT_ERRORS", "out-errors"),
    ("SAI_PORT_STAT_IF_OUT_UNKNOWN_PROTOS", "out-unknown-protos"),
];
