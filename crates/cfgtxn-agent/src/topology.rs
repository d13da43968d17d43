//! Platform port list and dataplane topology computation.
//!
//! The platform master list describes every front-panel port in its
//! un-broken-out form. A topology is recomputed top-down from that list
//! and the configured breakouts; it is never patched incrementally.

use crate::error::{AgentError, AgentResult};
use crate::schema::{leaf, list_entries};
use crate::tables::{leaves, CONFIG_BCM_FILE, LANEMAP_FILE, PORT_CONFIG_FILE};
use cfgtxn_backend::TopologyFiles;
use cfgtxn_core::{TxnError, TxnResult};
use cfgtxn_types::{ChannelSpeed, InterfaceName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// One front-panel port of the platform master list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPort {
    /// Hardware port number of the first channel.
    pub port: u32,
    pub first_lane: u32,
    pub lane_num: u32,
    /// Un-broken-out speed in Mbps.
    pub speed: u32,
    pub alias_prefix: String,
    pub index: u32,
}

/// Platform master port list. Port `i` (0-based) is `Ethernet{i+1}_1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Platform {
    ports: Vec<PlatformPort>,
}

impl Platform {
    pub fn new(ports: Vec<PlatformPort>) -> Self {
        Self { ports }
    }

    /// Loads the JSON master list.
    pub fn load(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let ports: Vec<PlatformPort> = serde_json::from_str(&raw)
            .map_err(|e| AgentError::Platform(format!("{}: {}", path.display(), e)))?;
        if let Some(bad) = ports.iter().find(|p| p.lane_num == 0) {
            return Err(AgentError::Platform(format!(
                "port {} has no lanes",
                bad.port
            )));
        }
        Ok(Self { ports })
    }

    pub fn ports(&self) -> &[PlatformPort] {
        &self.ports
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Master entry of the port `name` belongs to.
    pub fn parent(&self, name: &InterfaceName) -> Option<&PlatformPort> {
        let idx = usize::try_from(name.port()).ok()?.checked_sub(1)?;
        self.ports.get(idx)
    }
}

/// Configured breakout of one parent interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakoutLayout {
    pub channels: u32,
    pub speed: ChannelSpeed,
}

/// Breakouts keyed by parent interface.
pub type Breakouts = BTreeMap<InterfaceName, BreakoutLayout>;

/// One dataplane port of a computed topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPort {
    pub name: InterfaceName,
    pub hw_port: u32,
    pub lanes: Vec<u32>,
    pub alias: String,
    /// Speed in Mbps.
    pub speed: u32,
    pub index: u32,
}

impl TopologyPort {
    pub fn lanes_field(&self) -> String {
        self.lanes
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Complete dataplane port layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    ports: Vec<TopologyPort>,
}

impl Topology {
    /// Computes the layout of every platform port under `breakouts`.
    pub fn compute(platform: &Platform, breakouts: &Breakouts) -> TxnResult<Self> {
        let mut ports = Vec::new();
        for (i, master) in platform.ports().iter().enumerate() {
            let number = u32::try_from(i + 1)
                .map_err(|_| TxnError::internal("platform port list too long"))?;
            let parent = InterfaceName::new(number, 1)
                .map_err(|e| TxnError::internal(e.to_string()))?;

            let (channels, speed) = match breakouts.get(&parent) {
                Some(layout) => (layout.channels, layout.speed.mbps()),
                None => (1, master.speed),
            };
            if channels == 0 || master.lane_num % channels != 0 {
                return Err(TxnError::constraint(
                    parent.to_string(),
                    format!(
                        "{} channels do not divide {} lanes",
                        channels, master.lane_num
                    ),
                ));
            }
            let per = master.lane_num / channels;

            for c in 0..channels {
                let name = InterfaceName::new(number, c + 1)
                    .map_err(|e| TxnError::internal(e.to_string()))?;
                let first = master.first_lane + c * per;
                ports.push(TopologyPort {
                    name,
                    hw_port: master.port + c * per,
                    lanes: (first..first + per).collect(),
                    alias: format!("{}-{}", master.alias_prefix, master.index + c),
                    speed,
                    index: master.index + c * per,
                });
            }
        }
        Ok(Self { ports })
    }

    pub fn ports(&self) -> &[TopologyPort] {
        &self.ports
    }

    pub fn contains(&self, name: &InterfaceName) -> bool {
        self.ports.iter().any(|p| &p.name == name)
    }

    pub fn port_config(&self) -> String {
        let mut out = String::from("# name lanes alias speed index\n");
        for p in &self.ports {
            let _ = writeln!(
                out,
                "{} {} {} {} {}",
                p.name,
                p.lanes_field(),
                p.alias,
                p.speed,
                p.index
            );
        }
        out
    }

    pub fn config_bcm(&self) -> String {
        let mut out = String::new();
        for p in &self.ports {
            let lane = p.lanes.first().copied().unwrap_or_default();
            let _ = writeln!(out, "portmap_{}={}:{}", p.hw_port, lane, p.speed / 1000);
        }
        out
    }

    /// Lane map of the virtual switch build.
    pub fn lanemap(&self) -> String {
        let mut out = String::new();
        for p in &self.ports {
            let _ = writeln!(out, "v{}:{}", p.name, p.lanes_field());
        }
        out
    }

    /// Files describing this topology. The lane map is produced only when
    /// the dataplane already carries one.
    pub fn render(&self, current: &TopologyFiles) -> TopologyFiles {
        let mut files = TopologyFiles::new();
        files.insert(PORT_CONFIG_FILE.to_string(), self.port_config());
        files.insert(CONFIG_BCM_FILE.to_string(), self.config_bcm());
        if current.contains_key(LANEMAP_FILE) {
            files.insert(LANEMAP_FILE.to_string(), self.lanemap());
        }
        files
    }

    /// True when the port layout or the chip port map in `rendered`
    /// differs from `current`. The lane map follows those two files and
    /// never triggers a restart by itself.
    pub fn differs(rendered: &TopologyFiles, current: &TopologyFiles) -> bool {
        [PORT_CONFIG_FILE, CONFIG_BCM_FILE]
            .iter()
            .any(|name| rendered.get(*name) != current.get(*name))
    }
}

/// Breakouts configured in an interfaces running tree. Entries missing
/// either field are not breakouts.
pub fn breakouts_from_config(tree: &Value) -> Breakouts {
    let mut breakouts = Breakouts::new();
    for entry in list_entries(tree, "interface") {
        let Some(name) = leaf(entry, leaves::NAME).and_then(|n| n.parse::<InterfaceName>().ok())
        else {
            continue;
        };
        let channels = leaf(entry, "breakout/num-channels").and_then(|n| n.parse::<u32>().ok());
        let speed =
            leaf(entry, "breakout/channel-speed").and_then(|s| s.parse::<ChannelSpeed>().ok());
        if let (Some(channels), Some(speed)) = (channels, speed) {
            breakouts.insert(name, BreakoutLayout { channels, speed });
        }
    }
    breakouts
}
