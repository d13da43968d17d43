//! Front-panel interface naming and state types.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of a front-panel interface, `Ethernet{port}_{channel}`.
///
/// Channel 1 is the parent of a breakout group; channels 2..n only exist
/// while the parent is broken out.
///
/// ```
/// use cfgtxn_types::InterfaceName;
///
/// let name: InterfaceName = "Ethernet3_2".parse().unwrap();
/// assert_eq!(name.port(), 3);
/// assert!(name.is_breakout_child());
/// assert_eq!(name.parent().to_string(), "Ethernet3_1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName {
    port: u32,
    channel: u32,
}

impl InterfaceName {
    pub const PREFIX: &'static str = "Ethernet";

    /// Creates an interface name. Port and channel are 1-based.
    pub fn new(port: u32, channel: u32) -> Result<Self, ParseError> {
        if port == 0 || channel == 0 {
            return Err(ParseError::InvalidInterfaceName(format!(
                "{}{}_{}",
                Self::PREFIX,
                port,
                channel
            )));
        }
        Ok(Self { port, channel })
    }

    pub const fn port(&self) -> u32 {
        self.port
    }

    pub const fn channel(&self) -> u32 {
        self.channel
    }

    /// The channel-1 interface of this port.
    pub const fn parent(&self) -> Self {
        Self {
            port: self.port,
            channel: 1,
        }
    }

    pub const fn is_parent(&self) -> bool {
        self.channel == 1
    }

    pub const fn is_breakout_child(&self) -> bool {
        self.channel != 1
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}_{}", Self::PREFIX, self.port, self.channel)
    }
}

impl FromStr for InterfaceName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidInterfaceName(s.to_string());
        let rest = s.strip_prefix(Self::PREFIX).ok_or_else(invalid)?;
        let (port, channel) = rest.split_once('_').ok_or_else(invalid)?;
        let port: u32 = port.parse().map_err(|_| invalid())?;
        let channel: u32 = channel.parse().map_err(|_| invalid())?;
        InterfaceName::new(port, channel).map_err(|_| invalid())
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<InterfaceName> for String {
    fn from(name: InterfaceName) -> String {
        name.to_string()
    }
}

/// Per-channel speed of a broken-out port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelSpeed {
    #[serde(rename = "SPEED_10GB")]
    Speed10G,
    #[serde(rename = "SPEED_25GB")]
    Speed25G,
    #[serde(rename = "SPEED_40GB")]
    Speed40G,
    #[serde(rename = "SPEED_50GB")]
    Speed50G,
    #[serde(rename = "SPEED_100GB")]
    Speed100G,
}

impl ChannelSpeed {
    /// Speed in Mbps, as stored in the switch-state PORT table.
    pub const fn mbps(&self) -> u32 {
        match self {
            ChannelSpeed::Speed10G => 10_000,
            ChannelSpeed::Speed25G => 25_000,
            ChannelSpeed::Speed40G => 40_000,
            ChannelSpeed::Speed50G => 50_000,
            ChannelSpeed::Speed100G => 100_000,
        }
    }

    pub const fn from_mbps(mbps: u32) -> Option<Self> {
        match mbps {
            10_000 => Some(ChannelSpeed::Speed10G),
            25_000 => Some(ChannelSpeed::Speed25G),
            40_000 => Some(ChannelSpeed::Speed40G),
            50_000 => Some(ChannelSpeed::Speed50G),
            100_000 => Some(ChannelSpeed::Speed100G),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ChannelSpeed::Speed10G => "SPEED_10GB",
            ChannelSpeed::Speed25G => "SPEED_25GB",
            ChannelSpeed::Speed40G => "SPEED_40GB",
            ChannelSpeed::Speed50G => "SPEED_50GB",
            ChannelSpeed::Speed100G => "SPEED_100GB",
        }
    }
}

impl fmt::Display for ChannelSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelSpeed {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Schema identities may arrive module-qualified.
        let bare = s.rsplit(':').next().unwrap_or(s);
        match bare {
            "SPEED_10GB" => Ok(ChannelSpeed::Speed10G),
            "SPEED_25GB" => Ok(ChannelSpeed::Speed25G),
            "SPEED_40GB" => Ok(ChannelSpeed::Speed40G),
            "SPEED_50GB" => Ok(ChannelSpeed::Speed50G),
            "SPEED_100GB" => Ok(ChannelSpeed::Speed100G),
            _ => Err(ParseError::InvalidChannelSpeed(s.to_string())),
        }
    }
}

/// Administrative state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    /// Administratively down (default for new interfaces).
    #[default]
    Down,
    Up,
}

impl AdminState {
    pub const fn is_up(&self) -> bool {
        matches!(self, AdminState::Up)
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminState::Up => write!(f, "up"),
            AdminState::Down => write!(f, "down"),
        }
    }
}

impl FromStr for AdminState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(AdminState::Up),
            "down" => Ok(AdminState::Down),
            _ => Err(ParseError::InvalidAdminState(s.to_string())),
        }
    }
}

/// Operational state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperState {
    #[default]
    Down,
    Up,
    /// State not reported by the backend.
    Unknown,
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperState::Up => write!(f, "up"),
            OperState::Down => write!(f, "down"),
            OperState::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for OperState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(OperState::Up),
            "down" => Ok(OperState::Down),
            "unknown" => Ok(OperState::Unknown),
            _ => Err(ParseError::InvalidOperState(s.to_string())),
        }
    }
}
