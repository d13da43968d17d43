//! Value types shared by the configuration transaction engine.
//!
//! - [`DataPath`]: hierarchical configuration keys
//!   (`/interfaces/interface[name='Ethernet1_1']/mtu`)
//! - [`InterfaceName`]: front-panel interface names with breakout channels
//! - [`ChannelSpeed`]: per-channel breakout speeds
//! - [`AdminState`] / [`OperState`]: interface states
//! - [`VlanId`] / [`TaggingMode`]: IEEE 802.1Q VLAN identifiers and member tagging

mod interface;
mod path;
mod vlan;

pub use interface::{AdminState, ChannelSpeed, InterfaceName, OperState};
pub use path::{DataPath, PathSegment};
pub use vlan::{TaggingMode, VlanId};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid data path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid interface name: {0}")]
    InvalidInterfaceName(String),

    #[error("invalid channel speed: {0}")]
    InvalidChannelSpeed(String),

    #[error("invalid admin state: {0}")]
    InvalidAdminState(String),

    #[error("invalid oper state: {0}")]
    InvalidOperState(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid VLAN name: {0}")]
    InvalidVlanName(String),

    #[error("invalid tagging mode: {0}")]
    InvalidTaggingMode(String),
}

impl ParseError {
    pub(crate) fn path(path: &str, reason: impl Into<String>) -> Self {
        ParseError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
