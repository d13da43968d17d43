//! VLAN ID and member tagging types.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier (1-4094).
///
/// Parses both the numeric form and the `Vlan100` entry name used as the
/// VLAN table key.
///
/// ```
/// use cfgtxn_types::VlanId;
///
/// let vlan: VlanId = "Vlan100".parse().unwrap();
/// assert_eq!(vlan.as_u16(), 100);
/// assert_eq!(vlan.name(), "Vlan100");
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    const NAME_PREFIX: &'static str = "Vlan";

    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Table key form, `Vlan{id}`.
    pub fn name(&self) -> String {
        format!("{}{}", Self::NAME_PREFIX, self.0)
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id_str = match s.get(..Self::NAME_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(Self::NAME_PREFIX) => {
                &s[Self::NAME_PREFIX.len()..]
            }
            _ => s,
        };

        let id: u16 = id_str
            .parse()
            .map_err(|_| ParseError::InvalidVlanName(s.to_string()))?;

        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

/// How a member interface carries a VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaggingMode {
    #[default]
    Untagged,
    Tagged,
    PriorityTagged,
}

impl TaggingMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TaggingMode::Untagged => "untagged",
            TaggingMode::Tagged => "tagged",
            TaggingMode::PriorityTagged => "priority_tagged",
        }
    }
}

impl fmt::Display for TaggingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaggingMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untagged" => Ok(TaggingMode::Untagged),
            "tagged" => Ok(TaggingMode::Tagged),
            "priority_tagged" => Ok(TaggingMode::PriorityTagged),
            _ => Err(ParseError::InvalidTaggingMode(s.to_string())),
        }
    }
}
