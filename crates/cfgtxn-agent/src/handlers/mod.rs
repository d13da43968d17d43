//! Concrete change handlers.

mod attr;
mod breakout;
mod vlan;

pub use attr::{
    AttrKind, AttributeBackend, AttributeHandler, HardwareAttributes, SwitchPortAttributes,
};
pub use breakout::BreakoutHandler;
pub use vlan::{VlanHandler, VlanNode};
