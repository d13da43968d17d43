//! Port breakout handler.
//!
//! Breakout leaves have no inline backend effect. A committed change is
//! returned as a structural delta for the backend orchestrator, which
//! rebuilds the dataplane topology once both fields are known.

use crate::tables::leaves;
use crate::topology::Platform;
use async_trait::async_trait;
use cfgtxn_core::{
    ApplyOutcome, Change, ChangeHandler, ChangeKind, HandlerContext, StructuralDelta, TxnError,
    TxnResult,
};
use cfgtxn_types::{ChannelSpeed, InterfaceName};
use std::sync::Arc;
use tracing::debug;

pub struct BreakoutHandler {
    platform: Arc<Platform>,
    ctx: Option<HandlerContext>,
    interface: Option<InterfaceName>,
    normalized: Option<String>,
}

impl BreakoutHandler {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self {
            platform,
            ctx: None,
            interface: None,
            normalized: None,
        }
    }

    fn ctx(&self) -> TxnResult<&HandlerContext> {
        self.ctx
            .as_ref()
            .ok_or_else(|| TxnError::internal("breakout handler used before init"))
    }
}

#[async_trait]
impl ChangeHandler for BreakoutHandler {
    fn name(&self) -> &str {
        "breakout"
    }

    async fn init(&mut self, change: &Change) -> TxnResult<()> {
        let name = change
            .path
            .key("interface", leaves::NAME)
            .ok_or_else(|| TxnError::invalid_target(&change.path, "missing interface name"))?;
        let interface: InterfaceName = name.parse().map_err(|e: cfgtxn_types::ParseError| {
            TxnError::invalid_target(&change.path, e.to_string())
        })?;

        let field = change.path.leaf();
        if field != leaves::NUM_CHANNELS && field != leaves::CHANNEL_SPEED {
            return Err(TxnError::invalid_target(
                &change.path,
                format!("unsupported breakout leaf {}", field),
            ));
        }

        self.interface = Some(interface);
        self.ctx = Some(HandlerContext::new(change, interface.to_string(), field));
        Ok(())
    }

    async fn validate(&mut self) -> TxnResult<()> {
        let ctx = self.ctx()?;
        let interface = self
            .interface
            .ok_or_else(|| TxnError::internal("breakout handler used before init"))?;

        if ctx.kind == ChangeKind::Modified {
            return Err(TxnError::constraint(
                &ctx.path,
                "breakout must be deleted before it can be changed",
            ));
        }
        if !interface.is_parent() {
            return Err(TxnError::constraint(
                &ctx.path,
                format!("{} is not a breakout parent", interface),
            ));
        }
        let master = self.platform.parent(&interface).ok_or_else(|| {
            TxnError::invalid_target(&ctx.path, format!("{} is not a platform port", interface))
        })?;

        let normalized = match (&ctx.value, ctx.attribute.as_str()) {
            (None, _) => None,
            (Some(value), leaves::NUM_CHANNELS) => {
                let channels: u32 = value.parse().map_err(|_| {
                    TxnError::constraint(&ctx.path, format!("invalid channel count {}", value))
                })?;
                if channels == 0 || master.lane_num % channels != 0 {
                    return Err(TxnError::constraint(
                        &ctx.path,
                        format!(
                            "{} channels do not divide the {} lanes of {}",
                            channels, master.lane_num, interface
                        ),
                    ));
                }
                Some(channels.to_string())
            }
            (Some(value), _) => {
                let speed: ChannelSpeed = value.parse().map_err(|e: cfgtxn_types::ParseError| {
                    TxnError::constraint(&ctx.path, e.to_string())
                })?;
                Some(speed.as_str().to_string())
            }
        };
        self.normalized = normalized;
        Ok(())
    }

    async fn apply(&mut self) -> TxnResult<ApplyOutcome> {
        let ctx = self.ctx()?;
        if ctx.kind == ChangeKind::Deleted && ctx.attribute == leaves::CHANNEL_SPEED {
            debug!(path = %ctx.path, "Channel speed removed alone, ignoring");
            return Ok(ApplyOutcome::Unchanged);
        }
        Ok(ApplyOutcome::Structural(StructuralDelta {
            entity: ctx.target.clone(),
            field: ctx.attribute.clone(),
            value: self.normalized.clone(),
            kind: ctx.kind,
            path: ctx.path.clone(),
        }))
    }

    async fn revert(&mut self) -> TxnResult<()> {
        // Nothing was written.
        Ok(())
    }
}
