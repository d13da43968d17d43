//! Per-change handler lifecycle.
//!
//! ```text
//! Created -> Initialized -> Validated -> Applied -> Committed
//!                                  \          \-> Reverted
//!                                   \-> Failed -> Reverted
//! ```
//!
//! `init` and `validate` run at pre-commit and have no side effects.
//! `apply` runs at commit and performs at most one backend write after
//! capturing the prior value; `revert` writes that prior value back.

use crate::change::{Change, ChangeKind};
use crate::error::TxnResult;
use async_trait::async_trait;
use cfgtxn_types::DataPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerState {
    Created,
    Initialized,
    Validated,
    Applied,
    Committed,
    Reverted,
    /// `apply` returned an error; the partial effect still needs reverting.
    Failed,
}

impl HandlerState {
    /// Returns true if the lifecycle allows moving from `self` to `next`.
    pub fn can_advance_to(&self, next: HandlerState) -> bool {
        use HandlerState::*;
        matches!(
            (self, next),
            (Created, Initialized)
                | (Initialized, Validated)
                | (Validated, Applied)
                | (Validated, Failed)
                | (Applied, Committed)
                | (Applied, Reverted)
                | (Failed, Reverted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandlerState::Committed | HandlerState::Reverted)
    }
}

/// A structural edit the orchestrator must act on after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralDelta {
    /// Structural entity, e.g. the parent interface of a breakout group.
    pub entity: String,
    /// Leaf name, e.g. `num-channels`.
    pub field: String,
    pub value: Option<String>,
    pub kind: ChangeKind,
    /// Full path of the changed leaf.
    pub path: DataPath,
}

/// What `apply` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// One backend write was performed.
    Written,
    /// Nothing to write for this change.
    Unchanged,
    /// No inline write; the change is deferred to the backend orchestrator.
    Structural(StructuralDelta),
}

/// State resolved by `init` and carried through one handler's lifecycle.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub path: DataPath,
    pub kind: ChangeKind,
    /// Resolved backend entity (interface, VLAN key, hardware object).
    pub target: String,
    /// Backend attribute or field name.
    pub attribute: String,
    /// Effective value to apply; `None` removes the attribute.
    pub value: Option<String>,
    prior: Option<Option<String>>,
}

impl HandlerContext {
    pub fn new(change: &Change, target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            path: change.path.clone(),
            kind: change.kind,
            target: target.into(),
            attribute: attribute.into(),
            value: change.new_value.clone(),
            prior: None,
        }
    }

    /// Records the backend value observed before writing.
    pub fn record_prior(&mut self, prior: Option<String>) {
        self.prior = Some(prior);
    }

    /// Takes the recorded prior value; a second call yields `None`.
    ///
    /// The inner `None` means the attribute was unset before apply.
    pub fn take_prior(&mut self) -> Option<Option<String>> {
        self.prior.take()
    }

    pub fn has_prior(&self) -> bool {
        self.prior.is_some()
    }
}

/// Lifecycle of one configuration change against one backend.
#[async_trait]
pub trait ChangeHandler: Send {
    /// Handler name used in logs and error attribution.
    fn name(&self) -> &str;

    /// Resolves the change to a backend entity. No side effects.
    async fn init(&mut self, change: &Change) -> TxnResult<()>;

    /// Checks backend constraints and computes the effective value.
    async fn validate(&mut self) -> TxnResult<()>;

    /// Captures the prior value, then writes.
    async fn apply(&mut self) -> TxnResult<ApplyOutcome>;

    /// Restores the captured prior value. Safe to call more than once and
    /// after a failed `apply`.
    async fn revert(&mut self) -> TxnResult<()>;
}

/// Handler for paths that need no backend action.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

#[async_trait]
impl ChangeHandler for NoOpHandler {
    fn name(&self) -> &str {
        "noop"
    }

    async fn init(&mut self, _change: &Change) -> TxnResult<()> {
        Ok(())
    }

    async fn validate(&mut self) -> TxnResult<()> {
        Ok(())
    }

    async fn apply(&mut self) -> TxnResult<ApplyOutcome> {
        Ok(ApplyOutcome::Unchanged)
    }

    async fn revert(&mut self) -> TxnResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn change() -> Change {
        Change::modified(
            DataPath::parse("/interfaces/interface[name='Ethernet1_1']/ipv4/mtu").unwrap(),
            "9100",
            "1500",
        )
    }

    #[test]
    fn test_state_transitions() {
        use HandlerState::*;
        assert!(Created.can_advance_to(Initialized));
        assert!(Validated.can_advance_to(Applied));
        assert!(Validated.can_advance_to(Failed));
        assert!(Failed.can_advance_to(Reverted));
        assert!(Applied.can_advance_to(Reverted));
        assert!(!Created.can_advance_to(Applied));
        assert!(!Committed.can_advance_to(Reverted));
        assert!(!Initialized.can_advance_to(Applied));
        assert!(Reverted.is_terminal());
        assert!(!Applied.is_terminal());
    }

    #[test]
    fn test_context_prior_taken_once() {
        let mut ctx = HandlerContext::new(&change(), "Ethernet1_1", "mtu");
        assert_eq!(ctx.value.as_deref(), Some("1500"));
        assert!(!ctx.has_prior());
        assert_eq!(ctx.take_prior(), None);

        ctx.record_prior(Some("9100".to_string()));
        assert!(ctx.has_prior());
        assert_eq!(ctx.take_prior(), Some(Some("9100".to_string())));
        assert_eq!(ctx.take_prior(), None);

        ctx.record_prior(None);
        assert_eq!(ctx.take_prior(), Some(None));
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let mut handler = NoOpHandler;
        handler.init(&change()).await.unwrap();
        handler.validate().await.unwrap();
        assert_eq!(handler.apply().await.unwrap(), ApplyOutcome::Unchanged);
        handler.revert().await.unwrap();
        assert_eq!(handler.name(), "noop");
    }
}
