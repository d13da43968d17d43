//! Transactional configuration change handling.
//!
//! A batch of [`Change`]s arrives twice: once as
//! [`BatchPhase::PreCommit`] and once as [`BatchPhase::Commit`]. The
//! [`TransactionCoordinator`] routes every change through the
//! [`HandlerRegistry`] to a [`ChangeHandler`], validates the whole batch
//! before anything is written, and undoes applied changes in reverse order
//! when a commit fails part way.
//!
//! Batches are serialized by the [`LockManager`]; long-running backend work
//! triggered by a commit runs later on the single-consumer [`TaskQueue`].

pub mod change;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod lock;
pub mod pending;
pub mod registry;
pub mod task_queue;

pub use change::{Batch, BatchPhase, Change, ChangeKind, CorrelationId};
pub use coordinator::{BatchReport, StructuralSink, TransactionCoordinator};
pub use error::{TxnError, TxnResult};
pub use handler::{
    ApplyOutcome, ChangeHandler, HandlerContext, HandlerState, NoOpHandler, StructuralDelta,
};
pub use lock::{DomainGuard, LockManager, LockPolicy};
pub use pending::{PendingBackendChanges, PendingFields, PendingStatus};
pub use registry::{HandlerEntry, HandlerFactory, HandlerRegistry};
pub use task_queue::{TaskFuture, TaskQueue};
