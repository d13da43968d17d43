//! Transaction error taxonomy.

use cfgtxn_backend::BackendError;
use std::time::Duration;
use thiserror::Error;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

#[derive(Debug, Error)]
pub enum TxnError {
    /// Change path does not resolve to a known backend entity.
    #[error("Invalid target '{path}': {message}")]
    InvalidTarget { path: String, message: String },

    /// Value outside backend bounds, or deletion without a default.
    #[error("Constraint violation on '{path}': {message}")]
    ConstraintViolation { path: String, message: String },

    /// Backend write failed during commit.
    #[error("Apply failed on '{path}': {source}")]
    ApplyFailure {
        path: String,
        #[source]
        source: BackendError,
    },

    /// Backend restart or readiness polling exceeded its bound.
    #[error("Backend unreachable: {message}")]
    BackendUnreachable { message: String },

    /// Domain lock could not be acquired within the configured timeout.
    #[error("Timed out after {waited:?} acquiring lock on domain '{domain}'")]
    LockTimeout { domain: String, waited: Duration },

    /// Change path lies outside every registered subtree.
    #[error("No handler registered for subtree of '{path}'")]
    UnknownSubtree { path: String },

    /// A change in a batch was rejected; wraps the handler's error.
    #[error("Change #{index} rejected by {handler}: {source}")]
    Rejected {
        index: usize,
        handler: String,
        #[source]
        source: Box<TxnError>,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TxnError {
    pub fn invalid_target(path: impl ToString, message: impl Into<String>) -> Self {
        TxnError::InvalidTarget {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn constraint(path: impl ToString, message: impl Into<String>) -> Self {
        TxnError::ConstraintViolation {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn apply_failure(path: impl ToString, source: BackendError) -> Self {
        TxnError::ApplyFailure {
            path: path.to_string(),
            source,
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        TxnError::BackendUnreachable {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TxnError::Internal {
            message: message.into(),
        }
    }

    /// Attributes this error to change `index` handled by `handler`.
    pub fn rejected(index: usize, handler: impl Into<String>, source: TxnError) -> Self {
        TxnError::Rejected {
            index,
            handler: handler.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through [`TxnError::Rejected`].
    pub fn root_cause(&self) -> &TxnError {
        match self {
            TxnError::Rejected { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns true for errors raised before any backend write.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.root_cause(),
            TxnError::InvalidTarget { .. }
                | TxnError::ConstraintViolation { .. }
                | TxnError::UnknownSubtree { .. }
        )
    }
}
