//! Agent error type.

use cfgtxn_backend::BackendError;
use cfgtxn_core::TxnError;
use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Invalid or unreadable agent configuration file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Platform port description is missing or inconsistent.
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Txn(#[from] TxnError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
