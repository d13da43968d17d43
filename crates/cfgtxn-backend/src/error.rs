//! Error types for backend collaborators.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by a backend collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Switch-state store command failed.
    #[error("Store operation '{operation}' failed on {key}: {message}")]
    Store {
        operation: String,
        key: String,
        message: String,
    },

    /// Hardware object does not exist (or no longer exists).
    #[error("Hardware object not found: {0}")]
    ObjectNotFound(String),

    /// Hardware object has no such attribute.
    #[error("Attribute '{attribute}' not supported on {object}")]
    AttributeUnsupported { object: String, attribute: String },

    /// Hardware API call failed.
    #[error("Hardware API error on {object}: {message}")]
    Hardware { object: String, message: String },

    /// Cluster orchestrator call failed.
    #[error("Cluster operation '{operation}' failed: {message}")]
    Cluster { operation: String, message: String },

    /// Datastore call failed.
    #[error("Datastore operation '{operation}' failed: {message}")]
    Datastore { operation: String, message: String },

    /// Advisory lock is held by another session.
    #[error("Lock on domain '{0}' is held by another session")]
    LockHeld(String),

    /// Failed to spawn a shell command.
    #[error("Failed to execute command '{command}': {source}")]
    ShellExec {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Shell command returned a non-zero exit code.
    #[error("Command '{command}' failed with exit code {exit_code}: {output}")]
    ShellCommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// Data read from a backend could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl BackendError {
    pub fn store(
        operation: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Store {
            operation: operation.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn hardware(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hardware {
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn cluster(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cluster {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn datastore(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Datastore {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::LockHeld(_) | BackendError::Store { .. } | BackendError::Cluster { .. }
        )
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for BackendError {
    fn from(e: redis::RedisError) -> Self {
        BackendError::store("redis", "-", e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::InvalidData(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackendError::store("hset", "PORT|Ethernet1_1", "connection reset");
        assert_eq!(
            err.to_string(),
            "Store operation 'hset' failed on PORT|Ethernet1_1: connection reset"
        );

        let err = BackendError::LockHeld("interfaces".to_string());
        assert_eq!(
            err.to_string(),
            "Lock on domain 'interfaces' is held by another session"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(BackendError::LockHeld("vlan".into()).is_retryable());
        assert!(BackendError::cluster("get pods", "timeout").is_retryable());
        assert!(!BackendError::ObjectNotFound("Ethernet1/0/1".into()).is_retryable());
        assert!(!BackendError::InvalidData("bad".into()).is_retryable());
    }
}
