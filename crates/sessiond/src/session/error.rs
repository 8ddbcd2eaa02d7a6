//! Session lifecycle errors.

use thiserror::Error;

use super::log::LogError;
use crate::container::ContainerError;

/// Result type for lifecycle transitions.
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The id is not in the registry.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Delete refused because the container is still running.
    #[error("container for session {0} is still running")]
    StillRunning(String),

    /// A runtime command exited non-zero, could not be spawned, or was
    /// given input it refused.
    #[error("runtime {operation} failed: {stderr}")]
    Runtime { operation: String, stderr: String },

    #[error("runtime {operation} timed out after {seconds}s")]
    RuntimeTimeout { operation: String, seconds: u64 },

    #[error(transparent)]
    Log(#[from] LogError),
}

impl From<ContainerError> for SessionError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::CommandFailed { command, message } => Self::Runtime {
                operation: command,
                stderr: message,
            },
            ContainerError::Timeout { command, seconds } => Self::RuntimeTimeout {
                operation: command,
                seconds,
            },
            ContainerError::InvalidInput(message) => Self::Runtime {
                operation: "validate".to_string(),
                stderr: message,
            },
        }
    }
}
