//! Container runtime error types.

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The runtime command exited non-zero or could not be spawned.
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// The runtime command did not finish within the configured timeout.
    #[error("container {command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_error_display() {
        let err = ContainerError::CommandFailed {
            command: "stop".to_string(),
            message: "no such container".to_string(),
        };
        assert_eq!(err.to_string(), "container stop failed: no such container");

        let err = ContainerError::Timeout {
            command: "run".to_string(),
            seconds: 30,
        };
        assert_eq!(err.to_string(), "container run timed out after 30s");
    }
}
