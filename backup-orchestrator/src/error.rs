//! Error taxonomy shared by every component of the orchestrator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The SSH session (or local shell) could not be established. Terminal for an operation.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid tool/destination pairing or a missing required secret.
    /// Always raised before any remote side effect.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A remote command exited nonzero. Operations fold this into their result.
    #[error("Command failed (exit code {code}): {message}")]
    Command { code: i32, message: String },

    /// Mount teardown failure. Logged at debug level and never escalated.
    #[error("Cleanup error: {0}")]
    Cleanup(String),

    #[error("Secret store error: {0}")]
    Secret(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn config(msg: impl Into<String>) -> Self {
        OrchestratorError::Configuration(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        OrchestratorError::Connection(msg.into())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        OrchestratorError::Internal(e.into())
    }
}

impl From<ssh2::Error> for OrchestratorError {
    fn from(e: ssh2::Error) -> Self {
        OrchestratorError::Internal(e.into())
    }
}

impl From<tokio::task::JoinError> for OrchestratorError {
    fn from(e: tokio::task::JoinError) -> Self {
        OrchestratorError::Internal(e.into())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
