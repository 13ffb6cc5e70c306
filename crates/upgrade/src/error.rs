use thiserror::Error;

/// Result type for upgrade operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Another upgrade holds the run lock.
    #[error("upgrade already in progress")]
    AlreadyRunning,

    /// A database service command failed.
    #[error("database service error: {0}")]
    Database(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A run summary could not be encoded or decoded.
    #[error("{0}: {1}")]
    Json(&'static str, #[source] serde_json::Error),

    /// An error occurred in the process layer.
    #[error(transparent)]
    Process(#[from] steward_process::Error),

    /// An error occurred in the state store.
    #[error(transparent)]
    State(#[from] steward_state::Error),
}
