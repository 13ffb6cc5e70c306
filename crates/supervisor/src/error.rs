use thiserror::Error;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
///
/// Anything returned from [`crate::Supervisor::run`] is fatal; recoverable
/// problems are logged and never surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be generated or written.
    #[error(transparent)]
    Config(#[from] steward_config::Error),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The application could not be launched or supervised.
    #[error(transparent)]
    Process(#[from] steward_process::Error),

    /// The lifecycle state could not be written.
    #[error(transparent)]
    State(#[from] steward_state::Error),
}
