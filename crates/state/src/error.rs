use thiserror::Error;

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing the lifecycle state.
#[derive(Debug, Error)]
pub enum Error {
    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The stored value is not a known lifecycle state.
    #[error("unknown lifecycle state: {0:?}")]
    UnknownState(String),
}
