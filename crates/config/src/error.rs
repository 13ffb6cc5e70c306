use thiserror::Error;

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating or writing the configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// The application version does not start with a major version number.
    #[error("invalid application version: {0:?}")]
    InvalidVersion(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),
}
