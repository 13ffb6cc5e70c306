use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] steward_config::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Could not set global default subscriber.
    #[error("could not set global default subscriber: {0}")]
    SetTracing(#[from] tracing::dispatcher::SetGlobalDefaultError),

    /// Could not install a signal handler.
    #[error("could not install {0} handler: {1}")]
    Signal(&'static str, #[source] std::io::Error),

    /// Supervisor error.
    #[error(transparent)]
    Supervisor(#[from] steward_supervisor::Error),

    /// Upgrade error.
    #[error(transparent)]
    Upgrade(#[from] steward_upgrade::Error),
}
