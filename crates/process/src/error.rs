//! Error types for process operations.

use std::io;

use thiserror::Error;

/// Result type for process operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during process operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// Signal delivery failed.
    #[error("failed to send {signal} to pid {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// Signal name.
        signal: &'static str,
        /// Underlying errno.
        #[source]
        source: nix::Error,
    },

    /// Failed to spawn a process.
    #[error("failed to spawn process: {0}")]
    SpawnProcess(String),

    /// The configured application user does not exist.
    #[error("unknown user: {0}")]
    UnknownUser(String),
}
