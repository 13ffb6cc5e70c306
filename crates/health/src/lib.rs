//! Answers external health polls from the lifecycle state and live probes.
//!
//! Transitional phases are always healthy so slow starts and upgrades are
//! never penalized. In `RUNNING` the answer is layered: a missing process is
//! unhealthy, a responding endpoint is healthy, and a live process whose
//! endpoint is not answering yet is still loading, which is also healthy.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod probe;

pub use probe::{DEFAULT_PROBE_TIMEOUT, EndpointProbe, HttpProbe};

use std::fmt;
use std::sync::Arc;

use steward_process::ProcessFinder;
use steward_state::{LifecycleState, StateStore};
use tracing::{debug, warn};

/// Result of a health check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    /// Starting, initializing, or upgrading.
    Transitional(LifecycleState),

    /// The last upgrade failed.
    UpgradeFailed,

    /// No readable state.
    Unknown,

    /// Running and serving.
    Running,

    /// Running, process alive, endpoint not answering yet.
    RunningLoading,

    /// Running according to the state, but no process exists.
    RunningNoProcess,
}

impl HealthStatus {
    /// Short diagnostic token for stdout.
    #[must_use]
    pub const fn status_text(&self) -> &'static str {
        match self {
            Self::Transitional(state) => state.as_str(),
            Self::UpgradeFailed => "UPGRADE_FAILED",
            Self::Unknown => "UNKNOWN",
            Self::Running => "RUNNING",
            Self::RunningLoading => "RUNNING_LOADING",
            Self::RunningNoProcess => "RUNNING_NO_PROCESS",
        }
    }

    /// Whether the container should be considered healthy.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(
            self,
            Self::Transitional(_) | Self::Running | Self::RunningLoading
        )
    }

    /// Exit code for the health command: 0 healthy, 1 unhealthy.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.is_healthy() { 0 } else { 1 }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_text())
    }
}

/// Options for configuring a `HealthReporter`.
pub struct HealthReporterOptions {
    /// Finds the running application.
    pub finder: Arc<dyn ProcessFinder>,

    /// Probes the application's endpoint.
    pub probe: Arc<dyn EndpointProbe>,

    /// The lifecycle state.
    pub state: Arc<dyn StateStore>,
}

/// Answers health queries.
pub struct HealthReporter {
    finder: Arc<dyn ProcessFinder>,
    probe: Arc<dyn EndpointProbe>,
    state: Arc<dyn StateStore>,
}

impl HealthReporter {
    /// Creates a new `HealthReporter`.
    #[must_use]
    pub fn new(
        HealthReporterOptions {
            finder,
            probe,
            state,
        }: HealthReporterOptions,
    ) -> Self {
        Self {
            finder,
            probe,
            state,
        }
    }

    /// Checks health.
    pub async fn check(&self) -> HealthStatus {
        let state = match self.state.get() {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!("no lifecycle state recorded");
                return HealthStatus::Unknown;
            }
            Err(e) => {
                warn!("could not read lifecycle state: {}", e);
                return HealthStatus::Unknown;
            }
        };

        match state {
            LifecycleState::UpgradeFailed => HealthStatus::UpgradeFailed,
            LifecycleState::Running => self.check_running().await,
            transitional => HealthStatus::Transitional(transitional),
        }
    }

    async fn check_running(&self) -> HealthStatus {
        if self.finder.find().is_empty() {
            return HealthStatus::RunningNoProcess;
        }

        if self.probe.responds().await {
            HealthStatus::Running
        } else {
            HealthStatus::RunningLoading
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_and_codes() {
        let cases = [
            (HealthStatus::Transitional(LifecycleState::UpgradeRetry), "UPGRADE_RETRY", 0),
            (HealthStatus::UpgradeFailed, "UPGRADE_FAILED", 1),
            (HealthStatus::Unknown, "UNKNOWN", 1),
            (HealthStatus::Running, "RUNNING", 0),
            (HealthStatus::RunningLoading, "RUNNING_LOADING", 0),
            (HealthStatus::RunningNoProcess, "RUNNING_NO_PROCESS", 1),
        ];

        for (status, token, code) in cases {
            assert_eq!(status.to_string(), token);
            assert_eq!(status.exit_code(), code, "{token}");
        }
    }
}
