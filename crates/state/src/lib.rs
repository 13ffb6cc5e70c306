//! Persisted lifecycle state shared between the supervisor, the upgrade
//! command and the health probe.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod fs;
mod memory;

pub use error::{Error, Result};
pub use fs::FsStateStore;
pub use memory::MemoryStateStore;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The single phase indicator of the supervised application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Preparing the filesystem, packages and configuration.
    Starting,

    /// Waiting for and initializing the database.
    Initializing,

    /// Applying module/schema upgrades.
    Upgrading,

    /// Waiting on a recoverable pre-flight condition during an upgrade.
    UpgradeRetry,

    /// The application has been launched.
    Running,

    /// An upgrade failed; stays until the next successful upgrade or a reset.
    UpgradeFailed,
}

impl LifecycleState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Starting,
        Self::Initializing,
        Self::Upgrading,
        Self::UpgradeRetry,
        Self::Running,
        Self::UpgradeFailed,
    ];

    /// The persisted token for this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Initializing => "INITIALIZING",
            Self::Upgrading => "UPGRADING",
            Self::UpgradeRetry => "UPGRADE_RETRY",
            Self::Running => "RUNNING",
            Self::UpgradeFailed => "UPGRADE_FAILED",
        }
    }

    /// Whether this is a startup or upgrade phase that should never be
    /// reported as unhealthy.
    #[must_use]
    pub const fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Initializing | Self::Upgrading | Self::UpgradeRetry
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == token)
            .ok_or_else(|| Error::UnknownState(token.to_string()))
    }
}

/// Storage for the current lifecycle state.
///
/// Implementations must replace the value atomically: a reader sees either the
/// previous value or the new one, never a partial write.
pub trait StateStore: Send + Sync + 'static {
    /// Returns the current state, or `None` if none has been written yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be read or is not a known state.
    fn get(&self) -> Result<Option<LifecycleState>>;

    /// Replaces the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be written.
    fn set(&self, state: LifecycleState) -> Result<()>;
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn get(&self) -> Result<Option<LifecycleState>> {
        (**self).get()
    }

    fn set(&self, state: LifecycleState) -> Result<()> {
        (**self).set(state)
    }
}
