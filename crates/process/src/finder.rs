//! Discovery of live application processes.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

/// Finds the processes currently running the application binary.
///
/// Must be safe to call repeatedly and return an empty set, not an error,
/// when nothing matches.
pub trait ProcessFinder: Send + Sync + 'static {
    /// Returns the matching process identifiers in ascending order.
    fn find(&self) -> Vec<u32>;
}

impl ProcessFinder for Vec<u32> {
    fn find(&self) -> Vec<u32> {
        self.clone()
    }
}

/// Scans the live process table.
///
/// A process matches when its executable name, or the file name of its first
/// or second command-line element, equals the binary's file name. The second
/// element covers interpreters running a script (`python3 /usr/bin/odoo`).
#[derive(Clone, Debug)]
pub struct SysinfoProcessFinder {
    binary_name: String,
}

impl SysinfoProcessFinder {
    /// Creates a finder for `binary`, matched by file name only.
    pub fn new(binary: impl AsRef<Path>) -> Self {
        let binary = binary.as_ref();
        let binary_name = binary
            .file_name()
            .unwrap_or(binary.as_os_str())
            .to_string_lossy()
            .to_string();

        Self { binary_name }
    }

    /// The file name processes are matched against.
    #[must_use]
    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    fn matches(&self, name: &OsStr, exe: Option<&Path>, cmd: &[std::ffi::OsString]) -> bool {
        let target = OsStr::new(&self.binary_name);

        if name == target || exe.and_then(Path::file_name) == Some(target) {
            return true;
        }

        cmd.iter()
            .take(2)
            .any(|arg| Path::new(arg).file_name() == Some(target))
    }
}

impl ProcessFinder for SysinfoProcessFinder {
    fn find(&self) -> Vec<u32> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_exe(UpdateKind::OnlyIfNotSet)
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );

        let own_pid = std::process::id();

        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(pid, process)| {
                pid.as_u32() != own_pid
                    && process.status() != ProcessStatus::Zombie
                    && self.matches(process.name(), process.exe(), process.cmd())
            })
            .map(|(pid, _)| pid.as_u32())
            .collect();

        pids.sort_unstable();

        debug!("found {} {} process(es)", pids.len(), self.binary_name);

        pids
    }
}
