//! Freezing and thawing processes without terminating them.

use nix::sys::signal::Signal;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::spawn::send_signal;

/// Suspends and resumes processes by identifier.
pub trait Suspender: Send + Sync + 'static {
    /// Freezes `pid` without terminating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be frozen.
    fn suspend(&self, pid: u32) -> Result<()>;

    /// Thaws `pid`. Resuming a process that no longer exists succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the process exists but could not be thawed.
    fn resume(&self, pid: u32) -> Result<()>;
}

/// Suspender using `SIGSTOP` and `SIGCONT`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignalSuspender;

impl Suspender for SignalSuspender {
    fn suspend(&self, pid: u32) -> Result<()> {
        debug!("stopping pid {}", pid);
        send_signal(pid, Signal::SIGSTOP)
    }

    fn resume(&self, pid: u32) -> Result<()> {
        debug!("continuing pid {}", pid);
        match send_signal(pid, Signal::SIGCONT) {
            Err(Error::Signal {
                source: nix::Error::ESRCH,
                ..
            }) => {
                warn!("pid {} exited while paused", pid);
                Ok(())
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::process::Command;
    use std::thread;
    use std::time::Duration;

    fn state_of(pid: u32) -> char {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).unwrap();
        // The state follows the parenthesised command name.
        let after = stat.rsplit_once(") ").unwrap().1;
        after.chars().next().unwrap()
    }

    #[test]
    fn test_suspend_then_resume() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        SignalSuspender.suspend(pid).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(state_of(pid), 'T');

        SignalSuspender.resume(pid).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_ne!(state_of(pid), 'T');

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_resume_of_exited_process_is_ok() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert!(SignalSuspender.resume(pid).is_ok());
    }

    #[test]
    fn test_suspend_of_exited_process_fails() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert!(SignalSuspender.suspend(pid).is_err());
    }
}
