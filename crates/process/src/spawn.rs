//! Process spawning for managed mode and one-shot invocations.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::SupervisedApplication;
use crate::error::{Error, Result};
use crate::exec::resolve_user;

/// How long output forwarding may lag behind process exit.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Represents a running supervised process.
///
/// The handle owns the child. Dropping it does not kill the process.
pub struct SupervisedProcess {
    /// Child handle
    child: Child,

    /// Process ID
    pid: u32,

    /// Tracker for the output forwarding tasks
    task_tracker: TaskTracker,
}

impl SupervisedProcess {
    /// Returns the process ID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Waits for the process to exit.
    ///
    /// Cancel safe: dropping the future leaves the process running and the
    /// handle usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit status could not be collected.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::Io("failed to wait for process", e))?;

        if status.success() {
            info!("process {} exited with status: {}", self.pid, status);
        } else {
            error!("process {} exited with non-zero status: {}", self.pid, status);
        }

        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, self.task_tracker.wait())
            .await
            .is_err()
        {
            debug!("output of process {} still open after exit", self.pid);
        }

        Ok(status)
    }

    /// Sends a signal to the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be sent.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        send_signal(self.pid, signal)
    }

    /// Sends SIGTERM, waits up to `grace` for the process to exit, then kills it.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be signalled or reaped.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus> {
        info!("terminating process {}", self.pid);

        match self.signal(Signal::SIGTERM) {
            Ok(()) => {}
            // Already exited, only needs reaping.
            Err(Error::Signal {
                source: nix::Error::ESRCH,
                ..
            }) => {}
            Err(e) => return Err(e),
        }

        if let Ok(result) = tokio::time::timeout(grace, self.wait()).await {
            return result;
        }

        warn!(
            "process {} did not exit within {:?}, killing",
            self.pid, grace
        );
        self.child
            .kill()
            .await
            .map_err(|e| Error::Io("failed to kill process", e))?;

        self.wait().await
    }
}

/// Converts an exit status to the code a supervisor should exit with.
///
/// Processes killed by a signal map to `128 + signal`, as shells report them.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

pub(crate) fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let raw = i32::try_from(pid).map_err(|_| Error::Signal {
        pid,
        signal: signal.as_str(),
        source: nix::Error::EINVAL,
    })?;

    signal::kill(Pid::from_raw(raw), signal).map_err(|source| Error::Signal {
        pid,
        signal: signal.as_str(),
        source,
    })
}

/// Spawns `application` as a child with its output forwarded to its handlers.
///
/// # Errors
///
/// Returns an error if the process could not be spawned.
pub fn spawn(application: Arc<dyn SupervisedApplication>) -> Result<SupervisedProcess> {
    let task_tracker = TaskTracker::new();

    let mut cmd = Command::new(application.executable());
    cmd.args(application.args());

    if let Some(working_dir) = application.working_dir() {
        cmd.current_dir(working_dir);
    }

    for (key, value) in application.env() {
        cmd.env(key, value);
    }

    if let Some(user) = application.user() {
        let (uid, gid) = resolve_user(user)?;
        cmd.uid(uid.as_raw());
        cmd.gid(gid.as_raw());
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!("Spawning process: {:?}", cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Io("Failed to spawn process", e))?;

    let pid = child.id().ok_or_else(|| {
        Error::SpawnProcess("No PID available for spawned process".to_string())
    })?;

    debug!("Process spawned with PID: {}", pid);

    if let Some(stdout) = child.stdout.take() {
        let application = Arc::clone(&application);
        task_tracker.spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                application.handle_stdout(&line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let application = Arc::clone(&application);
        task_tracker.spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                application.handle_stderr(&line);
            }
        });
    }

    task_tracker.close();

    info!("started {} with pid {}", application.name(), pid);

    Ok(SupervisedProcess {
        child,
        pid,
        task_tracker,
    })
}

/// Runs `application` to completion.
///
/// # Errors
///
/// Returns an error if the process could not be spawned or reaped.
pub async fn run_to_completion(application: Arc<dyn SupervisedApplication>) -> Result<ExitStatus> {
    let mut process = spawn(application)?;
    process.wait().await
}
