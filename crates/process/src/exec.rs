//! Direct mode: replacing the current process with the application.

use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::unistd::{Gid, Uid, User};
use tracing::info;

use crate::SupervisedApplication;
use crate::error::Error;

/// Replaces the current process image with `application`.
///
/// On success this never returns; the returned value is always the reason the
/// exec failed.
pub fn exec(application: &dyn SupervisedApplication) -> Error {
    let mut cmd = Command::new(application.executable());
    cmd.args(application.args());

    if let Some(working_dir) = application.working_dir() {
        cmd.current_dir(working_dir);
    }

    for (key, value) in application.env() {
        cmd.env(key, value);
    }

    if let Some(user) = application.user() {
        match resolve_user(user) {
            Ok((uid, gid)) => {
                cmd.uid(uid.as_raw());
                cmd.gid(gid.as_raw());
            }
            Err(e) => return e,
        }
    }

    info!(
        "handing over to {} {}",
        application.executable(),
        application.args().join(" ")
    );

    Error::Io("failed to exec application", cmd.exec())
}

/// Looks up the uid and primary gid of `name`.
///
/// # Errors
///
/// Returns an error if the user database could not be read or has no such user.
pub fn resolve_user(name: &str) -> crate::Result<(Uid, Gid)> {
    let user = User::from_name(name)
        .map_err(|e| Error::Io("failed to read user database", e.into()))?
        .ok_or_else(|| Error::UnknownUser(name.to_string()))?;

    Ok((user.uid, user.gid))
}
