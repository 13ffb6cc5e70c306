//! Startup Phase 1: Starting
//!
//! Prepares the filesystem and writes the first configuration:
//! - Creates the data directories and hands them to the application user
//! - Installs add-on requirements
//! - Detects resources and writes the tuned configuration

use super::Supervisor;
use crate::error::Result;

use std::fs;
use std::os::unix::fs::chown;
use std::path::Path;

use nix::unistd::{Gid, Uid};
use steward_process::{SupervisedApplication, resolve_user};
use steward_state::LifecycleState;
use tracing::{debug, info, warn};

pub async fn execute(supervisor: &mut Supervisor) -> Result<()> {
    supervisor.state.set(LifecycleState::Starting)?;

    prepare_directories(supervisor);

    if let Some(installer) = &supervisor.installer {
        let installed = installer.install().await;
        info!("installed {} requirements file(s)", installed);
    }

    let reading = supervisor.configurator.detect();
    supervisor.configurator.write(reading)?;
    supervisor.reading = Some(reading);

    Ok(())
}

fn prepare_directories(supervisor: &Supervisor) {
    for dir in &supervisor.directories {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("failed to create {}: {}", dir.display(), e);
        }
    }

    let Some(user) = supervisor.application.user() else {
        return;
    };
    if !Uid::effective().is_root() {
        debug!("not running as root, leaving directory ownership alone");
        return;
    }

    let (uid, gid) = match resolve_user(user) {
        Ok(ids) => ids,
        Err(e) => {
            warn!("cannot hand directories to {}: {}", user, e);
            return;
        }
    };

    for dir in &supervisor.directories {
        chown_recursive(dir, uid, gid);
    }
}

fn chown_recursive(path: &Path, uid: Uid, gid: Gid) {
    if let Err(e) = chown(path, Some(uid.as_raw()), Some(gid.as_raw())) {
        warn!("failed to chown {}: {}", path.display(), e);
        return;
    }

    if !path.is_dir() || path.is_symlink() {
        return;
    }

    let Ok(entries) = fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        chown_recursive(&entry.path(), uid, gid);
    }
}
