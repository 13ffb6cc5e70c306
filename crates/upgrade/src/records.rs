//! Persisted upgrade run records with bounded retention.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::upgrader::encode_file_name;

/// Default number of run records kept.
pub const DEFAULT_RUNS_RETAINED: usize = 10;

const SUMMARY_FILE: &str = "summary.json";
const LATEST_LINK: &str = "latest";
const RUN_ID_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Outcome of upgrading one database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeOutcome {
    /// Changes were applied.
    Succeeded,

    /// Nothing was pending.
    SkippedUpToDate,

    /// The check or the upgrade failed.
    Failed,

    /// Changes are pending but were not applied (dry run).
    Pending,
}

/// Overall status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    /// No database failed.
    Ok,

    /// At least one database failed.
    Failed,
}

/// Result for a single database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseUpgradeResult {
    /// Database name.
    pub name: String,

    /// What happened.
    pub outcome: UpgradeOutcome,

    /// Log file name, relative to the run directory.
    pub log_reference: String,
}

/// A completed upgrade invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRun {
    /// Timestamp-derived identifier, also the run directory name.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub finished_at: DateTime<Utc>,

    /// Whether this was a check-only run.
    pub dry_run: bool,

    /// The requested database, if one was given.
    pub target: Option<String>,

    /// Per-database results, in processing order.
    pub results: Vec<DatabaseUpgradeResult>,

    /// `Failed` if any database failed.
    pub overall_status: OverallStatus,
}

impl UpgradeRun {
    /// Whether no database failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.overall_status == OverallStatus::Ok
    }

    /// The overall status implied by `results`.
    #[must_use]
    pub fn status_of(results: &[DatabaseUpgradeResult]) -> OverallStatus {
        if results.iter().any(|r| r.outcome == UpgradeOutcome::Failed) {
            OverallStatus::Failed
        } else {
            OverallStatus::Ok
        }
    }
}

/// Log file name for `database`.
#[must_use]
pub fn log_file_name(database: &str) -> String {
    format!("{}.log", encode_file_name(database))
}

/// Directory of run records, oldest evicted first.
#[derive(Clone, Debug)]
pub struct RunStore {
    dir: PathBuf,
    retained: usize,
}

impl RunStore {
    /// Creates a store in `dir` keeping at most `retained` runs (at least one).
    pub fn new(dir: impl Into<PathBuf>, retained: usize) -> Self {
        Self {
            dir: dir.into(),
            retained: retained.max(1),
        }
    }

    /// The records directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns an unused run id for a run starting at `now`.
    #[must_use]
    pub fn next_run_id(&self, now: DateTime<Utc>) -> String {
        let base = now.format(RUN_ID_FORMAT).to_string();
        if !self.dir.join(&base).exists() {
            return base;
        }

        let mut n = 1u32;
        loop {
            let candidate = format!("{base}-{n:02}");
            if !self.dir.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Writes `run` with one log per database, points `latest` at it, and
    /// evicts the oldest runs beyond the retention count.
    ///
    /// The run directory is assembled under a hidden name and renamed into
    /// place, so readers never see a partial record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written.
    pub fn persist(&self, run: &UpgradeRun, logs: &[(String, String)]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Io("failed to create runs directory", e))?;

        let staging = self.dir.join(format!(".{}.partial", run.run_id));
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .map_err(|e| Error::Io("failed to clear staging directory", e))?;
        }
        fs::create_dir(&staging).map_err(|e| Error::Io("failed to create run directory", e))?;

        for (database, log) in logs {
            fs::write(staging.join(log_file_name(database)), log)
                .map_err(|e| Error::Io("failed to write database log", e))?;
        }

        let summary = serde_json::to_vec_pretty(run)
            .map_err(|e| Error::Json("failed to encode run summary", e))?;
        fs::write(staging.join(SUMMARY_FILE), summary)
            .map_err(|e| Error::Io("failed to write run summary", e))?;

        let run_dir = self.dir.join(&run.run_id);
        fs::rename(&staging, &run_dir)
            .map_err(|e| Error::Io("failed to move run into place", e))?;

        self.update_latest(&run.run_id)?;
        self.prune()?;

        info!("recorded upgrade run {}", run_dir.display());

        Ok(run_dir)
    }

    /// Run ids present on disk, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory could not be listed.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io("failed to list runs", e)),
        };

        let mut runs: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| !name.starts_with('.'))
            .collect();
        runs.sort();

        Ok(runs)
    }

    /// Reads the run `latest` points at.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary exists but could not be read.
    pub fn latest(&self) -> Result<Option<UpgradeRun>> {
        let path = self.dir.join(LATEST_LINK).join(SUMMARY_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io("failed to read latest run", e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Json("failed to decode run summary", e))
    }

    fn update_latest(&self, run_id: &str) -> Result<()> {
        let staging = self.dir.join(format!(".{LATEST_LINK}.tmp"));
        match fs::remove_file(&staging) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io("failed to clear stale link", e)),
        }

        symlink(run_id, &staging).map_err(|e| Error::Io("failed to create latest link", e))?;
        fs::rename(&staging, self.dir.join(LATEST_LINK))
            .map_err(|e| Error::Io("failed to replace latest link", e))?;

        debug!("latest upgrade run is now {}", run_id);

        Ok(())
    }

    fn prune(&self) -> Result<()> {
        let runs = self.list()?;
        let excess = runs.len().saturating_sub(self.retained);

        for run_id in &runs[..excess] {
            debug!("evicting upgrade run {}", run_id);
            if let Err(e) = fs::remove_dir_all(self.dir.join(run_id)) {
                warn!("failed to evict upgrade run {}: {}", run_id, e);
            }
        }

        Ok(())
    }
}
