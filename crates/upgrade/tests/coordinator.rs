use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use steward_process::{Error as ProcessError, Suspender};
use steward_state::{LifecycleState, MemoryStateStore, StateStore};
use steward_upgrade::{
    ApplyOutcome, DatabaseService, Error, ModuleUpgrader, OverallStatus, PendingCheck, RunLock,
    RunStore, UpgradeCoordinator, UpgradeCoordinatorOptions, UpgradeOutcome,
};
use tempfile::TempDir;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Signal {
    Stop(u32),
    Cont(u32),
}

#[derive(Default)]
struct RecordingSuspender {
    signals: Mutex<Vec<Signal>>,
}

impl RecordingSuspender {
    fn signals(&self) -> Vec<Signal> {
        self.signals.lock().clone()
    }

    fn still_paused(&self) -> HashSet<u32> {
        let mut paused = HashSet::new();
        for signal in self.signals() {
            match signal {
                Signal::Stop(pid) => paused.insert(pid),
                Signal::Cont(pid) => paused.remove(&pid),
            };
        }
        paused
    }
}

impl Suspender for RecordingSuspender {
    fn suspend(&self, pid: u32) -> steward_process::Result<()> {
        self.signals.lock().push(Signal::Stop(pid));
        Ok(())
    }

    fn resume(&self, pid: u32) -> steward_process::Result<()> {
        self.signals.lock().push(Signal::Cont(pid));
        Ok(())
    }
}

struct FakeDatabases {
    names: Option<Vec<&'static str>>,
    listed: Mutex<usize>,
}

impl FakeDatabases {
    fn new(names: &[&'static str]) -> Self {
        Self {
            names: Some(names.to_vec()),
            listed: Mutex::new(0),
        }
    }

    fn unreachable() -> Self {
        Self {
            names: None,
            listed: Mutex::new(0),
        }
    }
}

#[async_trait]
impl DatabaseService for FakeDatabases {
    async fn is_ready(&self) -> bool {
        self.names.is_some()
    }

    async fn list_databases(&self) -> steward_upgrade::Result<Vec<String>> {
        *self.listed.lock() += 1;
        self.names
            .as_ref()
            .map(|names| names.iter().map(ToString::to_string).collect())
            .ok_or_else(|| Error::Database("connection refused".to_string()))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behavior {
    UpToDate,
    Succeeds,
    Fails,
    Panics,
    Hangs,
}

#[derive(Default)]
struct ScriptedUpgrader {
    behaviors: HashMap<&'static str, Behavior>,
    checked: Mutex<Vec<String>>,
    applied: Mutex<Vec<String>>,
}

impl ScriptedUpgrader {
    fn new(behaviors: &[(&'static str, Behavior)]) -> Self {
        Self {
            behaviors: behaviors.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn behavior(&self, database: &str) -> Behavior {
        self.behaviors
            .get(database)
            .copied()
            .unwrap_or(Behavior::UpToDate)
    }
}

#[async_trait]
impl ModuleUpgrader for ScriptedUpgrader {
    async fn check(&self, database: &str) -> steward_upgrade::Result<PendingCheck> {
        self.checked.lock().push(database.to_string());
        Ok(PendingCheck {
            pending: self.behavior(database) != Behavior::UpToDate,
            detail: format!("checked {database}\n"),
        })
    }

    async fn apply(&self, database: &str) -> steward_upgrade::Result<ApplyOutcome> {
        self.applied.lock().push(database.to_string());
        match self.behavior(database) {
            Behavior::Panics => panic!("injected failure upgrading {database}"),
            Behavior::Hangs => std::future::pending().await,
            Behavior::Fails => Ok(ApplyOutcome {
                success: false,
                log: "ERROR: module crashed\n".to_string(),
            }),
            Behavior::UpToDate | Behavior::Succeeds => Ok(ApplyOutcome {
                success: true,
                log: "upgraded\n".to_string(),
            }),
        }
    }
}

struct Harness {
    dir: TempDir,
    databases: Arc<FakeDatabases>,
    state: MemoryStateStore,
    suspender: Arc<RecordingSuspender>,
    upgrader: Arc<ScriptedUpgrader>,
    coordinator: Arc<UpgradeCoordinator>,
}

impl Harness {
    fn new(
        state: MemoryStateStore,
        pids: Vec<u32>,
        databases: FakeDatabases,
        upgrader: ScriptedUpgrader,
        retained: usize,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let databases = Arc::new(databases);
        let suspender = Arc::new(RecordingSuspender::default());
        let upgrader = Arc::new(upgrader);

        let coordinator = Arc::new(UpgradeCoordinator::new(UpgradeCoordinatorOptions {
            database: databases.clone(),
            finder: Arc::new(pids),
            runs: RunStore::new(dir.path().join("runs"), retained),
            state: Arc::new(state.clone()),
            suspender: suspender.clone(),
            upgrader: upgrader.clone(),
        }));

        Self {
            dir,
            databases,
            state,
            suspender,
            upgrader,
            coordinator,
        }
    }

    fn runs(&self) -> RunStore {
        RunStore::new(self.dir.path().join("runs"), 10)
    }
}

#[tokio::test]
async fn test_successful_run_pauses_and_restores() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        vec![10, 11],
        FakeDatabases::new(&["crm", "prod"]),
        ScriptedUpgrader::new(&[("prod", Behavior::Succeeds)]),
        10,
    );

    let run = h.coordinator.run(None, false).await.unwrap();

    let outcomes: Vec<_> = run.results.iter().map(|r| (r.name.as_str(), r.outcome)).collect();
    assert_eq!(
        outcomes,
        vec![
            ("crm", UpgradeOutcome::SkippedUpToDate),
            ("prod", UpgradeOutcome::Succeeded),
        ]
    );
    assert_eq!(run.overall_status, OverallStatus::Ok);
    assert_eq!(
        h.suspender.signals(),
        vec![
            Signal::Stop(10),
            Signal::Stop(11),
            Signal::Cont(10),
            Signal::Cont(11),
        ]
    );
    assert_eq!(
        h.state.history(),
        vec![LifecycleState::Upgrading, LifecycleState::Running]
    );
    assert_eq!(h.runs().latest().unwrap(), Some(run));
}

#[tokio::test]
async fn test_failure_is_isolated_per_database() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        vec![10],
        FakeDatabases::new(&["a", "b"]),
        ScriptedUpgrader::new(&[("a", Behavior::Fails), ("b", Behavior::Succeeds)]),
        10,
    );

    let run = h.coordinator.run(None, false).await.unwrap();

    assert_eq!(*h.upgrader.applied.lock(), vec!["a", "b"]);
    assert_eq!(run.results[0].outcome, UpgradeOutcome::Failed);
    assert_eq!(run.results[1].outcome, UpgradeOutcome::Succeeded);
    assert!(!run.is_success());
    assert!(h.suspender.still_paused().is_empty());
    assert_eq!(h.state.get().unwrap(), Some(LifecycleState::UpgradeFailed));

    let log = std::fs::read_to_string(
        h.dir
            .path()
            .join("runs")
            .join(&run.run_id)
            .join(&run.results[0].log_reference),
    )
    .unwrap();
    assert!(log.contains("module crashed"));
}

#[tokio::test]
async fn test_panic_mid_loop_still_resumes() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        vec![10, 11, 12],
        FakeDatabases::new(&["a", "b", "c"]),
        ScriptedUpgrader::new(&[("a", Behavior::Succeeds), ("b", Behavior::Panics)]),
        10,
    );

    let coordinator = h.coordinator.clone();
    let result = tokio::spawn(async move { coordinator.run(None, false).await }).await;

    assert!(result.unwrap_err().is_panic());
    assert!(h.suspender.still_paused().is_empty());
    assert_eq!(h.suspender.signals().len(), 6);
    assert_eq!(h.state.get().unwrap(), Some(LifecycleState::UpgradeFailed));
    assert_eq!(*h.upgrader.checked.lock(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_dropped_run_resumes_and_releases_lock() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        vec![10],
        FakeDatabases::new(&["a"]),
        ScriptedUpgrader::new(&[("a", Behavior::Hangs)]),
        10,
    );

    let interrupted =
        tokio::time::timeout(Duration::from_millis(100), h.coordinator.run(None, false)).await;

    assert!(interrupted.is_err());
    assert!(h.suspender.still_paused().is_empty());
    assert_eq!(h.state.get().unwrap(), Some(LifecycleState::UpgradeFailed));
    assert!(RunLock::acquire(h.runs().dir()).is_ok());
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        vec![10],
        FakeDatabases::new(&["a", "b"]),
        ScriptedUpgrader::new(&[("a", Behavior::Succeeds)]),
        10,
    );

    let run = h.coordinator.run(None, true).await.unwrap();

    assert!(run.dry_run);
    assert_eq!(run.results[0].outcome, UpgradeOutcome::Pending);
    assert_eq!(run.results[1].outcome, UpgradeOutcome::SkippedUpToDate);
    assert!(h.upgrader.applied.lock().is_empty());
    assert!(h.suspender.signals().is_empty());
    assert!(h.state.history().is_empty());
    assert_eq!(h.state.get().unwrap(), Some(LifecycleState::Running));
    assert_eq!(h.runs().latest().unwrap().map(|r| r.dry_run), Some(true));
}

#[tokio::test]
async fn test_nothing_to_do_is_trivial_success() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        Vec::new(),
        FakeDatabases::new(&[]),
        ScriptedUpgrader::default(),
        10,
    );

    let run = h.coordinator.run(None, false).await.unwrap();

    assert!(run.results.is_empty());
    assert!(run.is_success());
    assert_eq!(h.state.get().unwrap(), Some(LifecycleState::Running));
}

#[tokio::test]
async fn test_discovery_failure_means_no_databases() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        vec![10],
        FakeDatabases::unreachable(),
        ScriptedUpgrader::default(),
        10,
    );

    let run = h.coordinator.run(None, false).await.unwrap();

    assert!(run.results.is_empty());
    assert!(run.is_success());
    assert!(h.suspender.still_paused().is_empty());
}

#[tokio::test]
async fn test_explicit_target_skips_discovery() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        Vec::new(),
        FakeDatabases::new(&["a", "b"]),
        ScriptedUpgrader::new(&[("b", Behavior::Succeeds)]),
        10,
    );

    let run = h.coordinator.run(Some("b"), false).await.unwrap();

    assert_eq!(*h.databases.listed.lock(), 0);
    assert_eq!(run.target.as_deref(), Some("b"));
    assert_eq!(run.results.len(), 1);
    assert_eq!(run.results[0].outcome, UpgradeOutcome::Succeeded);
}

#[tokio::test]
async fn test_concurrent_run_is_rejected_untouched() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        vec![10],
        FakeDatabases::new(&["a"]),
        ScriptedUpgrader::new(&[("a", Behavior::Succeeds)]),
        10,
    );
    let _held = RunLock::acquire(h.runs().dir()).unwrap();

    let result = h.coordinator.run(None, false).await;

    assert!(matches!(result, Err(Error::AlreadyRunning)));
    assert!(h.suspender.signals().is_empty());
    assert!(h.state.history().is_empty());
    assert!(h.upgrader.checked.lock().is_empty());
}

#[tokio::test]
async fn test_success_clears_previous_failure() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::UpgradeFailed),
        vec![10],
        FakeDatabases::new(&["a"]),
        ScriptedUpgrader::new(&[("a", Behavior::Succeeds)]),
        10,
    );

    h.coordinator.run(None, false).await.unwrap();

    assert_eq!(h.state.get().unwrap(), Some(LifecycleState::Running));
}

#[tokio::test]
async fn test_missing_state_restores_running() {
    let h = Harness::new(
        MemoryStateStore::new(),
        Vec::new(),
        FakeDatabases::new(&["a"]),
        ScriptedUpgrader::default(),
        10,
    );

    h.coordinator.run(None, false).await.unwrap();

    assert_eq!(h.state.get().unwrap(), Some(LifecycleState::Running));
}

#[tokio::test]
async fn test_retention_keeps_most_recent() {
    let h = Harness::new(
        MemoryStateStore::with_state(LifecycleState::Running),
        Vec::new(),
        FakeDatabases::new(&["a"]),
        ScriptedUpgrader::default(),
        3,
    );

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(h.coordinator.run(None, false).await.unwrap().run_id);
    }

    assert_eq!(h.runs().list().unwrap(), ids[1..].to_vec());
}

#[test]
fn test_process_error_converts() {
    let error: Error = ProcessError::UnknownUser("odoo".to_string()).into();

    assert!(matches!(error, Error::Process(_)));
}
