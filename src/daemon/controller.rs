//! Lifecycle of a single daemon: start, stop, liveness and status.
//!
//! A controller holds no process handle. Every call re-reads the record from
//! the [`StateStore`] and asks [`ProcessOps`] whether the stored pid is still
//! alive, so controllers created by separate invocations agree with each other.

use super::clock::Clock;
use super::escalation::{self, StopPolicy};
use super::log_tail::{self, DEFAULT_TAIL_WINDOW};
use super::process::{Liveness, ProcessOps, SpawnSpec};
use super::record::{DaemonInfo, DaemonKey, DaemonRecord};
use super::state::StateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Slack between the recorded start and the OS start time, which sysinfo
/// reports with whole-second precision.
const PID_REUSE_TOLERANCE_SECS: i64 = 10;

/// Timing knobs that are not part of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    /// Wait after SIGKILL before reporting the process as a survivor
    pub kill_grace: Duration,
    pub cpu_window: Duration,
    pub log_window: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        let policy = StopPolicy::default();
        Self {
            poll_interval: policy.poll_interval,
            kill_grace: policy.kill_grace,
            cpu_window: Duration::from_millis(200),
            log_window: DEFAULT_TAIL_WINDOW,
        }
    }
}

pub struct DaemonController {
    key: DaemonKey,
    store: StateStore,
    ops: Arc<dyn ProcessOps>,
    clock: Arc<dyn Clock>,
    settings: ControllerSettings,
}

impl DaemonController {
    pub fn new(
        key: DaemonKey,
        store: StateStore,
        ops: Arc<dyn ProcessOps>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_settings(key, store, ops, clock, ControllerSettings::default())
    }

    pub fn with_settings(
        key: DaemonKey,
        store: StateStore,
        ops: Arc<dyn ProcessOps>,
        clock: Arc<dyn Clock>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            key,
            store,
            ops,
            clock,
            settings,
        }
    }

    pub fn key(&self) -> &DaemonKey {
        &self.key
    }

    pub fn log_path(&self) -> PathBuf {
        self.store.log_path(&self.key)
    }

    /// Persisted record as it is on disk, without checking the OS.
    pub fn record(&self) -> DaemonRecord {
        self.store.load(&self.key)
    }

    /// Live pid of the daemon. A stored pid the OS no longer knows is
    /// reconciled to CRASHED here.
    pub fn get_pid(&self) -> Option<u32> {
        let mut record = self.store.load(&self.key);
        self.reconcile(&mut record)
    }

    pub fn is_running(&self) -> bool {
        self.get_pid().is_some()
    }

    fn reconcile(&self, record: &mut DaemonRecord) -> Option<u32> {
        let pid = record.pid?;
        let liveness = match self.ops.probe(pid) {
            Liveness::Alive if !self.owns_pid(pid, record) => {
                warn!(daemon = %self.key, pid, "Pid now belongs to an unrelated process");
                Liveness::Exited(None)
            }
            liveness => liveness,
        };
        match liveness {
            Liveness::Alive => Some(pid),
            Liveness::Exited(exit_code) => {
                warn!(daemon = %self.key, pid, exit_code = ?exit_code, "Daemon process is gone, marking crashed");
                record.mark_crashed(exit_code, self.clock.now());
                self.persist(record);
                None
            }
        }
    }

    /// False when the process holding `pid` started after the daemon did,
    /// which means the OS recycled the pid.
    fn owns_pid(&self, pid: u32, record: &DaemonRecord) -> bool {
        let (Some(recorded), Some(actual)) = (record.started_at, self.ops.start_time(pid)) else {
            return true;
        };
        actual <= recorded + chrono::Duration::seconds(PID_REUSE_TOLERANCE_SECS)
    }

    /// Spawn `argv` detached. Returns false when the daemon is already running
    /// or the spawn fails; a failed spawn is recorded as a crash.
    pub fn start(&self, argv: &[String], cwd: Option<&Path>) -> bool {
        let mut record = self.store.load(&self.key);
        if let Some(pid) = self.reconcile(&mut record) {
            info!(daemon = %self.key, pid, "Daemon already running");
            return false;
        }

        let spec = SpawnSpec {
            argv: argv.to_vec(),
            cwd: cwd.map(Path::to_path_buf),
            log_path: self.log_path(),
        };

        match self.ops.spawn(&spec) {
            Ok(pid) => {
                info!("Started daemon '{}' with PID {}", self.key, pid);
                record.mark_running(pid, argv.join(" "), self.clock.now());
                self.persist(&record);
                true
            }
            Err(e) => {
                error!("Failed to start daemon '{}': {}", self.key, e);
                record.mark_crashed(None, self.clock.now());
                self.persist(&record);
                false
            }
        }
    }

    /// Stop the daemon, escalating to SIGKILL after `timeout`. Stopping a
    /// daemon that is not running succeeds and settles any stale state.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let mut record = self.store.load(&self.key);
        let Some(pid) = self.reconcile(&mut record) else {
            if record.settle_without_pid(self.clock.now()) {
                debug!(daemon = %self.key, "Settled stale state of stopped daemon");
                self.persist(&record);
            }
            return true;
        };

        info!(daemon = %self.key, pid, "Stopping daemon");
        record.mark_stopping(self.clock.now());
        self.persist(&record);

        let policy = StopPolicy {
            timeout,
            kill_grace: self.settings.kill_grace,
            poll_interval: self.settings.poll_interval,
        };
        let outcome = escalation::terminate(self.ops.as_ref(), pid, &policy).await;

        if !outcome.gone {
            error!(daemon = %self.key, pid, "Daemon survived SIGKILL, leaving it in stopping state");
            return false;
        }

        // Re-read so a heartbeat written by someone else while we waited is kept.
        let mut record = self.store.load(&self.key);
        record.mark_stopped(outcome.exit_code, self.clock.now());
        self.persist(&record);
        info!(
            daemon = %self.key,
            graceful = outcome.graceful,
            exit_code = ?outcome.exit_code,
            "Daemon stopped"
        );
        true
    }

    /// Status merged from the record and a fresh process sample.
    pub async fn get_status(&self) -> DaemonInfo {
        let mut record = self.store.load(&self.key);
        let Some(pid) = self.reconcile(&mut record) else {
            return DaemonInfo::from_record(&self.key, &record);
        };

        match self.ops.sample(pid, self.settings.cpu_window).await {
            Some(stats) => {
                let now = self.clock.now();
                record.touch(now);
                self.persist(&record);
                DaemonInfo::from_record(&self.key, &record).with_stats(&stats, now)
            }
            None => {
                // Died while being sampled.
                self.reconcile(&mut record);
                DaemonInfo::from_record(&self.key, &record)
            }
        }
    }

    /// Last `n` lines of the daemon's log file.
    pub fn get_logs(&self, n: usize) -> Vec<String> {
        let path = self.log_path();
        match log_tail::tail_lines(&path, n, self.settings.log_window) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read daemon log");
                Vec::new()
            }
        }
    }

    fn persist(&self, record: &DaemonRecord) {
        if let Err(e) = self.store.save(&self.key, record) {
            error!(daemon = %self.key, error = %e, "Failed to persist daemon record");
        }
    }
}

impl std::fmt::Debug for DaemonController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonController")
            .field("key", &self.key)
            .field("root", &self.store.root())
            .finish()
    }
}
