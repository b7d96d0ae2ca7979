use super::backoff::BackoffSchedule;
use super::clock::{Clock, SystemClock};
use super::controller::{ControllerSettings, DaemonController};
use super::manifest::{DaemonManifest, ManifestProvider};
use super::process::{OsProcessOps, ProcessOps};
use super::record::{DaemonInfo, DaemonKey};
use super::state::StateStore;
use crate::error::Result;
use crate::user_config::SupervisorConfig;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result of a manual start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
    /// No usable command is declared for the daemon
    MissingCommand,
    /// Spawn failed; the daemon is now CRASHED
    Failed,
}

impl StartOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StartOutcome::Started { .. } | StartOutcome::AlreadyRunning { .. }
        )
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started { pid } => write!(f, "started (PID {})", pid),
            StartOutcome::AlreadyRunning { pid } => write!(f, "already running (PID {})", pid),
            StartOutcome::MissingCommand => f.write_str("no command declared"),
            StartOutcome::Failed => f.write_str("failed to start"),
        }
    }
}

/// What [`Supervisor::boot`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Stale records reconciled to CRASHED
    pub cleaned: usize,
    /// Outcome per autostart-enabled daemon
    pub started: BTreeMap<DaemonKey, bool>,
}

/// Resolved argv and working directory for a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Launch {
    argv: Vec<String>,
    cwd: Option<PathBuf>,
}

/// Fleet-level operations over every daemon known from state or manifests.
///
/// Holds no running processes; each call reads state from disk and the OS.
pub struct Supervisor {
    config: SupervisorConfig,
    store: StateStore,
    manifests: Arc<dyn ManifestProvider>,
    ops: Arc<dyn ProcessOps>,
    clock: Arc<dyn Clock>,
    backoff: BackoffSchedule,
    settings: ControllerSettings,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, manifests: impl ManifestProvider + 'static) -> Result<Self> {
        let backoff = config.backoff()?;
        let store = StateStore::new(config.state_root());
        let settings = ControllerSettings {
            log_window: config.log_tail_window,
            ..ControllerSettings::default()
        };
        debug!(root = %store.root().display(), "Supervisor created");
        Ok(Self {
            config,
            store,
            manifests: Arc::new(manifests),
            ops: Arc::new(OsProcessOps::new()),
            clock: Arc::new(SystemClock),
            backoff,
            settings,
        })
    }

    pub fn with_process_ops(mut self, ops: Arc<dyn ProcessOps>) -> Self {
        self.ops = ops;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_controller_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn controller(&self, key: &DaemonKey) -> DaemonController {
        DaemonController::with_settings(
            key.clone(),
            self.store.clone(),
            self.ops.clone(),
            self.clock.clone(),
            self.settings,
        )
    }

    /// Current declarations. A failing provider yields an empty manifest.
    pub fn discover(&self) -> DaemonManifest {
        match self.manifests.discover() {
            Ok(manifest) => {
                debug!(count = manifest.len(), "Discovered daemon declarations");
                manifest
            }
            Err(e) => {
                error!("Failed to discover daemon manifests: {}", e);
                DaemonManifest::new()
            }
        }
    }

    /// Every daemon with persisted state or a declaration, sorted by key.
    pub async fn list_daemons(&self) -> Vec<DaemonInfo> {
        let manifest = self.discover();
        let keys: BTreeSet<DaemonKey> = self
            .store
            .keys()
            .into_iter()
            .chain(manifest.keys())
            .collect();

        let mut tasks = JoinSet::new();
        for key in keys {
            let controller = self.controller(&key);
            tasks.spawn(async move { controller.get_status().await });
        }

        let mut daemons = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(info) => daemons.push(info),
                Err(e) => error!("Status task failed: {}", e),
            }
        }

        for info in &mut daemons {
            if let Some(command) = manifest.command(&info.key) {
                info.command = Some(command.to_string());
            }
        }
        daemons.sort_by(|a, b| a.key.cmp(&b.key));
        daemons
    }

    /// Stop every running daemon. One failure does not abort the sweep.
    pub async fn stop_all(&self, timeout: Option<Duration>) -> BTreeMap<DaemonKey, bool> {
        let timeout = timeout.unwrap_or_else(|| self.config.stop_timeout());
        let mut results = BTreeMap::new();
        for key in self.store.keys() {
            let controller = self.controller(&key);
            if !controller.is_running() {
                continue;
            }
            let stopped = controller.stop(timeout).await;
            if !stopped {
                warn!(daemon = %key, "Failed to stop daemon");
            }
            results.insert(key, stopped);
        }
        results
    }

    /// Reconcile records whose pid is gone. Returns how many were changed.
    pub fn cleanup_stale_entries(&self) -> usize {
        let mut cleaned = 0;
        for key in self.store.keys() {
            if self.store.load(&key).pid.is_none() {
                continue;
            }
            if !self.controller(&key).is_running() {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            info!(count = cleaned, "Reconciled stale daemon records");
        }
        cleaned
    }

    pub fn set_autostart(&self, key: &DaemonKey, enabled: bool) -> Result<()> {
        self.store.set_autostart(key, enabled)?;
        info!(daemon = %key, enabled, "Autostart updated");
        Ok(())
    }

    pub fn get_autostart(&self, key: &DaemonKey) -> bool {
        self.store.get_autostart(key)
    }

    /// When the restart gate next opens for `key`, if it is closed at all.
    pub fn next_restart_at(&self, key: &DaemonKey) -> Option<DateTime<Utc>> {
        let record = self.store.load(key);
        self.backoff
            .next_eligible_at(record.failure_count, record.last_failure_at)
    }

    /// Start every autostart-enabled daemon that is not running and whose
    /// backoff window has passed.
    pub fn start_enabled_daemons(&self) -> BTreeMap<DaemonKey, bool> {
        let manifest = self.discover();
        let mut results = BTreeMap::new();

        for key in self.store.autostart_keys() {
            let controller = self.controller(&key);
            if controller.is_running() {
                results.insert(key, true);
                continue;
            }

            let Some(launch) = self.resolve_launch(&manifest, &key) else {
                warn!(daemon = %key, "Autostart enabled but no command is declared");
                results.insert(key, false);
                continue;
            };

            let record = controller.record();
            if !self.backoff.is_eligible(&record, self.clock.now()) {
                let retry_at = self
                    .backoff
                    .next_eligible_at(record.failure_count, record.last_failure_at);
                warn!(
                    daemon = %key,
                    failure_count = record.failure_count,
                    retry_at = ?retry_at,
                    "Skipping restart during backoff"
                );
                results.insert(key, false);
                continue;
            }

            let started = controller.start(&launch.argv, launch.cwd.as_deref());
            results.insert(key, started);
        }
        results
    }

    /// Manual start. Not subject to backoff.
    pub fn start_daemon(&self, key: &DaemonKey) -> StartOutcome {
        let controller = self.controller(key);
        if let Some(pid) = controller.get_pid() {
            return StartOutcome::AlreadyRunning { pid };
        }

        let manifest = self.discover();
        let Some(launch) = self.resolve_launch(&manifest, key) else {
            return StartOutcome::MissingCommand;
        };

        if !controller.start(&launch.argv, launch.cwd.as_deref()) {
            return StartOutcome::Failed;
        }
        match controller.record().pid {
            Some(pid) => StartOutcome::Started { pid },
            None => StartOutcome::Failed,
        }
    }

    pub async fn stop_daemon(&self, key: &DaemonKey, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or_else(|| self.config.stop_timeout());
        self.controller(key).stop(timeout).await
    }

    pub async fn daemon_status(&self, key: &DaemonKey) -> DaemonInfo {
        self.controller(key).get_status().await
    }

    pub fn daemon_logs(&self, key: &DaemonKey, lines: usize) -> Vec<String> {
        self.controller(key).get_logs(lines)
    }

    /// Startup hook: reconcile stale records, then start enabled daemons.
    pub fn boot(&self) -> BootReport {
        let cleaned = self.cleanup_stale_entries();
        let started = self.start_enabled_daemons();
        BootReport { cleaned, started }
    }

    fn resolve_launch(&self, manifest: &DaemonManifest, key: &DaemonKey) -> Option<Launch> {
        let template = manifest.command(key)?;
        let Some(words) = shlex::split(template) else {
            warn!(daemon = %key, command = template, "Unparsable command template");
            return None;
        };
        if words.is_empty() {
            return None;
        }

        let app_dir = self.config.apps_dir().join(key.app());
        let app_dir_str = app_dir.to_string_lossy();
        let mut argv: Vec<String> = self
            .config
            .launcher
            .iter()
            .map(|part| {
                part.replace("{app_dir}", &app_dir_str)
                    .replace("{app}", key.app())
            })
            .collect();
        argv.extend(words);

        let cwd = app_dir.is_dir().then(|| app_dir.clone());
        Some(Launch { argv, cwd })
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("root", &self.store.root())
            .field("backoff", &self.backoff)
            .finish()
    }
}
