use crate::clienv;
use crate::daemon::backoff::{BackoffSchedule, DEFAULT_BACKOFF_SECS};
use crate::daemon::log_tail::DEFAULT_TAIL_WINDOW;
use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Supervisor settings from `config.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Where records and logs live
    pub state_root: Option<PathBuf>,
    /// Directory scanned for `<app>/app.toml`
    pub apps_dir: Option<PathBuf>,
    /// Seconds to wait after SIGTERM before escalating
    pub stop_timeout: u64,
    /// Restart delays in seconds, indexed by failure count
    pub backoff_schedule: Vec<u64>,
    /// Bytes read from the end of a log when tailing
    pub log_tail_window: u64,
    /// Prepended to every daemon command; `{app}` and `{app_dir}` are substituted
    pub launcher: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            state_root: None,
            apps_dir: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT_SECS,
            backoff_schedule: DEFAULT_BACKOFF_SECS.to_vec(),
            log_tail_window: DEFAULT_TAIL_WINDOW,
            launcher: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    /// Defaults rooted at `root`, with apps under `root/apps`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            apps_dir: Some(root.join("apps")),
            state_root: Some(root),
            ..Self::default()
        }
    }

    /// $APPD_CONFIG_DIR/config.toml or ~/.config/appd/config.toml
    pub fn config_path() -> PathBuf {
        clienv::config_dir().join(CONFIG_FILE)
    }

    /// Load the user config and apply environment overrides for paths.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Some(home) = clienv::home_override() {
            config.state_root = Some(home);
        }
        if let Some(apps) = clienv::apps_dir_override() {
            config.apps_dir = Some(apps);
        }
        Ok(config)
    }

    /// Parse `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading supervisor config");

        if !path.exists() {
            tracing::trace!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| SupervisorError::io(path, e))?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            SupervisorError::Config(format!("failed to parse {}: {}", path.display(), e.message()))
        })?;
        config.backoff()?;

        tracing::trace!(
            state_root = ?config.state_root,
            apps_dir = ?config.apps_dir,
            stop_timeout = config.stop_timeout,
            "Supervisor config loaded"
        );
        Ok(config)
    }

    pub fn state_root(&self) -> PathBuf {
        self.state_root.clone().unwrap_or_else(clienv::data_dir)
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.apps_dir.clone().unwrap_or_else(clienv::apps_dir)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout)
    }

    pub fn backoff(&self) -> Result<BackoffSchedule> {
        BackoffSchedule::from_secs(&self.backoff_schedule)
    }
}
