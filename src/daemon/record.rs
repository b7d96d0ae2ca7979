//! Daemon identity, persisted record, and the status view built from it.

use crate::error::{Result, SupervisorError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const MAX_IDENT_LEN: usize = 128;
/// Separator between app and daemon id in on-disk file names.
pub(crate) const STEM_SEPARATOR: &str = "__";

/// Natural key of a daemon: the owning app plus the daemon id it declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DaemonKey {
    app: String,
    daemon: String,
}

impl DaemonKey {
    pub fn new(app: impl Into<String>, daemon: impl Into<String>) -> Result<Self> {
        let app = app.into();
        let daemon = daemon.into();
        validate_ident(&app)?;
        validate_ident(&daemon)?;
        Ok(Self { app, daemon })
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn daemon(&self) -> &str {
        &self.daemon
    }

    pub(crate) fn file_stem(&self) -> String {
        format!("{}{}{}", self.app, STEM_SEPARATOR, self.daemon)
    }

    pub(crate) fn from_file_stem(stem: &str) -> Option<Self> {
        let (app, daemon) = stem.split_once(STEM_SEPARATOR)?;
        Self::new(app, daemon).ok()
    }
}

pub(crate) fn validate_ident(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SupervisorError::invalid(value, "must not be empty"));
    }
    if value.len() > MAX_IDENT_LEN {
        return Err(SupervisorError::invalid(value, "longer than 128 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SupervisorError::invalid(
            value,
            "only ASCII letters, digits, '-' and '_' are allowed",
        ));
    }
    let first = value.chars().next();
    let last = value.chars().last();
    if !first.is_some_and(|c| c.is_ascii_alphanumeric())
        || !last.is_some_and(|c| c.is_ascii_alphanumeric())
    {
        return Err(SupervisorError::invalid(
            value,
            "must start and end with a letter or digit",
        ));
    }
    if value.contains(STEM_SEPARATOR) {
        return Err(SupervisorError::invalid(value, "must not contain '__'"));
    }
    Ok(())
}

impl fmt::Display for DaemonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app, self.daemon)
    }
}

impl FromStr for DaemonKey {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self> {
        let (app, daemon) = s
            .split_once(':')
            .ok_or_else(|| SupervisorError::invalid(s, "expected <app>:<daemon>"))?;
        Self::new(app, daemon)
    }
}

impl Serialize for DaemonKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Daemon lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonStatus {
    /// Not running; either never started or stopped on request
    #[default]
    Stopped,
    /// Reserved for an asynchronous start; a synchronous start never persists it
    Starting,
    /// Process spawned and believed alive
    Running,
    /// Stop requested, escalation in progress
    Stopping,
    /// Process died without being asked to, or could not be spawned
    Crashed,
}

impl DaemonStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, DaemonStatus::Running)
    }

    /// Stopped and crashed daemons are both restartable end states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DaemonStatus::Stopped | DaemonStatus::Crashed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonStatus::Stopped => "stopped",
            DaemonStatus::Starting => "starting",
            DaemonStatus::Running => "running",
            DaemonStatus::Stopping => "stopping",
            DaemonStatus::Crashed => "crashed",
        }
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable state of one daemon. Never deleted: exit history accumulates
/// across restarts while pid and status are reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonRecord {
    pub app: String,
    pub daemon: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub status: DaemonStatus,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl DaemonRecord {
    /// Default record for a daemon that has never been written.
    pub fn new(key: &DaemonKey) -> Self {
        Self {
            app: key.app().to_string(),
            daemon: key.daemon().to_string(),
            pid: None,
            status: DaemonStatus::Stopped,
            command: None,
            started_at: None,
            last_heartbeat: None,
            exit_code: None,
            ended_at: None,
            failure_count: 0,
            last_failure_at: None,
        }
    }

    pub(crate) fn belongs_to(&self, key: &DaemonKey) -> bool {
        self.app == key.app() && self.daemon == key.daemon()
    }

    pub fn mark_running(&mut self, pid: u32, command: String, now: DateTime<Utc>) {
        self.pid = Some(pid);
        self.status = DaemonStatus::Running;
        self.command = Some(command);
        self.started_at = Some(now);
        self.last_heartbeat = Some(now);
        self.failure_count = 0;
        self.last_failure_at = None;
    }

    pub fn mark_stopping(&mut self, now: DateTime<Utc>) {
        self.status = DaemonStatus::Stopping;
        self.last_heartbeat = Some(now);
    }

    /// Deliberate stop: counts as success, so failure history is cleared.
    pub fn mark_stopped(&mut self, exit_code: Option<i32>, now: DateTime<Utc>) {
        self.pid = None;
        self.status = DaemonStatus::Stopped;
        self.exit_code = exit_code;
        self.ended_at = Some(now);
        self.last_heartbeat = Some(now);
        self.failure_count = 0;
        self.last_failure_at = None;
    }

    pub fn mark_crashed(&mut self, exit_code: Option<i32>, now: DateTime<Utc>) {
        self.pid = None;
        self.status = DaemonStatus::Crashed;
        self.exit_code = exit_code;
        self.ended_at = Some(now);
        self.last_heartbeat = Some(now);
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);
    }

    /// Settle a record with no live process to STOPPED. Failure history is
    /// kept so backoff still applies.
    pub(crate) fn settle_without_pid(&mut self, now: DateTime<Utc>) -> bool {
        if self.pid.is_none() && self.status == DaemonStatus::Stopped {
            return false;
        }
        self.pid = None;
        self.status = DaemonStatus::Stopped;
        if self.ended_at.is_none() {
            self.ended_at = Some(now);
        }
        self.last_heartbeat = Some(now);
        true
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = Some(now);
    }
}

/// Live sample of a running process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStats {
    /// Process start time as reported by the OS
    pub start_time: DateTime<Utc>,
    /// Resident set size
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// Status view of a daemon, merged from its record and the process table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaemonInfo {
    pub key: DaemonKey,
    pub status: DaemonStatus,
    pub pid: Option<u32>,
    pub command: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Seconds since the OS-reported process start, if running
    pub uptime_secs: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub cpu_percent: Option<f32>,
}

impl DaemonInfo {
    pub fn from_record(key: &DaemonKey, record: &DaemonRecord) -> Self {
        Self {
            key: key.clone(),
            status: record.status,
            pid: record.pid,
            command: record.command.clone(),
            started_at: record.started_at,
            last_heartbeat: record.last_heartbeat,
            exit_code: record.exit_code,
            ended_at: record.ended_at,
            failure_count: record.failure_count,
            last_failure_at: record.last_failure_at,
            uptime_secs: None,
            memory_bytes: None,
            cpu_percent: None,
        }
    }

    pub fn with_stats(mut self, stats: &ProcessStats, now: DateTime<Utc>) -> Self {
        let uptime = (now - stats.start_time).num_seconds().max(0);
        self.uptime_secs = Some(uptime as u64);
        self.memory_bytes = Some(stats.memory_bytes);
        self.cpu_percent = Some(stats.cpu_percent);
        self
    }
}
