//! Durable per-daemon state on the local filesystem.
//!
//! ```text
//! <root>/daemons/<app>__<daemon>.json            record
//! <root>/daemons/<app>__<daemon>.autostart.json  {"enabled": bool}
//! <root>/logs/<app>__<daemon>.log                daemon output
//! ```
//!
//! Every write goes to a temp file in the same directory and is renamed into
//! place, so readers see either the old or the new document. There is no
//! locking beyond that.

use super::record::{DaemonKey, DaemonRecord};
use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

const DAEMONS_SUBDIR: &str = "daemons";
const LOGS_SUBDIR: &str = "logs";
const RECORD_EXT: &str = ".json";
const AUTOSTART_EXT: &str = ".autostart.json";
const LOG_EXT: &str = ".log";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AutostartFlag {
    enabled: bool,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn daemons_dir(&self) -> PathBuf {
        self.root.join(DAEMONS_SUBDIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_SUBDIR)
    }

    pub fn record_path(&self, key: &DaemonKey) -> PathBuf {
        self.daemons_dir()
            .join(format!("{}{}", key.file_stem(), RECORD_EXT))
    }

    pub fn autostart_path(&self, key: &DaemonKey) -> PathBuf {
        self.daemons_dir()
            .join(format!("{}{}", key.file_stem(), AUTOSTART_EXT))
    }

    pub fn log_path(&self, key: &DaemonKey) -> PathBuf {
        self.logs_dir().join(format!("{}{}", key.file_stem(), LOG_EXT))
    }

    /// Load a record, falling back to a fresh STOPPED record when the file is
    /// missing, unreadable, or does not parse.
    pub fn load(&self, key: &DaemonKey) -> DaemonRecord {
        let path = self.record_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(daemon = %key, "No record on disk, using defaults");
                return DaemonRecord::new(key);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read daemon record, using defaults");
                return DaemonRecord::new(key);
            }
        };

        match serde_json::from_str::<DaemonRecord>(&content) {
            Ok(record) if record.belongs_to(key) => record,
            Ok(record) => {
                warn!(
                    path = %path.display(),
                    found = %format!("{}:{}", record.app, record.daemon),
                    "Daemon record names a different daemon, using defaults"
                );
                DaemonRecord::new(key)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt daemon record, using defaults");
                DaemonRecord::new(key)
            }
        }
    }

    pub fn save(&self, key: &DaemonKey, record: &DaemonRecord) -> Result<()> {
        debug_assert!(record.belongs_to(key), "record saved under a foreign key");
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(key), &json)
    }

    /// Every daemon that has a record on disk.
    pub fn keys(&self) -> Vec<DaemonKey> {
        self.scan(|name| {
            if name.ends_with(AUTOSTART_EXT) {
                return None;
            }
            name.strip_suffix(RECORD_EXT)
        })
    }

    pub fn set_autostart(&self, key: &DaemonKey, enabled: bool) -> Result<()> {
        let json = serde_json::to_vec(&AutostartFlag { enabled })?;
        write_atomic(&self.autostart_path(key), &json)
    }

    /// Absent or unreadable flags read as disabled.
    pub fn get_autostart(&self, key: &DaemonKey) -> bool {
        let path = self.autostart_path(key);
        let Ok(content) = fs::read_to_string(&path) else {
            return false;
        };
        match serde_json::from_str::<AutostartFlag>(&content) {
            Ok(flag) => flag.enabled,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt autostart flag, treating as disabled");
                false
            }
        }
    }

    /// Every daemon whose autostart flag is enabled.
    pub fn autostart_keys(&self) -> Vec<DaemonKey> {
        self.scan(|name| name.strip_suffix(AUTOSTART_EXT))
            .into_iter()
            .filter(|key| self.get_autostart(key))
            .collect()
    }

    fn scan(&self, stem_of: impl Fn(&str) -> Option<&str>) -> Vec<DaemonKey> {
        let dir = self.daemons_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %e, "Failed to scan daemon state directory");
                }
                return Vec::new();
            }
        };

        let mut keys: Vec<DaemonKey> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                if name.starts_with('.') {
                    return None;
                }
                let key = stem_of(&name).and_then(DaemonKey::from_file_stem);
                if key.is_none() {
                    debug!(file = %name, "Skipping unrecognised file in state directory");
                }
                key
            })
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Write `contents` to `path` via a same-directory temp file and rename.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| SupervisorError::Config(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| SupervisorError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let result = File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, path));

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(SupervisorError::io(path, e));
    }
    trace!(path = %path.display(), "State file written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::record::DaemonStatus;
    use chrono::Utc;
    use tempfile::TempDir;

    fn key(app: &str, daemon: &str) -> DaemonKey {
        DaemonKey::new(app, daemon).unwrap()
    }

    #[test]
    fn test_load_missing_returns_stopped_default() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let record = store.load(&key("demo", "alpha"));
        assert_eq!(record.status, DaemonStatus::Stopped);
        assert!(record.pid.is_none());
        assert_eq!(record.app, "demo");
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let key = key("demo", "alpha");

        let mut record = DaemonRecord::new(&key);
        record.mark_running(4242, "sleep 1000".into(), Utc::now());
        store.save(&key, &record).unwrap();

        assert_eq!(store.load(&key), record);
        assert!(store.record_path(&key).ends_with("daemons/demo__alpha.json"));
    }

    #[test]
    fn test_corrupt_record_reads_as_default() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let key = key("demo", "alpha");

        fs::create_dir_all(store.daemons_dir()).unwrap();
        fs::write(store.record_path(&key), "{ not json").unwrap();

        let record = store.load(&key);
        assert_eq!(record, DaemonRecord::new(&key));
    }

    #[test]
    fn test_record_for_other_daemon_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let alpha = key("demo", "alpha");
        let beta = key("demo", "beta");

        let mut record = DaemonRecord::new(&beta);
        record.failure_count = 4;
        let json = serde_json::to_string(&record).unwrap();
        fs::create_dir_all(store.daemons_dir()).unwrap();
        fs::write(store.record_path(&alpha), json).unwrap();

        assert_eq!(store.load(&alpha).failure_count, 0);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let key = key("demo", "alpha");

        for _ in 0..3 {
            store.save(&key, &DaemonRecord::new(&key)).unwrap();
        }

        let names: Vec<String> = fs::read_dir(store.daemons_dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["demo__alpha.json".to_string()]);
    }

    #[test]
    fn test_keys_skip_autostart_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let alpha = key("demo", "alpha");
        let beta = key("other", "beta");

        store.save(&beta, &DaemonRecord::new(&beta)).unwrap();
        store.save(&alpha, &DaemonRecord::new(&alpha)).unwrap();
        store.set_autostart(&key("demo", "gamma"), true).unwrap();
        fs::write(store.daemons_dir().join("README.txt"), "hi").unwrap();
        fs::write(store.daemons_dir().join("nounderscore.json"), "{}").unwrap();

        assert_eq!(store.keys(), vec![alpha, beta]);
    }

    #[test]
    fn test_autostart_flags() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let alpha = key("demo", "alpha");
        let beta = key("demo", "beta");

        assert!(!store.get_autostart(&alpha));
        store.set_autostart(&alpha, true).unwrap();
        store.set_autostart(&beta, false).unwrap();
        assert!(store.get_autostart(&alpha));
        assert!(!store.get_autostart(&beta));
        assert_eq!(store.autostart_keys(), vec![alpha.clone()]);

        // Flags live apart from the record lifecycle.
        assert!(!store.record_path(&alpha).exists());

        fs::write(store.autostart_path(&beta), "garbage").unwrap();
        assert!(!store.get_autostart(&beta));
    }
}
