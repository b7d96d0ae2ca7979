//! Daemon declarations supplied by apps.
//!
//! The supervisor never owns this data; it asks a [`ManifestProvider`] for a
//! fresh [`DaemonManifest`] on every discovery pass.

use super::record::{validate_ident, DaemonKey};
use crate::error::{Result, SupervisorError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const APP_MANIFEST_FILE: &str = "app.toml";

/// app → daemon id → command template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonManifest {
    apps: BTreeMap<String, BTreeMap<String, String>>,
}

impl DaemonManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: DaemonKey, command: impl Into<String>) {
        self.apps
            .entry(key.app().to_string())
            .or_default()
            .insert(key.daemon().to_string(), command.into());
    }

    /// Builder form of [`insert`](Self::insert) for string identifiers.
    pub fn declare(mut self, app: &str, daemon: &str, command: &str) -> Result<Self> {
        self.insert(DaemonKey::new(app, daemon)?, command);
        Ok(self)
    }

    pub fn command(&self, key: &DaemonKey) -> Option<&str> {
        self.apps
            .get(key.app())
            .and_then(|daemons| daemons.get(key.daemon()))
            .map(String::as_str)
    }

    /// Declared daemons in key order.
    pub fn keys(&self) -> Vec<DaemonKey> {
        self.apps
            .iter()
            .flat_map(|(app, daemons)| {
                daemons
                    .keys()
                    .filter_map(move |daemon| DaemonKey::new(app.as_str(), daemon.as_str()).ok())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.apps.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(DaemonKey, String)> for DaemonManifest {
    fn from_iter<I: IntoIterator<Item = (DaemonKey, String)>>(iter: I) -> Self {
        let mut manifest = Self::new();
        for (key, command) in iter {
            manifest.insert(key, command);
        }
        manifest
    }
}

/// Source of daemon declarations.
pub trait ManifestProvider: Send + Sync {
    fn discover(&self) -> Result<DaemonManifest>;
}

impl<F> ManifestProvider for F
where
    F: Fn() -> DaemonManifest + Send + Sync,
{
    fn discover(&self) -> Result<DaemonManifest> {
        Ok(self())
    }
}

/// A fixed set of declarations.
#[derive(Debug, Clone, Default)]
pub struct StaticManifest(pub DaemonManifest);

impl ManifestProvider for StaticManifest {
    fn discover(&self) -> Result<DaemonManifest> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct AppManifestFile {
    #[serde(default)]
    daemons: BTreeMap<String, String>,
}

/// Reads `<apps_dir>/<app>/app.toml` files.
///
/// ```toml
/// [daemons]
/// summarizer = "python daemon.py --interval 3600"
/// ```
#[derive(Debug, Clone)]
pub struct DirManifestProvider {
    apps_dir: PathBuf,
}

impl DirManifestProvider {
    pub fn new(apps_dir: impl Into<PathBuf>) -> Self {
        Self {
            apps_dir: apps_dir.into(),
        }
    }

    pub fn apps_dir(&self) -> &Path {
        &self.apps_dir
    }

    fn load_app(&self, app: &str, path: &Path, manifest: &mut DaemonManifest) -> Result<()> {
        let content = fs::read_to_string(path).map_err(|e| SupervisorError::io(path, e))?;
        let parsed: AppManifestFile =
            toml::from_str(&content).map_err(|e| SupervisorError::Manifest {
                path: path.to_path_buf(),
                reason: e.message().to_string(),
            })?;

        for (daemon, command) in parsed.daemons {
            match DaemonKey::new(app, daemon.as_str()) {
                Ok(key) => {
                    debug!(daemon = %key, "Discovered daemon");
                    manifest.insert(key, command);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping daemon declaration"),
            }
        }
        Ok(())
    }
}

impl ManifestProvider for DirManifestProvider {
    fn discover(&self) -> Result<DaemonManifest> {
        let mut manifest = DaemonManifest::new();
        let entries = match fs::read_dir(&self.apps_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.apps_dir.display(), "Apps directory does not exist");
                return Ok(manifest);
            }
            Err(e) => return Err(SupervisorError::io(&self.apps_dir, e)),
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let path = dir.join(APP_MANIFEST_FILE);
            if !path.is_file() {
                continue;
            }
            let Some(app) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %dir.display(), "Skipping app with non UTF-8 name");
                continue;
            };
            if let Err(e) = validate_ident(&app) {
                warn!(path = %dir.display(), error = %e, "Skipping app with invalid name");
                continue;
            }

            if let Err(e) = self.load_app(&app, &path, &mut manifest) {
                warn!("Failed to load manifest {:?}: {}", path, e);
            }
        }

        Ok(manifest)
    }
}
