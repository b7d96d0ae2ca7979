use std::path::PathBuf;

pub const APPD_HOME: &str = "APPD_HOME";
pub const APPD_CONFIG_DIR: &str = "APPD_CONFIG_DIR";
pub const APPD_APPS_DIR: &str = "APPD_APPS_DIR";
pub const APPD_LOG: &str = "APPD_LOG";
const RUST_LOG: &str = "RUST_LOG";

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const FALLBACK_DATA_DIR: &str = "~/.local/share";
const APPD_SUBDIR: &str = "appd";
const DEFAULT_APPS_DIR: &str = "apps";
const DEFAULT_LOG_FILTER: &str = "warn";

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Config directory ($APPD_CONFIG_DIR or ~/.config/appd)
pub fn config_dir() -> PathBuf {
    let dir = env_opt(APPD_CONFIG_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
                .join(APPD_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// State root override ($APPD_HOME)
pub fn home_override() -> Option<PathBuf> {
    let val = env_opt(APPD_HOME).map(PathBuf::from);
    tracing::trace!(value = ?val, "APPD_HOME env var");
    val
}

/// State root ($APPD_HOME or ~/.local/share/appd)
pub fn data_dir() -> PathBuf {
    let dir = home_override().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
            .join(APPD_SUBDIR)
    });
    tracing::trace!(dir = %dir.display(), "Resolved data directory");
    dir
}

/// Apps directory override ($APPD_APPS_DIR)
pub fn apps_dir_override() -> Option<PathBuf> {
    let val = env_opt(APPD_APPS_DIR).map(PathBuf::from);
    tracing::trace!(value = ?val, "APPD_APPS_DIR env var");
    val
}

/// Directory scanned for app manifests ($APPD_APPS_DIR or ./apps)
pub fn apps_dir() -> PathBuf {
    apps_dir_override().unwrap_or_else(|| PathBuf::from(DEFAULT_APPS_DIR))
}

/// Tracing filter directive ($APPD_LOG, then $RUST_LOG, then "warn")
pub fn log_filter() -> String {
    env_opt(APPD_LOG)
        .or_else(|| env_opt(RUST_LOG))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}
