use appd::DaemonKey;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "appd")]
#[command(version)]
#[command(about = "Supervise background daemons declared by apps", long_about = None)]
pub(crate) struct Cli {
    /// State root for records and logs. Can also be set via APPD_HOME env var.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Directory containing <app>/app.toml manifests. Can also be set via APPD_APPS_DIR env var.
    #[arg(long, global = true)]
    pub apps_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List declared and previously run daemons
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Start a daemon (e.g., journal:summarizer)
    Start {
        daemon: DaemonKey,
    },

    /// Stop a daemon, escalating to SIGKILL after the timeout
    Stop {
        daemon: DaemonKey,

        /// Seconds to wait after SIGTERM (default from config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show detailed status of a daemon
    Status {
        daemon: DaemonKey,

        /// Print JSON instead of key/value lines
        #[arg(long)]
        json: bool,
    },

    /// Show recent output of a daemon
    Logs {
        daemon: DaemonKey,

        /// Number of recent lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },

    /// Show or change whether a daemon is started at boot
    Autostart {
        daemon: DaemonKey,

        /// New setting (shows the current one if omitted)
        state: Option<Toggle>,
    },

    /// Stop every running daemon
    StopAll {
        /// Seconds to wait after SIGTERM for each daemon (default from config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Reconcile records of daemons that died unnoticed
    Cleanup,

    /// Reconcile stale records, then start autostart-enabled daemons
    Boot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}
