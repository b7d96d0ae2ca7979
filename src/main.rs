mod args;
mod cmd_daemon;

use anyhow::Context;
use appd::daemon::{DirManifestProvider, Supervisor};
use appd::{clienv, SupervisorConfig};
use args::Cli;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(clienv::log_filter()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = SupervisorConfig::load().context("Failed to load configuration")?;
    if let Some(home) = cli.home {
        config.state_root = Some(home);
    }
    if let Some(apps_dir) = cli.apps_dir {
        config.apps_dir = Some(apps_dir);
    }
    tracing::trace!(config = ?config, "Effective configuration");

    let manifests = DirManifestProvider::new(config.apps_dir());
    let supervisor =
        Supervisor::new(config, manifests).context("Invalid supervisor configuration")?;

    cmd_daemon::cmd_daemon(&supervisor, cli.command).await
}
