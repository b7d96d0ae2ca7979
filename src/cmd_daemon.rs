use crate::args::{Commands, Toggle};
use anyhow::{Context, Result};
use appd::daemon::{DaemonInfo, HealthStatus, StartOutcome, Supervisor};
use appd::{DaemonKey, DaemonStatus};
use std::collections::BTreeMap;
use std::time::Duration;

pub async fn cmd_daemon(supervisor: &Supervisor, command: Commands) -> Result<()> {
    match command {
        Commands::List { json } => cmd_list(supervisor, json).await,
        Commands::Start { daemon } => cmd_start(supervisor, &daemon),
        Commands::Stop { daemon, timeout } => cmd_stop(supervisor, &daemon, timeout).await,
        Commands::Status { daemon, json } => cmd_status(supervisor, &daemon, json).await,
        Commands::Logs { daemon, lines } => cmd_logs(supervisor, &daemon, lines),
        Commands::Autostart { daemon, state } => cmd_autostart(supervisor, &daemon, state),
        Commands::StopAll { timeout } => cmd_stop_all(supervisor, timeout).await,
        Commands::Cleanup => cmd_cleanup(supervisor),
        Commands::Boot => cmd_boot(supervisor),
    }
}

async fn cmd_list(supervisor: &Supervisor, json: bool) -> Result<()> {
    let daemons = supervisor.list_daemons().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&daemons)?);
        return Ok(());
    }

    if daemons.is_empty() {
        println!("No daemons declared");
        println!(
            "  Daemons are declared in <apps-dir>/<app>/app.toml under [daemons] ({})",
            supervisor.config().apps_dir().display()
        );
        return Ok(());
    }

    let rows: Vec<[String; 7]> = daemons.iter().map(list_row).collect();
    print_table(
        ["Daemon", "State", "PID", "Uptime", "Memory", "Failures", "Command"],
        &rows,
    );
    println!();
    println!("{}", HealthStatus::from_daemons(&daemons));
    Ok(())
}

fn list_row(info: &DaemonInfo) -> [String; 7] {
    [
        info.key.to_string(),
        info.status.to_string(),
        dash(info.pid),
        info.uptime_secs
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string()),
        info.memory_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "-".to_string()),
        info.failure_count.to_string(),
        info.command.clone().unwrap_or_else(|| "-".to_string()),
    ]
}

fn cmd_start(supervisor: &Supervisor, key: &DaemonKey) -> Result<()> {
    let outcome = supervisor.start_daemon(key);
    match outcome {
        StartOutcome::Started { .. } | StartOutcome::AlreadyRunning { .. } => {
            println!("Daemon {} {}", key, outcome);
            Ok(())
        }
        StartOutcome::MissingCommand => {
            anyhow::bail!("Daemon {} has no command declared in its app manifest", key)
        }
        StartOutcome::Failed => anyhow::bail!(
            "Daemon {} failed to start (see `appd logs {}`)",
            key,
            key
        ),
    }
}

async fn cmd_stop(supervisor: &Supervisor, key: &DaemonKey, timeout: Option<u64>) -> Result<()> {
    println!("Stopping daemon {}...", key);
    if !supervisor
        .stop_daemon(key, timeout.map(Duration::from_secs))
        .await
    {
        anyhow::bail!("Daemon {} did not exit after SIGKILL", key);
    }
    println!("Daemon {} stopped", key);
    Ok(())
}

async fn cmd_status(supervisor: &Supervisor, key: &DaemonKey, json: bool) -> Result<()> {
    let info = supervisor.daemon_status(key).await;
    let autostart = supervisor.get_autostart(key);
    let next_restart = if info.status.is_running() {
        None
    } else {
        supervisor.next_restart_at(key)
    };

    if json {
        let mut value = serde_json::to_value(&info)?;
        value["autostart"] = serde_json::Value::Bool(autostart);
        value["next_restart_at"] = serde_json::to_value(next_restart)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let mut entries: Vec<(&str, String)> = vec![
        ("Daemon", info.key.to_string()),
        ("Status", info.status.to_string()),
        ("PID", dash(info.pid)),
        ("Command", info.command.clone().unwrap_or_else(|| "-".into())),
        ("Autostart", if autostart { "on" } else { "off" }.to_string()),
    ];
    if let Some(uptime) = info.uptime_secs {
        entries.push(("Uptime", format_duration(uptime)));
    }
    if let Some(memory) = info.memory_bytes {
        entries.push(("Memory", format_bytes(memory)));
    }
    if let Some(cpu) = info.cpu_percent {
        entries.push(("CPU", format!("{:.1}%", cpu)));
    }
    entries.push(("Started", dash(info.started_at)));
    entries.push(("Heartbeat", dash(info.last_heartbeat)));
    if info.status == DaemonStatus::Stopped || info.status == DaemonStatus::Crashed {
        entries.push(("Exit code", dash(info.exit_code)));
        entries.push(("Ended", dash(info.ended_at)));
    }
    entries.push(("Failures", info.failure_count.to_string()));
    if let Some(at) = next_restart {
        entries.push(("Next restart", at.to_rfc3339()));
    }
    entries.push(("Log file", supervisor.controller(key).log_path().display().to_string()));

    let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (name, value) in entries {
        println!("  {:<width$}  {}", name, value, width = width);
    }
    Ok(())
}

fn cmd_logs(supervisor: &Supervisor, key: &DaemonKey, lines: usize) -> Result<()> {
    let logs = supervisor.daemon_logs(key, lines);
    if logs.is_empty() {
        println!("No logs available for {}", key);
        return Ok(());
    }
    for line in logs {
        println!("{}", line);
    }
    Ok(())
}

fn cmd_autostart(supervisor: &Supervisor, key: &DaemonKey, state: Option<Toggle>) -> Result<()> {
    if let Some(state) = state {
        supervisor
            .set_autostart(key, state.enabled())
            .with_context(|| format!("Failed to update autostart for {}", key))?;
    }
    let enabled = supervisor.get_autostart(key);
    println!(
        "Autostart for {} is {}",
        key,
        if enabled { "on" } else { "off" }
    );
    Ok(())
}

async fn cmd_stop_all(supervisor: &Supervisor, timeout: Option<u64>) -> Result<()> {
    let results = supervisor
        .stop_all(timeout.map(Duration::from_secs))
        .await;
    if results.is_empty() {
        println!("No daemons running");
        return Ok(());
    }
    print_results("stopped", &results);
    ensure_all(&results, "stop")
}

fn cmd_cleanup(supervisor: &Supervisor) -> Result<()> {
    let cleaned = supervisor.cleanup_stale_entries();
    println!("Reconciled {} stale daemon record(s)", cleaned);
    Ok(())
}

fn cmd_boot(supervisor: &Supervisor) -> Result<()> {
    let report = supervisor.boot();
    println!("Reconciled {} stale daemon record(s)", report.cleaned);
    if report.started.is_empty() {
        println!("No daemons have autostart enabled");
        return Ok(());
    }
    print_results("running", &report.started);
    ensure_all(&report.started, "start")
}

fn print_results(success: &str, results: &BTreeMap<DaemonKey, bool>) {
    for (key, ok) in results {
        println!("  {:<8} {}", if *ok { success } else { "failed" }, key);
    }
}

fn ensure_all(results: &BTreeMap<DaemonKey, bool>, verb: &str) -> Result<()> {
    let failed = results.values().filter(|ok| !**ok).count();
    if failed > 0 {
        anyhow::bail!("Failed to {} {} daemon(s)", verb, failed);
    }
    Ok(())
}

fn print_table<const N: usize>(header: [&str; N], rows: &[[String; N]]) {
    let mut widths = header.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |cells: Vec<&str>| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        println!("{}", line.join("  ").trim_end());
    };

    render(header.to_vec());
    for row in rows {
        render(row.iter().map(String::as_str).collect());
    }
}

fn dash<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
