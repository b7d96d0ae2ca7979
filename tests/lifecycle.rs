#![cfg(unix)]

use appd::daemon::{
    Clock, DaemonManifest, DaemonRecord, ManualClock, StartOutcome, StaticManifest, Supervisor,
};
use appd::{DaemonKey, DaemonStatus, SupervisorConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn key(s: &str) -> DaemonKey {
    s.parse().unwrap()
}

fn manifest() -> DaemonManifest {
    DaemonManifest::new()
        .declare("demo", "alpha", "sleep 1000")
        .unwrap()
        .declare("demo", "stubborn", "sh -c 'trap \"\" TERM; sleep 1000'")
        .unwrap()
        .declare("demo", "chatty", "sh -c 'echo hello; echo world >&2; sleep 1000'")
        .unwrap()
        .declare("demo", "missing", "nonexistent_command_12345 --flag")
        .unwrap()
}

fn supervisor(dir: &TempDir) -> Supervisor {
    Supervisor::new(
        SupervisorConfig::for_root(dir.path()),
        StaticManifest(manifest()),
    )
    .unwrap()
}

fn os_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_start_and_stop_sleep_daemon() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(&dir);
    let alpha = key("demo:alpha");

    let StartOutcome::Started { pid } = sup.start_daemon(&alpha) else {
        panic!("daemon did not start");
    };
    let controller = sup.controller(&alpha);
    assert!(controller.is_running());
    assert_eq!(controller.get_pid(), Some(pid));
    assert!(os_alive(pid));

    assert!(controller.stop(Duration::from_secs(2)).await);
    assert!(!controller.is_running());
    let record = controller.record();
    assert_eq!(record.status, DaemonStatus::Stopped);
    assert!(record.pid.is_none());
    assert_eq!(record.failure_count, 0);
    assert!(!os_alive(pid));
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(&dir);
    let alpha = key("demo:alpha");

    let StartOutcome::Started { pid } = sup.start_daemon(&alpha) else {
        panic!("daemon did not start");
    };
    assert_eq!(
        sup.start_daemon(&alpha),
        StartOutcome::AlreadyRunning { pid }
    );
    assert_eq!(sup.controller(&alpha).get_pid(), Some(pid));

    assert!(sup.stop_daemon(&alpha, Some(Duration::from_secs(2))).await);
    assert!(sup.stop_daemon(&alpha, Some(Duration::from_secs(2))).await);
    assert_eq!(sup.store().load(&alpha).status, DaemonStatus::Stopped);
}

#[tokio::test]
async fn test_out_of_band_kill_is_reconciled_once() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(&dir);
    let alpha = key("demo:alpha");

    let StartOutcome::Started { pid } = sup.start_daemon(&alpha) else {
        panic!("daemon did not start");
    };
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }

    let controller = sup.controller(&alpha);
    assert!(wait_until(|| !controller.is_running()).await);
    let record = controller.record();
    assert_eq!(record.status, DaemonStatus::Crashed);
    assert_eq!(record.failure_count, 1);
    assert_eq!(record.exit_code, Some(-9));
    assert!(record.last_failure_at.is_some());

    assert!(!controller.is_running());
    assert_eq!(sup.cleanup_stale_entries(), 0);
    assert_eq!(controller.record().failure_count, 1);
}

#[tokio::test]
async fn test_term_ignoring_daemon_is_killed() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(&dir);
    let stubborn = key("demo:stubborn");

    let StartOutcome::Started { pid } = sup.start_daemon(&stubborn) else {
        panic!("daemon did not start");
    };
    // Let the shell install its trap.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let controller = sup.controller(&stubborn);
    assert!(controller.stop(Duration::from_millis(500)).await);
    let record = controller.record();
    assert_eq!(record.status, DaemonStatus::Stopped);
    // Killed directly, or the shell saw its child killed first.
    assert!(matches!(record.exit_code, Some(-9) | Some(137)));
    assert!(!os_alive(pid));
}

#[tokio::test]
async fn test_logs_capture_stdout_and_stderr() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(&dir);
    let chatty = key("demo:chatty");

    assert!(sup.start_daemon(&chatty).is_success());
    assert!(wait_until(|| sup.daemon_logs(&chatty, 10).len() == 2).await);

    let lines = sup.daemon_logs(&chatty, 10);
    assert!(lines.contains(&"hello".to_string()));
    assert!(lines.contains(&"world".to_string()));
    assert_eq!(sup.daemon_logs(&chatty, 1).len(), 1);

    let info = sup.daemon_status(&chatty).await;
    assert_eq!(info.status, DaemonStatus::Running);
    assert!(info.uptime_secs.is_some());

    assert!(sup.stop_daemon(&chatty, Some(Duration::from_secs(2))).await);
}

#[tokio::test]
async fn test_spawn_failure_marks_crashed() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(&dir);
    let missing = key("demo:missing");

    assert_eq!(sup.start_daemon(&missing), StartOutcome::Failed);
    let record = sup.store().load(&missing);
    assert_eq!(record.status, DaemonStatus::Crashed);
    assert_eq!(record.failure_count, 1);
    assert!(record.pid.is_none());
}

#[tokio::test]
async fn test_autostart_respects_backoff() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let sup = supervisor(&dir).with_clock(clock.clone());
    let alpha = key("demo:alpha");

    let mut record = DaemonRecord::new(&alpha);
    record.status = DaemonStatus::Crashed;
    record.failure_count = 3;
    record.last_failure_at = Some(clock.now());
    sup.store().save(&alpha, &record).unwrap();
    sup.set_autostart(&alpha, true).unwrap();

    let results = sup.start_enabled_daemons();
    assert_eq!(results.get(&alpha), Some(&false));
    assert!(!sup.controller(&alpha).is_running());

    clock.advance(Duration::from_secs(121));
    let results = sup.start_enabled_daemons();
    assert_eq!(results.get(&alpha), Some(&true));
    assert!(sup.controller(&alpha).is_running());

    let stopped = sup.stop_all(Some(Duration::from_secs(2))).await;
    assert_eq!(stopped.get(&alpha), Some(&true));
}
