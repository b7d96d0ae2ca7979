//! Terminate-then-kill escalation for a daemon's process group.

use super::process::{Liveness, ProcessOps, Signal};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long to wait at each step of a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Grace period after SIGTERM
    pub timeout: Duration,
    /// Wait after SIGKILL before giving up
    pub kill_grace: Duration,
    pub poll_interval: Duration,
}

impl StopPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            kill_grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// Exited within the grace period after SIGTERM
    pub graceful: bool,
    pub exit_code: Option<i32>,
    /// Confirmed absent from the process table
    pub gone: bool,
}

/// Stop `pid` and everything in its process group.
///
/// SIGTERM goes to the group (or the leader alone when it has no group of
/// its own). If the leader outlives `policy.timeout`, its descendants are
/// killed first, then the group, then the leader itself.
pub async fn terminate(ops: &dyn ProcessOps, pid: u32, policy: &StopPolicy) -> StopOutcome {
    let group = ops.process_group(pid);

    send(ops, pid, group, Signal::Terminate);
    if let Liveness::Exited(exit_code) =
        wait_for_exit(ops, pid, policy.timeout, policy.poll_interval).await
    {
        debug!(pid, "Process exited after terminate signal");
        return StopOutcome {
            graceful: true,
            exit_code,
            gone: true,
        };
    }

    warn!(pid, timeout = ?policy.timeout, "Process ignored terminate signal, force killing");
    for child in ops.descendants(pid) {
        if let Err(e) = ops.signal(child, Signal::Kill) {
            debug!(pid = child, error = %e, "Failed to kill child process");
        }
    }
    send(ops, pid, group, Signal::Kill);
    if group.is_some() {
        if let Err(e) = ops.signal(pid, Signal::Kill) {
            debug!(pid, error = %e, "Leader already gone after group kill");
        }
    }

    match wait_for_exit(ops, pid, policy.kill_grace, policy.poll_interval).await {
        Liveness::Exited(exit_code) => StopOutcome {
            graceful: false,
            exit_code,
            gone: true,
        },
        Liveness::Alive => StopOutcome {
            graceful: false,
            exit_code: None,
            gone: false,
        },
    }
}

fn send(ops: &dyn ProcessOps, pid: u32, group: Option<u32>, signal: Signal) {
    let result = match group {
        Some(pgid) => ops.signal_group(pgid, signal).or_else(|e| {
            debug!(pgid, error = %e, "Group signal failed, signalling leader");
            ops.signal(pid, signal)
        }),
        None => ops.signal(pid, signal),
    };
    if let Err(e) = result {
        debug!(pid, ?signal, error = %e, "Failed to deliver signal");
    }
}

/// Poll until `pid` is gone or `limit` elapses.
pub async fn wait_for_exit(
    ops: &dyn ProcessOps,
    pid: u32,
    limit: Duration,
    interval: Duration,
) -> Liveness {
    let deadline = Instant::now() + limit;
    loop {
        if let exited @ Liveness::Exited(_) = ops.probe(pid) {
            return exited;
        }
        let now = Instant::now();
        if now >= deadline {
            return Liveness::Alive;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
