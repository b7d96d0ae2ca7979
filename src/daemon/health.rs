use super::record::{DaemonInfo, DaemonKey, DaemonStatus};
use serde::Serialize;
use std::fmt;

/// Failure count at which a daemon is flagged even if it is currently up
const UNHEALTHY_FAILURES: u32 = 2;

/// Summary over a set of daemon status views
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub crashed: usize,
    /// Crashed daemons and daemons with repeated failures
    pub unhealthy: Vec<DaemonKey>,
}

impl HealthStatus {
    pub fn from_daemons(daemons: &[DaemonInfo]) -> Self {
        let mut status = HealthStatus {
            total: daemons.len(),
            ..Self::default()
        };

        for info in daemons {
            match info.status {
                DaemonStatus::Running => status.running += 1,
                DaemonStatus::Stopped => status.stopped += 1,
                DaemonStatus::Crashed => status.crashed += 1,
                DaemonStatus::Starting | DaemonStatus::Stopping => {
                    // Transitional states
                }
            }

            if info.status == DaemonStatus::Crashed || info.failure_count >= UNHEALTHY_FAILURES {
                status.unhealthy.push(info.key.clone());
            }
        }

        status
    }

    pub fn is_healthy(&self) -> bool {
        self.crashed == 0 && self.unhealthy.is_empty()
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} daemons: {} running, {} stopped, {} crashed",
            self.total, self.running, self.stopped, self.crashed
        )
    }
}
