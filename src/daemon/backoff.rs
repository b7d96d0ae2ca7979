//! Restart backoff gate for autostarted daemons.
//!
//! After `F` recorded failures, the next automatic restart is allowed at
//! `last_failure_at + schedule[min(F - 1, len - 1)]`. Zero failures means a
//! daemon is eligible immediately. The last entry caps the wait.

use super::record::DaemonRecord;
use crate::error::{Result, SupervisorError};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default delays: 5s, 30s, 2m, 10m
pub const DEFAULT_BACKOFF_SECS: [u64; 4] = [5, 30, 120, 600];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl BackoffSchedule {
    /// Steps must be non-empty and non-decreasing.
    pub fn new(steps: Vec<Duration>) -> Result<Self> {
        if steps.is_empty() {
            return Err(SupervisorError::Config(
                "backoff schedule must have at least one step".into(),
            ));
        }
        if steps.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(SupervisorError::Config(
                "backoff schedule must be non-decreasing".into(),
            ));
        }
        Ok(Self { steps })
    }

    pub fn from_secs(secs: &[u64]) -> Result<Self> {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }

    /// Delay owed after `failure_count` consecutive failures.
    pub fn delay_for_failures(&self, failure_count: u32) -> Duration {
        if failure_count == 0 {
            return Duration::ZERO;
        }
        let index = (failure_count as usize - 1).min(self.steps.len() - 1);
        self.steps[index]
    }

    /// Earliest time an automatic restart is allowed, or `None` if there is
    /// nothing to wait for.
    pub fn next_eligible_at(
        &self,
        failure_count: u32,
        last_failure_at: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if failure_count == 0 {
            return None;
        }
        let last = last_failure_at?;
        let delay = chrono::Duration::from_std(self.delay_for_failures(failure_count)).ok()?;
        Some(last.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn is_eligible(&self, record: &DaemonRecord, now: DateTime<Utc>) -> bool {
        match self.next_eligible_at(record.failure_count, record.last_failure_at) {
            Some(at) => now >= at,
            None => true,
        }
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            steps: DEFAULT_BACKOFF_SECS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::record::DaemonKey;

    #[test]
    fn test_delay_is_monotonic_and_capped() {
        let schedule = BackoffSchedule::default();
        let delays: Vec<Duration> = (1..=5).map(|f| schedule.delay_for_failures(f)).collect();

        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays[0], Duration::from_secs(5));
        assert_eq!(delays[2], Duration::from_secs(120));
        assert_eq!(delays[3], Duration::from_secs(600));
        assert_eq!(delays[4], Duration::from_secs(600));
        assert_eq!(schedule.delay_for_failures(1_000), Duration::from_secs(600));
    }

    #[test]
    fn test_zero_failures_is_immediately_eligible() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay_for_failures(0), Duration::ZERO);
        assert!(schedule.next_eligible_at(0, Some(Utc::now())).is_none());
        // A failure count without a timestamp has nothing to wait on.
        assert!(schedule.next_eligible_at(3, None).is_none());
    }

    #[test]
    fn test_eligibility_window() {
        let schedule = BackoffSchedule::default();
        let failed_at = Utc::now();
        let mut record = DaemonRecord::new(&DaemonKey::new("demo", "alpha").unwrap());
        record.failure_count = 3;
        record.last_failure_at = Some(failed_at);

        assert_eq!(
            schedule.next_eligible_at(3, Some(failed_at)),
            Some(failed_at + chrono::Duration::seconds(120))
        );
        assert!(!schedule.is_eligible(&record, failed_at));
        assert!(!schedule.is_eligible(&record, failed_at + chrono::Duration::seconds(119)));
        assert!(schedule.is_eligible(&record, failed_at + chrono::Duration::seconds(120)));
    }

    #[test]
    fn test_schedule_validation() {
        assert!(BackoffSchedule::from_secs(&[]).is_err());
        assert!(BackoffSchedule::from_secs(&[30, 5]).is_err());
        let custom = BackoffSchedule::from_secs(&[1, 1, 2]).unwrap();
        assert_eq!(custom.delay_for_failures(9), Duration::from_secs(2));
    }
}
