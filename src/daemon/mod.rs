//! App daemon supervision
//!
//! Starts, stops and observes long-running background processes that apps
//! declare in their manifests. There is no resident supervisor: every call
//! reads durable state from disk and checks it against the OS process table.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │                Supervisor                 │
//! │  manifests │ autostart │ backoff │ boot   │
//! ├───────────────────────────────────────────┤
//! │            DaemonController               │
//! │  start │ stop (escalation) │ status │ logs│
//! ├──────────────────────┬────────────────────┤
//! │      StateStore      │     ProcessOps     │
//! │  daemons/  logs/     │  spawn probe kill  │
//! └──────────────────────┴────────────────────┘
//! ```

pub mod backoff;
pub mod clock;
pub mod controller;
pub mod escalation;
pub mod health;
pub mod log_tail;
pub mod manifest;
pub mod process;
pub mod record;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod fake;

pub use backoff::BackoffSchedule;
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{ControllerSettings, DaemonController};
pub use escalation::{StopOutcome, StopPolicy};
pub use health::HealthStatus;
pub use manifest::{DaemonManifest, DirManifestProvider, ManifestProvider, StaticManifest};
pub use process::{Liveness, OsProcessOps, ProcessOps, Signal, SpawnSpec};
pub use record::{DaemonInfo, DaemonKey, DaemonRecord, DaemonStatus, ProcessStats};
pub use state::StateStore;
pub use supervisor::{BootReport, StartOutcome, Supervisor};
