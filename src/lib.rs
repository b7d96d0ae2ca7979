pub mod clienv;
pub mod daemon;
pub mod error;
pub mod user_config;

pub use daemon::{DaemonKey, DaemonStatus, Supervisor};
pub use error::{Result, SupervisorError};
pub use user_config::SupervisorConfig;
