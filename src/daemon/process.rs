//! OS process capability used by the daemon controller.
//!
//! Everything the controller needs from the process table goes through
//! [`ProcessOps`], so lifecycle logic can be exercised against a fake.

use super::record::ProcessStats;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use sysinfo::{Pid, Process, ProcessStatus, System};
use tracing::{debug, trace};

/// sysinfo needs this much time between refreshes for a meaningful CPU figure.
const MIN_CPU_WINDOW: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

/// Result of checking a pid against the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Gone. Carries the exit code when this process reaped it; a negative
    /// value is the terminating signal.
    Exited(Option<i32>),
}

/// What to launch for a daemon.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// stdout and stderr are appended here
    pub log_path: PathBuf,
}

#[async_trait]
pub trait ProcessOps: Send + Sync {
    /// Launch detached in a new session and return the pid.
    fn spawn(&self, spec: &SpawnSpec) -> io::Result<u32>;

    fn probe(&self, pid: u32) -> Liveness;

    /// Process group of `pid`, unless it is the caller's own group.
    fn process_group(&self, pid: u32) -> Option<u32>;

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;

    fn signal_group(&self, pgid: u32, signal: Signal) -> io::Result<()>;

    /// All transitive children of `pid`.
    fn descendants(&self, pid: u32) -> Vec<u32>;

    /// When the process currently holding `pid` started.
    fn start_time(&self, pid: u32) -> Option<DateTime<Utc>>;

    /// Memory and a CPU sample taken over `window`.
    async fn sample(&self, pid: u32, window: Duration) -> Option<ProcessStats>;
}

/// [`ProcessOps`] backed by the real OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessOps;

impl OsProcessOps {
    pub fn new() -> Self {
        Self
    }

    fn is_zombie(pid: u32) -> bool {
        let mut sys = System::new();
        let spid = Pid::from_u32(pid);
        if !sys.refresh_process(spid) {
            return false;
        }
        sys.process(spid)
            .is_some_and(|p| p.status() == ProcessStatus::Zombie)
    }
}

#[async_trait]
impl ProcessOps for OsProcessOps {
    fn spawn(&self, spec: &SpawnSpec) -> io::Result<u32> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        if let Some(parent) = spec.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_path)?;
        let stderr = stdout.try_clone()?;

        // std rather than tokio: a dropped tokio Child is reaped in the
        // background, which would race the liveness probe for its exit status.
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        if let Some(ref dir) = spec.cwd {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let child = cmd.spawn()?;
        let pid = child.id();
        debug!(pid, program = %program, "Spawned detached process");
        Ok(pid)
    }

    #[cfg(unix)]
    fn probe(&self, pid: u32) -> Liveness {
        let Ok(raw) = i32::try_from(pid) else {
            return Liveness::Exited(None);
        };
        if raw <= 0 {
            return Liveness::Exited(None);
        }

        // Reap first: a child of this process lingers as a zombie until waited.
        let mut status: libc::c_int = 0;
        let reaped = unsafe { libc::waitpid(raw, &mut status, libc::WNOHANG) };
        if reaped == raw {
            let code = exit_code_from_status(status);
            trace!(pid, code = ?code, "Reaped exited child");
            return Liveness::Exited(code);
        }
        if reaped == 0 {
            return Liveness::Alive;
        }

        // Not our child: existence check without sending a signal.
        let rc = unsafe { libc::kill(raw, 0) };
        if rc != 0 && io::Error::last_os_error().raw_os_error() != Some(libc::EPERM) {
            return Liveness::Exited(None);
        }
        if Self::is_zombie(pid) {
            return Liveness::Exited(None);
        }
        Liveness::Alive
    }

    #[cfg(not(unix))]
    fn probe(&self, pid: u32) -> Liveness {
        let mut sys = System::new();
        let spid = Pid::from_u32(pid);
        if sys.refresh_process(spid) && !Self::is_zombie(pid) {
            Liveness::Alive
        } else {
            Liveness::Exited(None)
        }
    }

    #[cfg(unix)]
    fn process_group(&self, pid: u32) -> Option<u32> {
        let raw = i32::try_from(pid).ok()?;
        let pgid = unsafe { libc::getpgid(raw) };
        if pgid <= 0 || pgid == unsafe { libc::getpgrp() } {
            return None;
        }
        u32::try_from(pgid).ok()
    }

    #[cfg(not(unix))]
    fn process_group(&self, _pid: u32) -> Option<u32> {
        None
    }

    #[cfg(unix)]
    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        if unsafe { libc::kill(raw, signo(signal)) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn signal(&self, pid: u32, _signal: Signal) -> io::Result<()> {
        let mut sys = System::new();
        let spid = Pid::from_u32(pid);
        sys.refresh_process(spid);
        match sys.process(spid) {
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(io::Error::new(io::ErrorKind::Other, "kill failed")),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such process")),
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, pgid: u32, signal: Signal) -> io::Result<()> {
        let raw = i32::try_from(pgid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pgid out of range"))?;
        if unsafe { libc::killpg(raw, signo(signal)) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn signal_group(&self, pgid: u32, signal: Signal) -> io::Result<()> {
        self.signal(pgid, signal)
    }

    fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut sys = System::new();
        sys.refresh_processes();

        let mut found = Vec::new();
        let mut frontier = vec![Pid::from_u32(pid)];
        while let Some(parent) = frontier.pop() {
            for (child_pid, process) in sys.processes() {
                if process.parent() == Some(parent) && !found.contains(&child_pid.as_u32()) {
                    found.push(child_pid.as_u32());
                    frontier.push(*child_pid);
                }
            }
        }
        found
    }

    fn start_time(&self, pid: u32) -> Option<DateTime<Utc>> {
        let spid = Pid::from_u32(pid);
        let mut sys = System::new();
        if !sys.refresh_process(spid) {
            return None;
        }
        sys.process(spid).and_then(started_at)
    }

    async fn sample(&self, pid: u32, window: Duration) -> Option<ProcessStats> {
        let spid = Pid::from_u32(pid);
        let mut sys = System::new();
        if !sys.refresh_process(spid) {
            return None;
        }
        tokio::time::sleep(window.max(MIN_CPU_WINDOW)).await;
        if !sys.refresh_process(spid) {
            return None;
        }

        let process = sys.process(spid)?;
        Some(ProcessStats {
            start_time: started_at(process)?,
            memory_bytes: process.memory(),
            cpu_percent: process.cpu_usage(),
        })
    }
}

fn started_at(process: &Process) -> Option<DateTime<Utc>> {
    i64::try_from(process.start_time())
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

#[cfg(unix)]
fn signo(signal: Signal) -> libc::c_int {
    match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    }
}

#[cfg(unix)]
fn exit_code_from_status(status: libc::c_int) -> Option<i32> {
    if libc::WIFEXITED(status) {
        Some(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        Some(-libc::WTERMSIG(status))
    } else {
        None
    }
}
