//! In-memory process table for lifecycle tests.

use super::process::{Liveness, ProcessOps, SpawnSpec, Signal};
use super::record::ProcessStats;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

const FIRST_PID: u32 = 10_000;

#[derive(Debug, Clone)]
struct FakeProc {
    alive: bool,
    group: Option<u32>,
    parent: Option<u32>,
    ignore_term: bool,
    unkillable: bool,
    exit_code: Option<i32>,
    started: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Table {
    next_pid: u32,
    procs: BTreeMap<u32, FakeProc>,
    /// (target, signal, sent to a group)
    signals: Vec<(u32, Signal, bool)>,
    spawned: Vec<SpawnSpec>,
    fail_spawns: bool,
}

impl Table {
    fn insert(&mut self, parent: Option<u32>) -> u32 {
        if self.next_pid < FIRST_PID {
            self.next_pid = FIRST_PID;
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        let group = match parent {
            Some(parent) => self.procs.get(&parent).and_then(|p| p.group),
            None => Some(pid),
        };
        self.procs.insert(
            pid,
            FakeProc {
                alive: true,
                group,
                parent,
                ignore_term: false,
                unkillable: false,
                exit_code: None,
                started: Utc::now(),
            },
        );
        pid
    }

    fn deliver(&mut self, pid: u32, signal: Signal) -> io::Result<()> {
        let entry = self
            .procs
            .get_mut(&pid)
            .filter(|p| p.alive)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such process"))?;
        let survives = match signal {
            Signal::Terminate => entry.ignore_term || entry.unkillable,
            Signal::Kill => entry.unkillable,
        };
        if !survives {
            entry.alive = false;
            entry.exit_code = Some(match signal {
                Signal::Terminate => -15,
                Signal::Kill => -9,
            });
        }
        Ok(())
    }

    fn get_mut(&mut self, pid: u32) -> &mut FakeProc {
        self.procs.get_mut(&pid).expect("unknown fake pid")
    }
}

/// Scriptable stand-in for [`OsProcessOps`](super::process::OsProcessOps).
#[derive(Debug, Default)]
pub(crate) struct FakeProcessOps {
    table: Mutex<Table>,
}

impl FakeProcessOps {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap()
    }

    /// Start a process outside of `spawn`, leading its own group.
    pub fn launch(&self) -> u32 {
        self.table().insert(None)
    }

    pub fn launch_child(&self, parent: u32) -> u32 {
        self.table().insert(Some(parent))
    }

    /// Make `pid` die as if killed by someone else.
    pub fn kill_out_of_band(&self, pid: u32, exit_code: Option<i32>) {
        let mut table = self.table();
        let entry = table.get_mut(pid);
        entry.alive = false;
        entry.exit_code = exit_code;
    }

    pub fn ignore_terminate(&self, pid: u32) {
        self.table().get_mut(pid).ignore_term = true;
    }

    pub fn make_unkillable(&self, pid: u32) {
        self.table().get_mut(pid).unkillable = true;
    }

    /// Leave `pid` in the caller's group so only the leader can be signalled.
    pub fn detach_group(&self, pid: u32) {
        self.table().get_mut(pid).group = None;
    }

    /// Hand `pid` to an unrelated process that started at `started`.
    pub fn reuse_pid(&self, pid: u32, started: DateTime<Utc>) {
        let mut table = self.table();
        let entry = table.get_mut(pid);
        entry.alive = true;
        entry.exit_code = None;
        entry.started = started;
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.table().fail_spawns = fail;
    }

    pub fn spawned(&self) -> Vec<SpawnSpec> {
        self.table().spawned.clone()
    }

    pub fn spawned_count(&self) -> usize {
        self.table().spawned.len()
    }

    pub fn signals(&self) -> Vec<(u32, Signal, bool)> {
        self.table().signals.clone()
    }
}

#[async_trait]
impl ProcessOps for FakeProcessOps {
    fn spawn(&self, spec: &SpawnSpec) -> io::Result<u32> {
        let mut table = self.table();
        if spec.argv.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
        }
        if table.fail_spawns {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }
        table.spawned.push(spec.clone());
        Ok(table.insert(None))
    }

    fn probe(&self, pid: u32) -> Liveness {
        match self.table().procs.get(&pid) {
            Some(entry) if entry.alive => Liveness::Alive,
            Some(entry) => Liveness::Exited(entry.exit_code),
            None => Liveness::Exited(None),
        }
    }

    fn process_group(&self, pid: u32) -> Option<u32> {
        self.table()
            .procs
            .get(&pid)
            .filter(|p| p.alive)
            .and_then(|p| p.group)
    }

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        let mut table = self.table();
        table.signals.push((pid, signal, false));
        table.deliver(pid, signal)
    }

    fn signal_group(&self, pgid: u32, signal: Signal) -> io::Result<()> {
        let mut table = self.table();
        table.signals.push((pgid, signal, true));
        let members: Vec<u32> = table
            .procs
            .iter()
            .filter(|(_, p)| p.alive && p.group == Some(pgid))
            .map(|(pid, _)| *pid)
            .collect();
        if members.is_empty() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such group"));
        }
        for pid in members {
            table.deliver(pid, signal)?;
        }
        Ok(())
    }

    fn descendants(&self, pid: u32) -> Vec<u32> {
        let table = self.table();
        let mut found = Vec::new();
        let mut frontier = vec![pid];
        while let Some(parent) = frontier.pop() {
            for (child, entry) in &table.procs {
                if entry.alive && entry.parent == Some(parent) && !found.contains(child) {
                    found.push(*child);
                    frontier.push(*child);
                }
            }
        }
        found
    }

    fn start_time(&self, pid: u32) -> Option<DateTime<Utc>> {
        self.table()
            .procs
            .get(&pid)
            .filter(|p| p.alive)
            .map(|p| p.started)
    }

    async fn sample(&self, pid: u32, _window: Duration) -> Option<ProcessStats> {
        let table = self.table();
        let entry = table.procs.get(&pid).filter(|p| p.alive)?;
        Some(ProcessStats {
            start_time: entry.started,
            memory_bytes: 8 * 1024 * 1024,
            cpu_percent: 0.5,
        })
    }
}
