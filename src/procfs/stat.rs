//! `/proc/<pid>/stat` decoding.

use nix::unistd::Pid;

use super::ProcFs;
use crate::error::{ProcImageError, Result};

/// Scheduler state letter from the third stat field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    Zombie,
    Stopped,
    TracingStop,
    Dead,
    Idle,
    Parked,
    Waking,
    Other(char),
}

impl From<char> for ProcessState {
    fn from(c: char) -> Self {
        match c {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' => ProcessState::DiskSleep,
            'Z' => ProcessState::Zombie,
            'T' => ProcessState::Stopped,
            't' => ProcessState::TracingStop,
            'X' | 'x' => ProcessState::Dead,
            'I' => ProcessState::Idle,
            'P' => ProcessState::Parked,
            'W' => ProcessState::Waking,
            other => ProcessState::Other(other),
        }
    }
}

impl ProcessState {
    /// Zombie and dead tasks no longer own an address space.
    pub fn has_address_space(&self) -> bool {
        !matches!(self, ProcessState::Zombie | ProcessState::Dead)
    }
}

/// Leading fields of a stat line, up to `starttime`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStat {
    pub pid: i32,
    pub comm: String,
    pub state: ProcessState,
    pub ppid: i32,
    pub pgrp: i32,
    pub session: i32,
    pub tty_nr: i32,
    pub tpgid: i32,
    pub flags: u32,
    pub minflt: u64,
    pub cminflt: u64,
    pub majflt: u64,
    pub cmajflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub cutime: i64,
    pub cstime: i64,
    pub priority: i64,
    pub nice: i64,
    pub num_threads: i64,
    pub starttime: u64,
}

fn field<T: std::str::FromStr>(fields: &[&str], idx: usize, name: &str) -> Result<T> {
    let raw = fields
        .get(idx)
        .ok_or_else(|| ProcImageError::MalformedStat(format!("missing field {name}")))?;
    raw.parse()
        .map_err(|_| ProcImageError::MalformedStat(format!("bad {name}: {raw:?}")))
}

/// Decode one stat line.
///
/// `comm` may itself contain spaces and parentheses, so it spans from the
/// first `(` to the last `)`.
pub fn parse_stat_line(line: &str) -> Result<ProcessStat> {
    let open = line
        .find('(')
        .ok_or_else(|| ProcImageError::MalformedStat("missing '('".to_string()))?;
    let close = line
        .rfind(')')
        .filter(|&close| close > open)
        .ok_or_else(|| ProcImageError::MalformedStat("missing ')'".to_string()))?;

    let pid = line[..open]
        .trim()
        .parse()
        .map_err(|_| ProcImageError::MalformedStat("bad pid".to_string()))?;
    let comm = line[open + 1..close].to_string();

    let fields: Vec<&str> = line[close + 1..].split_whitespace().collect();
    let state_field = fields
        .first()
        .copied()
        .ok_or_else(|| ProcImageError::MalformedStat("missing field state".to_string()))?;
    let mut chars = state_field.chars();
    let state = match (chars.next(), chars.next()) {
        (Some(c), None) => ProcessState::from(c),
        _ => {
            return Err(ProcImageError::MalformedStat(format!(
                "bad state: {state_field:?}"
            )))
        }
    };

    Ok(ProcessStat {
        pid,
        comm,
        state,
        ppid: field(&fields, 1, "ppid")?,
        pgrp: field(&fields, 2, "pgrp")?,
        session: field(&fields, 3, "session")?,
        tty_nr: field(&fields, 4, "tty_nr")?,
        tpgid: field(&fields, 5, "tpgid")?,
        flags: field(&fields, 6, "flags")?,
        minflt: field(&fields, 7, "minflt")?,
        cminflt: field(&fields, 8, "cminflt")?,
        majflt: field(&fields, 9, "majflt")?,
        cmajflt: field(&fields, 10, "cmajflt")?,
        utime: field(&fields, 11, "utime")?,
        stime: field(&fields, 12, "stime")?,
        cutime: field(&fields, 13, "cutime")?,
        cstime: field(&fields, 14, "cstime")?,
        priority: field(&fields, 15, "priority")?,
        nice: field(&fields, 16, "nice")?,
        num_threads: field(&fields, 17, "num_threads")?,
        starttime: field(&fields, 19, "starttime")?,
    })
}

impl ProcFs {
    /// Read and decode `/proc/<pid>/stat`.
    pub fn read_process_stat(&self, pid: Pid) -> Result<ProcessStat> {
        let path = self.stat_path(pid);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ProcImageError::from_procfs_io(e, pid.as_raw(), &path.to_string_lossy())
        })?;
        let line = text.lines().next().unwrap_or_default();
        parse_stat_line(line)
    }

    /// Check that `pid` is a live user process with an address space.
    ///
    /// Zombies also expose an empty command line, so the stat state is
    /// consulted before the command line.
    pub fn check_target(&self, pid: Pid) -> Result<ProcessStat> {
        if !self.is_process_alive(pid) {
            return Err(ProcImageError::ProcessNotFound { pid: pid.as_raw() });
        }
        let stat = self.read_process_stat(pid)?;
        if !stat.state.has_address_space() {
            return Err(ProcImageError::NotFound {
                pid: pid.as_raw(),
                what: format!("address space ({:?} process)", stat.state),
            });
        }
        if self.is_kernel_process(pid)? {
            return Err(ProcImageError::NotFound {
                pid: pid.as_raw(),
                what: "executable image (kernel thread)".to_string(),
            });
        }
        Ok(stat)
    }
}
