//! Read-only access to the per-process pseudo-filesystem.
//!
//! [`ProcFs`] knows where the `maps`, `mem`, `exe`, `cmdline` and `stat`
//! entries of a pid live under a configurable root, and offers the small
//! predicates the reconstruction pipeline and the driver rely on.

pub mod maps;
pub mod stat;

use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use tracing::{debug, trace};

use crate::config::ProcfsConfig;
use crate::error::{ProcImageError, Result};

pub use maps::{RegionCatalog, VirtualMemoryArea, VmaPerms, UNKNOWN_INODE};
pub use stat::{ProcessState, ProcessStat};

/// Suffix the kernel appends to links and map paths whose file was unlinked.
pub const DELETED_MARKER: &str = " (deleted)";

/// Resolved target of `/proc/<pid>/exe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePath {
    /// Path with any deleted marker removed.
    pub path: PathBuf,
    /// The kernel reported the file as removed from disk while still mapped.
    pub deleted: bool,
}

/// Handle on a procfs tree.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
    max_path_len: usize,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(&ProcfsConfig::default())
    }
}

impl ProcFs {
    pub fn new(config: &ProcfsConfig) -> Self {
        Self {
            root: config.root.clone(),
            max_path_len: config.max_path_len,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid_dir(&self, pid: Pid) -> PathBuf {
        self.root.join(pid.as_raw().to_string())
    }

    pub fn maps_path(&self, pid: Pid) -> PathBuf {
        self.pid_dir(pid).join("maps")
    }

    pub fn mem_path(&self, pid: Pid) -> PathBuf {
        self.pid_dir(pid).join("mem")
    }

    pub fn exe_path(&self, pid: Pid) -> PathBuf {
        self.pid_dir(pid).join("exe")
    }

    pub fn cmdline_path(&self, pid: Pid) -> PathBuf {
        self.pid_dir(pid).join("cmdline")
    }

    pub fn stat_path(&self, pid: Pid) -> PathBuf {
        self.pid_dir(pid).join("stat")
    }

    /// Does `<root>/<pid>` exist.
    pub fn is_process_alive(&self, pid: Pid) -> bool {
        self.pid_dir(pid).exists()
    }

    /// Read at most `capacity` bytes of the command line, split on NUL.
    ///
    /// Kernel threads (and zombies) expose an empty command line, which is
    /// reported as `NotFound`.
    pub fn read_command_line(&self, pid: Pid, capacity: usize) -> Result<Vec<String>> {
        let path = self.cmdline_path(pid);
        let file = File::open(&path).map_err(|e| {
            ProcImageError::from_procfs_io(e, pid.as_raw(), &path.to_string_lossy())
        })?;

        let mut raw = Vec::new();
        file.take(capacity as u64).read_to_end(&mut raw)?;
        if raw.is_empty() {
            return Err(ProcImageError::NotFound {
                pid: pid.as_raw(),
                what: "command line".to_string(),
            });
        }

        let args = raw
            .split(|&b| b == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();
        Ok(args)
    }

    /// A kernel thread has no user-space command line.
    pub fn is_kernel_process(&self, pid: Pid) -> Result<bool> {
        match self.read_command_line(pid, 1) {
            Ok(_) => Ok(false),
            Err(ProcImageError::NotFound { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }

    pub fn is_user_process(&self, pid: Pid) -> Result<bool> {
        self.is_kernel_process(pid).map(|kernel| !kernel)
    }

    /// Resolve the executable link of `pid`.
    ///
    /// A trailing `" (deleted)"` is stripped and reported through
    /// [`ImagePath::deleted`]; it is not an error. The resolved length plus a
    /// terminator must fit in the configured path capacity.
    pub fn read_image_path(&self, pid: Pid) -> Result<ImagePath> {
        let link = self.exe_path(pid);
        let target = std::fs::read_link(&link).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound && self.is_process_alive(pid) {
                ProcImageError::NotFound {
                    pid: pid.as_raw(),
                    what: "executable link".to_string(),
                }
            } else {
                ProcImageError::from_procfs_io(e, pid.as_raw(), &link.to_string_lossy())
            }
        })?;

        let bytes = target.as_os_str().as_bytes();
        if bytes.is_empty() {
            return Err(ProcImageError::NotFound {
                pid: pid.as_raw(),
                what: "executable path".to_string(),
            });
        }
        if bytes.len() + 1 > self.max_path_len {
            return Err(ProcImageError::ResourceExhausted {
                resource: "executable path".to_string(),
                used: bytes.len() as u64 + 1,
                limit: self.max_path_len as u64,
            });
        }

        let (path, deleted) = strip_deleted_marker(bytes);
        trace!(pid = pid.as_raw(), path = %path.display(), deleted, "Resolved executable link");
        if deleted {
            debug!(pid = pid.as_raw(), path = %path.display(), "Executable was deleted from disk");
        }

        Ok(ImagePath { path, deleted })
    }
}

fn strip_deleted_marker(bytes: &[u8]) -> (PathBuf, bool) {
    let marker = DELETED_MARKER.as_bytes();
    if bytes.len() > marker.len() && bytes.ends_with(marker) {
        let kept = &bytes[..bytes.len() - marker.len()];
        (PathBuf::from(OsStr::from_bytes(kept)), true)
    } else {
        (PathBuf::from(OsStr::from_bytes(bytes)), false)
    }
}
