//! Error types for process image reconstruction.
//!
//! Every component surfaces the first failure it hits as a `ProcImageError`.
//! Variants carry enough structure (pid, address, sizes) to report what went
//! wrong, and [`ProcImageError::kind`] collapses them onto a small taxonomy
//! callers can branch on.

use std::fmt;

use nix::errno::Errno;
use thiserror::Error;

use crate::formats::elf::ElfError;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The process, its maps file or its backing executable is absent.
    NotFound,
    /// Attach was refused, or a procfs file could not be opened for lack of rights.
    PermissionDenied,
    /// A maps line, stat line or ELF header failed structural checks.
    Malformed,
    /// Fewer bytes were read than requested.
    ShortRead,
    /// An allocation or configured limit was exceeded.
    ResourceExhausted,
    /// The caller-imposed deadline elapsed.
    Timeout,
    /// Any other operating system error.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Malformed => "malformed",
            ErrorKind::ShortRead => "short read",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "i/o error",
        };
        f.write_str(name)
    }
}

/// Main error type for procimage operations.
#[derive(Debug, Error)]
pub enum ProcImageError {
    /// No `/proc/<pid>` entry, or the process vanished mid-operation.
    #[error("Process {pid} not found")]
    ProcessNotFound { pid: i32 },

    /// Something required for the pid is missing (exe link, executable inode, ...).
    #[error("{what} not found for pid {pid}")]
    NotFound { pid: i32, what: String },

    /// Attaching as a tracer was refused by the kernel.
    #[error("Permission denied attaching to pid {pid}: {errno}")]
    AttachDenied { pid: i32, errno: Errno },

    /// A procfs file exists but may not be opened by this user.
    #[error("Permission denied reading {path}")]
    AccessDenied { path: String },

    /// A maps line failed the fixed grammar.
    #[error("Malformed maps line {line}: {reason}")]
    MalformedMaps { line: usize, reason: String },

    /// A stat line failed to decode.
    #[error("Malformed stat line: {0}")]
    MalformedStat(String),

    /// The selected region does not hold a decodable ELF image.
    #[error("Malformed ELF image: {0}")]
    MalformedElf(#[from] ElfError),

    /// A read request with an empty or inverted address range.
    #[error("Invalid memory range {start:#x}-{end:#x}")]
    InvalidRange { start: u64, end: u64 },

    /// The memory file delivered fewer bytes than requested.
    #[error("Short read at {address:#x}: requested {requested} bytes, got {read}")]
    ShortRead {
        address: u64,
        requested: usize,
        read: usize,
    },

    /// Resource limit exceeded
    #[error("Resource limit exceeded: {resource} ({used}/{limit})")]
    ResourceExhausted {
        resource: String,
        used: u64,
        limit: u64,
    },

    /// Pipeline timeout
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A whole reconstruction attempt failed; wraps the first failure.
    #[error("Reconstruction failed for pid {pid} ({}): {source}", .source.kind())]
    Reconstruction {
        pid: i32,
        #[source]
        source: Box<ProcImageError>,
    },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcImageError {
    /// Map this error onto the failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcImageError::ProcessNotFound { .. } | ProcImageError::NotFound { .. } => {
                ErrorKind::NotFound
            }
            ProcImageError::AttachDenied { .. } | ProcImageError::AccessDenied { .. } => {
                ErrorKind::PermissionDenied
            }
            ProcImageError::MalformedMaps { .. }
            | ProcImageError::MalformedStat(_)
            | ProcImageError::MalformedElf(_)
            | ProcImageError::InvalidRange { .. }
            | ProcImageError::Config(_) => ErrorKind::Malformed,
            ProcImageError::ShortRead { .. } => ErrorKind::ShortRead,
            ProcImageError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            ProcImageError::Timeout { .. } => ErrorKind::Timeout,
            ProcImageError::Reconstruction { source, .. } => source.kind(),
            ProcImageError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether retrying the whole operation later may succeed.
    ///
    /// A refused attach usually means another tracer holds the target, and a
    /// short read means the target changed its mappings underneath us.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcImageError::AttachDenied { .. } | ProcImageError::ShortRead { .. } => true,
            ProcImageError::Reconstruction { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Wrap a pipeline failure with the pid it concerns.
    pub fn for_pid(self, pid: i32) -> Self {
        match self {
            already @ ProcImageError::Reconstruction { .. } => already,
            other => ProcImageError::Reconstruction {
                pid,
                source: Box::new(other),
            },
        }
    }

    /// Classify an `std::io::Error` raised while opening a procfs file of `pid`.
    pub(crate) fn from_procfs_io(err: std::io::Error, pid: i32, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProcImageError::ProcessNotFound { pid },
            std::io::ErrorKind::PermissionDenied => ProcImageError::AccessDenied {
                path: path.to_string(),
            },
            _ => ProcImageError::Io(err),
        }
    }
}

/// Result type alias for procimage operations
pub type Result<T> = std::result::Result<T, ProcImageError>;
