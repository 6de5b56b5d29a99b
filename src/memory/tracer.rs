//! Tracing control over a target process.
//!
//! Reading `/proc/<pid>/mem` of a foreign process requires being its tracer.
//! [`AttachGuard`] owns the "currently traced" fact: creating it attaches,
//! dropping it detaches, so every exit path releases the target.

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

use crate::error::{ProcImageError, Result};

/// Attach/detach collaborator.
pub trait Tracer {
    /// Become the tracer of `pid` and wait for it to stop.
    fn attach(&self, pid: Pid) -> Result<()>;
    /// Release `pid` and let it continue.
    fn detach(&self, pid: Pid) -> Result<()>;
}

impl<T: Tracer + ?Sized> Tracer for &T {
    fn attach(&self, pid: Pid) -> Result<()> {
        (**self).attach(pid)
    }

    fn detach(&self, pid: Pid) -> Result<()> {
        (**self).detach(pid)
    }
}

/// `PTRACE_ATTACH` / `PTRACE_DETACH` based tracer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtraceTracer;

impl Tracer for PtraceTracer {
    fn attach(&self, pid: Pid) -> Result<()> {
        ptrace::attach(pid).map_err(|errno| match errno {
            Errno::ESRCH => ProcImageError::ProcessNotFound { pid: pid.as_raw() },
            errno => ProcImageError::AttachDenied {
                pid: pid.as_raw(),
                errno,
            },
        })?;

        // The attach is in effect even if the stop notification cannot be collected.
        if let Err(errno) = waitpid(pid, Some(WaitPidFlag::__WALL)) {
            warn!(pid = pid.as_raw(), %errno, "waitpid after attach failed");
        }
        Ok(())
    }

    fn detach(&self, pid: Pid) -> Result<()> {
        ptrace::detach(pid, None).map_err(|errno| ProcImageError::Io(errno.into()))
    }
}

/// Scoped tracing control. Detaches exactly once, on drop.
#[must_use = "dropping the guard detaches immediately"]
pub struct AttachGuard<'t, T: Tracer + ?Sized> {
    tracer: &'t T,
    pid: Pid,
}

impl<'t, T: Tracer + ?Sized> AttachGuard<'t, T> {
    /// Attach to `pid`. On failure nothing is held and nothing will be released.
    pub fn attach(tracer: &'t T, pid: Pid) -> Result<Self> {
        tracer.attach(pid)?;
        debug!(pid = pid.as_raw(), "Attached to process");
        Ok(Self { tracer, pid })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl<T: Tracer + ?Sized> Drop for AttachGuard<'_, T> {
    fn drop(&mut self) {
        match self.tracer.detach(self.pid) {
            Ok(()) => trace!(pid = self.pid.as_raw(), "Detached from process"),
            Err(e) => warn!(pid = self.pid.as_raw(), error = %e, "Detach failed"),
        }
    }
}
