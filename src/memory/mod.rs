//! Raw reads from a live process address space.
//!
//! A read follows a fixed protocol: open `/proc/<pid>/mem`, attach, seek to
//! the start address, read exactly the requested length, detach. Detach is
//! tied to an [`AttachGuard`] and therefore runs on every path once attach
//! succeeded. Each call is one independent attempt; nothing here retries.

pub mod tracer;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use bytes::Bytes;
use nix::unistd::Pid;
use tracing::{debug, trace};

use crate::config::MemoryConfig;
use crate::error::{ProcImageError, Result};
use crate::procfs::{ProcFs, VirtualMemoryArea};

pub use tracer::{AttachGuard, PtraceTracer, Tracer};

/// Bytes copied out of the target together with the address they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMemoryBlock {
    start: u64,
    data: Bytes,
}

impl RawMemoryBlock {
    pub fn new(start: u64, data: Bytes) -> Self {
        Self { start, data }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive end address.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Reader over one process's memory pseudo-file.
#[derive(Debug)]
pub struct ProcessMemory<T: Tracer = PtraceTracer> {
    pid: Pid,
    mem_path: PathBuf,
    tracer: T,
    max_region_size: u64,
}

impl ProcessMemory<PtraceTracer> {
    pub fn new(procfs: &ProcFs, pid: Pid, config: &MemoryConfig) -> Self {
        Self::with_tracer(procfs, pid, config, PtraceTracer)
    }
}

impl<T: Tracer> ProcessMemory<T> {
    pub fn with_tracer(procfs: &ProcFs, pid: Pid, config: &MemoryConfig, tracer: T) -> Self {
        Self {
            pid,
            mem_path: procfs.mem_path(pid),
            tracer,
            max_region_size: config.max_region_size,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Read the full address span of a mapped region.
    pub fn read_region(&self, vma: &VirtualMemoryArea) -> Result<RawMemoryBlock> {
        self.read_range(vma.start_address, vma.end_address)
    }

    /// Read `[start, end)`.
    pub fn read_range(&self, start: u64, end: u64) -> Result<RawMemoryBlock> {
        if end <= start {
            return Err(ProcImageError::InvalidRange { start, end });
        }
        let size = usize::try_from(end - start).map_err(|_| ProcImageError::ResourceExhausted {
            resource: "region buffer".to_string(),
            used: end - start,
            limit: self.max_region_size,
        })?;
        self.read(start, size)
    }

    /// Read exactly `size` bytes starting at `address`.
    pub fn read(&self, address: u64, size: usize) -> Result<RawMemoryBlock> {
        let end = address
            .checked_add(size as u64)
            .filter(|_| address != 0 && size != 0)
            .ok_or(ProcImageError::InvalidRange {
                start: address,
                end: address.wrapping_add(size as u64),
            })?;

        if size as u64 > self.max_region_size {
            return Err(ProcImageError::ResourceExhausted {
                resource: "region buffer".to_string(),
                used: size as u64,
                limit: self.max_region_size,
            });
        }

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| ProcImageError::ResourceExhausted {
                resource: "region buffer allocation".to_string(),
                used: size as u64,
                limit: self.max_region_size,
            })?;
        buffer.resize(size, 0);

        let mut file = File::open(&self.mem_path).map_err(|e| {
            ProcImageError::from_procfs_io(e, self.pid.as_raw(), &self.mem_path.to_string_lossy())
        })?;

        let read = {
            let _attached = AttachGuard::attach(&self.tracer, self.pid)?;
            file.seek(SeekFrom::Start(address))?;
            read_fully(&mut file, &mut buffer)?
        };

        if read < size {
            debug!(
                pid = self.pid.as_raw(),
                address,
                requested = size,
                read,
                "Short read from process memory"
            );
            return Err(ProcImageError::ShortRead {
                address,
                requested: size,
                read,
            });
        }

        trace!(
            pid = self.pid.as_raw(),
            start = address,
            end,
            "Read process memory"
        );
        Ok(RawMemoryBlock::new(address, Bytes::from(buffer)))
    }
}

/// Fill `buf` as far as the reader allows.
///
/// An error after some bytes arrived ends the read early; the caller sees it
/// as a short count. `EIO` on the first chunk (unmapped or non-resident page)
/// is a short read of zero bytes.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) if filled > 0 => break,
            Err(e) if e.raw_os_error() == Some(nix::errno::Errno::EIO as i32) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
