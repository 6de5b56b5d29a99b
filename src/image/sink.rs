//! Offset-addressed output targets.
//!
//! Regions arrive in address order but land at their file offsets, so the
//! output is written randomly rather than appended. A sink's length is the
//! high-water mark of `offset + len` over every write; bytes never written
//! are whatever the sink fills gaps with.

use std::io::{Seek, SeekFrom, Write};

use bytes::Bytes;
use tracing::{trace, warn};

use crate::error::{ProcImageError, Result};

/// Random-access-by-offset byte target.
pub trait OffsetSink {
    type Output;

    /// Check that an image of `len` bytes fits, before anything is written.
    fn reserve(&mut self, len: u64) -> Result<()>;

    /// Place `bytes` at `offset`, overwriting anything already there.
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// High-water mark of all writes so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and hand back the assembled output.
    fn finish(self) -> Result<Self::Output>;
}

fn check_limit(end: u64, limit: u64) -> Result<()> {
    if end > limit {
        warn!(end, limit, "Image exceeds size limit");
        return Err(ProcImageError::ResourceExhausted {
            resource: "reconstructed image".to_string(),
            used: end,
            limit,
        });
    }
    Ok(())
}

/// End offset of a write, checked against `limit`.
fn checked_end(offset: u64, len: usize, limit: u64) -> Result<u64> {
    let end = offset
        .checked_add(len as u64)
        .ok_or(ProcImageError::InvalidRange {
            start: offset,
            end: offset.wrapping_add(len as u64),
        })?;
    check_limit(end, limit)?;
    Ok(end)
}

fn buffer_len(end: u64) -> Result<usize> {
    // the buffer is addressed by usize
    usize::try_from(end).map_err(|_| ProcImageError::ResourceExhausted {
        resource: "reconstructed image".to_string(),
        used: end,
        limit: usize::MAX as u64,
    })
}

/// In-memory sink; gaps are zero-filled.
#[derive(Debug, Clone)]
pub struct VecSink {
    buf: Vec<u8>,
    limit: u64,
}

impl VecSink {
    pub fn new(limit: u64) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    fn grow_capacity(&mut self, end: usize) -> Result<()> {
        if end > self.buf.len() {
            self.buf
                .try_reserve_exact(end - self.buf.len())
                .map_err(|_| ProcImageError::ResourceExhausted {
                    resource: "reconstructed image allocation".to_string(),
                    used: end as u64,
                    limit: self.limit,
                })?;
        }
        Ok(())
    }
}

impl OffsetSink for VecSink {
    type Output = Bytes;

    fn reserve(&mut self, len: u64) -> Result<()> {
        check_limit(len, self.limit)?;
        let end = buffer_len(len)?;
        self.grow_capacity(end)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let end = buffer_len(checked_end(offset, bytes.len(), self.limit)?)?;
        let start = end - bytes.len();

        if end > self.buf.len() {
            self.grow_capacity(end)?;
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(bytes);
        trace!(offset, len = bytes.len(), "Placed region bytes");
        Ok(())
    }

    fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    fn finish(self) -> Result<Bytes> {
        Ok(Bytes::from(self.buf))
    }
}

/// Sink over any seekable writer, e.g. a file. Gaps are left to the writer.
#[derive(Debug)]
pub struct FileSink<W: Write + Seek> {
    inner: W,
    high_water: u64,
    limit: u64,
}

impl<W: Write + Seek> FileSink<W> {
    pub fn new(inner: W, limit: u64) -> Self {
        Self {
            inner,
            high_water: 0,
            limit,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: Write + Seek> OffsetSink for FileSink<W> {
    type Output = W;

    fn reserve(&mut self, len: u64) -> Result<()> {
        check_limit(len, self.limit)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let end = checked_end(offset, bytes.len(), self.limit)?;
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(bytes)?;
        self.high_water = self.high_water.max(end);
        trace!(offset, len = bytes.len(), "Wrote region bytes");
        Ok(())
    }

    fn len(&self) -> u64 {
        self.high_water
    }

    fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
