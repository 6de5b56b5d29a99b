//! Executable image reconstruction.
//!
//! Memory lays segments out at page-aligned virtual addresses while the file
//! packs them at arbitrary offsets. The reconstructor copies every selected
//! region of the executable to the position given by its file offset, which
//! undoes that divergence and yields bytes indexed like the on-disk binary.

pub mod reconstruct;
pub mod sink;

use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::formats::elf::NormalizedElfImage;
use crate::procfs::VirtualMemoryArea;

pub use reconstruct::{select_regions, ImageReconstructor};
pub use sink::{FileSink, OffsetSink, VecSink};

/// Result of one reconstruction attempt.
///
/// `data` is whatever the sink produced; the default in-memory form holds
/// the assembled bytes.
#[derive(Debug, Clone)]
pub struct ReconstructedImage<D = Bytes> {
    pub pid: i32,
    /// Resolved executable path, deleted marker removed.
    pub executable: PathBuf,
    /// The executable had been unlinked while still mapped.
    pub deleted: bool,
    pub elf: NormalizedElfImage,
    /// Regions written into the image, in catalog order.
    pub regions: Vec<VirtualMemoryArea>,
    /// High-water mark of the writes.
    pub len: u64,
    pub data: D,
}

impl<D> ReconstructedImage<D> {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ReconstructedImage<Bytes> {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// SHA-256 of the assembled bytes, lowercase hex.
    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        hex::encode(hasher.finalize())
    }

    /// Persist the image to `path`, replacing any existing file.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut sink = FileSink::new(file, self.len);
        sink.write_at(0, &self.data)?;
        sink.finish()?.sync_all()?;
        Ok(())
    }
}
