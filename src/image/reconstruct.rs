//! The reconstruction pipeline.

use nix::unistd::Pid;
use tracing::{debug, info, trace};

use crate::config::{ProcImageConfig, RegionPolicy};
use crate::error::{ProcImageError, Result};
use crate::formats::elf::{NormalizedElfImage, RegionView};
use crate::image::sink::{OffsetSink, VecSink};
use crate::image::ReconstructedImage;
use crate::memory::{ProcessMemory, PtraceTracer, RawMemoryBlock, Tracer};
use crate::procfs::{ProcFs, VirtualMemoryArea, UNKNOWN_INODE};
use crate::{log_error, span_trace};

/// Rebuilds the mapped executable of a process from its live memory.
///
/// Holds no per-target state, so one reconstructor can serve any number of
/// sequential attempts.
#[derive(Debug, Clone)]
pub struct ImageReconstructor<T: Tracer = PtraceTracer> {
    config: ProcImageConfig,
    procfs: ProcFs,
    tracer: T,
}

impl ImageReconstructor<PtraceTracer> {
    pub fn new(config: ProcImageConfig) -> Self {
        Self::with_tracer(config, PtraceTracer)
    }
}

impl Default for ImageReconstructor<PtraceTracer> {
    fn default() -> Self {
        Self::new(ProcImageConfig::default())
    }
}

impl<T: Tracer> ImageReconstructor<T> {
    pub fn with_tracer(config: ProcImageConfig, tracer: T) -> Self {
        let procfs = ProcFs::new(&config.procfs);
        Self {
            config,
            procfs,
            tracer,
        }
    }

    pub fn config(&self) -> &ProcImageConfig {
        &self.config
    }

    pub fn procfs(&self) -> &ProcFs {
        &self.procfs
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Reconstruct into memory.
    pub fn reconstruct(&self, pid: Pid) -> Result<ReconstructedImage> {
        let sink = VecSink::new(self.config.reconstruct.max_image_size);
        self.reconstruct_into(pid, sink)
    }

    /// Reconstruct into an arbitrary offset-addressed sink.
    ///
    /// Any failure aborts the whole attempt and is reported against `pid`.
    /// Nothing reaches the sink before every region has been read and the
    /// ELF headers decoded.
    pub fn reconstruct_into<S: OffsetSink>(
        &self,
        pid: Pid,
        sink: S,
    ) -> Result<ReconstructedImage<S::Output>> {
        let span = span_trace!("reconstruct", pid = pid.as_raw());
        let _enter = span.enter();

        match self.run(pid, sink) {
            Ok(image) => {
                info!(
                    pid = pid.as_raw(),
                    executable = %image.executable.display(),
                    deleted = image.deleted,
                    regions = image.regions.len(),
                    bytes = image.len,
                    "Reconstructed executable image"
                );
                Ok(image)
            }
            Err(e) => Err(log_error!(e.for_pid(pid.as_raw()))),
        }
    }

    fn run<S: OffsetSink>(&self, pid: Pid, mut sink: S) -> Result<ReconstructedImage<S::Output>> {
        let catalog = self.procfs.read_maps(pid)?;
        let image_path = self.procfs.read_image_path(pid)?;
        let executable = image_path.path.to_string_lossy();

        let backing = catalog
            .find_by_path(&executable)
            .ok_or_else(|| ProcImageError::NotFound {
                pid: pid.as_raw(),
                what: format!("mapped region for {}", executable),
            })?;
        let (device, inode) = (backing.device(), backing.inode);
        if inode == UNKNOWN_INODE {
            return Err(ProcImageError::NotFound {
                pid: pid.as_raw(),
                what: format!("inode of {}", executable),
            });
        }

        let candidates = catalog.regions_with_file(device, inode);
        debug!(
            pid = pid.as_raw(),
            device_major = device.0,
            device_minor = device.1,
            inode,
            regions = candidates.len(),
            "Selected executable regions"
        );

        let memory =
            ProcessMemory::with_tracer(&self.procfs, pid, &self.config.memory, &self.tracer);
        let blocks = candidates
            .iter()
            .map(|vma| memory.read_region(vma))
            .collect::<Result<Vec<RawMemoryBlock>>>()?;

        let views: Vec<RegionView<'_>> = candidates
            .iter()
            .zip(&blocks)
            .map(|(vma, block)| RegionView::new(vma.file_offset, block.as_bytes()))
            .collect();
        let elf = NormalizedElfImage::parse(&views)?;
        if let Some(header) = elf.header() {
            debug!(
                pid = pid.as_raw(),
                bits = header.ident.class.bits(),
                entry = header.e_entry,
                phoff = header.e_phoff,
                phnum = header.e_phnum,
                "Decoded ELF header"
            );
        }

        let policy = self.config.reconstruct.region_policy;
        let selected: Vec<(&VirtualMemoryArea, &RawMemoryBlock)> = candidates
            .iter()
            .zip(&blocks)
            .filter(|(vma, _)| {
                let keep = region_selected(policy, &elf, vma);
                if !keep {
                    trace!(start = vma.start_address, offset = vma.file_offset, "Skipping region");
                }
                keep
            })
            .collect();

        // The whole image must fit before the first byte is placed.
        sink.reserve(image_len(&selected)?)?;

        let mut written = Vec::with_capacity(selected.len());
        for (vma, block) in selected {
            sink.write_at(vma.file_offset, block.as_bytes())?;
            written.push(vma.clone());
        }

        let len = sink.len();
        let data = sink.finish()?;
        Ok(ReconstructedImage {
            pid: pid.as_raw(),
            executable: image_path.path,
            deleted: image_path.deleted,
            elf,
            regions: written,
            len,
            data,
        })
    }
}

/// High-water mark of `file_offset + len` over the regions to be written.
fn image_len(selected: &[(&VirtualMemoryArea, &RawMemoryBlock)]) -> Result<u64> {
    selected.iter().try_fold(0u64, |high, (vma, block)| -> Result<u64> {
        let len = block.len() as u64;
        let end = vma
            .file_offset
            .checked_add(len)
            .ok_or(ProcImageError::InvalidRange {
                start: vma.file_offset,
                end: vma.file_offset.wrapping_add(len),
            })?;
        Ok(high.max(end))
    })
}

fn region_selected(policy: RegionPolicy, elf: &NormalizedElfImage, vma: &VirtualMemoryArea) -> bool {
    match policy {
        RegionPolicy::AllInodeRegions => true,
        RegionPolicy::LoadCovered => elf.covers_file_range(&vma.file_range()),
    }
}

/// Regions of `candidates` that `policy` would write, in order.
pub fn select_regions<'a>(
    policy: RegionPolicy,
    elf: &NormalizedElfImage,
    candidates: &'a [VirtualMemoryArea],
) -> Vec<&'a VirtualMemoryArea> {
    candidates
        .iter()
        .filter(|vma| region_selected(policy, elf, vma))
        .collect()
}
