//! Reconstruct the mapped executable of a running Linux process from its
//! live memory, without access to the on-disk binary.

/// Configuration tree
pub mod config;
/// Error types
pub mod error;
/// Binary format decoders
pub mod formats;
/// Image reconstruction
pub mod image;
/// Tracing setup
pub mod logging;
/// Process memory access
pub mod memory;
/// Procfs access and the region catalog
pub mod procfs;
/// Deadlines around blocking work
pub mod timeout;

pub use config::{ProcImageConfig, RegionPolicy};
pub use error::{ErrorKind, ProcImageError, Result};
pub use formats::elf::NormalizedElfImage;
pub use image::{ImageReconstructor, ReconstructedImage};
pub use memory::{PtraceTracer, Tracer};
pub use procfs::{ProcFs, RegionCatalog, VirtualMemoryArea};
