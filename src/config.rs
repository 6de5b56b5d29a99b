//! Configuration for process image reconstruction.
//!
//! All knobs live in one serde-backed tree so a run can be described by a
//! JSON document. Defaults reproduce the behaviour expected against the real
//! `/proc` filesystem; tests point `procfs.root` at a synthetic tree.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProcImageError, Result};

/// Default root of the process pseudo-filesystem.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// `PATH_MAX` on Linux, including the terminating NUL.
pub const DEFAULT_MAX_PATH_LEN: usize = 4096;

/// Master configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcImageConfig {
    /// Where and how procfs is read.
    pub procfs: ProcfsConfig,
    /// Limits for raw memory reads.
    pub memory: MemoryConfig,
    /// Image reconstruction policy and limits.
    pub reconstruct: ReconstructConfig,
}

impl ProcImageConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ProcImageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ProcImageError::Config(e.to_string()))
    }

    /// Reject limits that would make every operation fail.
    pub fn validate(&self) -> Result<()> {
        if self.procfs.max_path_len < 2 {
            return Err(ProcImageError::Config(
                "procfs.max_path_len must leave room for at least one byte and a terminator"
                    .to_string(),
            ));
        }
        if self.memory.max_region_size == 0 {
            return Err(ProcImageError::Config(
                "memory.max_region_size must be non-zero".to_string(),
            ));
        }
        if self.reconstruct.max_image_size == 0 {
            return Err(ProcImageError::Config(
                "reconstruct.max_image_size must be non-zero".to_string(),
            ));
        }
        if self.reconstruct.timeout_seconds == 0 {
            return Err(ProcImageError::Config(
                "reconstruct.timeout_seconds must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Procfs access configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcfsConfig {
    /// Root of the process pseudo-filesystem (default: `/proc`).
    pub root: PathBuf,
    /// Capacity for a resolved executable path, terminator included (default: 4096).
    pub max_path_len: usize,
}

impl Default for ProcfsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_PROC_ROOT),
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }
}

/// Raw memory access configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Largest single read accepted (default: 1 GiB).
    pub max_region_size: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_region_size: 1 << 30,
        }
    }
}

/// Which of the executable's regions are copied into the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionPolicy {
    /// Every region backed by the executable's inode, PT_LOAD coverage or not.
    #[default]
    AllInodeRegions,
    /// Only regions whose file span intersects a PT_LOAD file range.
    LoadCovered,
}

/// Reconstruction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructConfig {
    /// Upper bound for the assembled image (default: 2 GiB).
    pub max_image_size: u64,
    /// Region selection policy (default: all regions sharing the inode).
    pub region_policy: RegionPolicy,
    /// Deadline for a whole attempt when run through the timeout wrapper (default: 300s).
    pub timeout_seconds: u64,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            max_image_size: 2 << 30,
            region_policy: RegionPolicy::AllInodeRegions,
            timeout_seconds: crate::timeout::DEFAULT_TIMEOUT_SECONDS,
        }
    }
}
