//! Synthetic `/proc` trees.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use procimage::ProcImageConfig;
use tempfile::TempDir;

pub const DEV: &str = "08:01";

/// A procfs root in a temporary directory.
pub struct FakeProc {
    dir: TempDir,
}

impl FakeProc {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Default configuration pointed at this tree.
    pub fn config(&self) -> ProcImageConfig {
        let mut config = ProcImageConfig::default();
        config.procfs.root = self.root().to_path_buf();
        config
    }

    pub fn process(&self, pid: i32) -> FakeProcess {
        let dir = self.root().join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        FakeProcess {
            dir,
            maps: Vec::new(),
            memory: Vec::new(),
        }
    }
}

/// One `/proc/<pid>` directory under construction.
pub struct FakeProcess {
    dir: PathBuf,
    maps: Vec<String>,
    memory: Vec<(u64, Vec<u8>)>,
}

impl FakeProcess {
    /// Map `bytes` at `start` as a file-backed region.
    pub fn map_file(
        &mut self,
        start: u64,
        perms: &str,
        offset: u64,
        inode: u64,
        path: &str,
        bytes: &[u8],
    ) -> &mut Self {
        let end = start + bytes.len() as u64;
        self.maps.push(format!(
            "{:x}-{:x} {} {:08x} {} {:<26}{}",
            start,
            end,
            perms,
            offset,
            DEV,
            inode,
            path
        ));
        self.memory.push((start, bytes.to_vec()));
        self
    }

    /// Anonymous region; `label` may be empty or a pseudo-path like `[heap]`.
    pub fn map_anon(&mut self, start: u64, len: u64, label: &str) -> &mut Self {
        let line = format!("{:x}-{:x} rw-p 00000000 00:00 0", start, start + len);
        if label.is_empty() {
            self.maps.push(line);
        } else {
            self.maps.push(format!("{}                          {}", line, label));
        }
        self
    }

    /// Raw maps line, taken as-is.
    pub fn raw_maps_line(&mut self, line: &str) -> &mut Self {
        self.maps.push(line.to_string());
        self
    }

    /// Overwrite part of the memory image.
    pub fn poke(&mut self, address: u64, bytes: &[u8]) -> &mut Self {
        self.memory.push((address, bytes.to_vec()));
        self
    }

    pub fn exe(&mut self, target: &str) -> &mut Self {
        let link = self.dir.join("exe");
        let _ = fs::remove_file(&link);
        symlink(target, link).unwrap();
        self
    }

    pub fn cmdline(&mut self, args: &[&str]) -> &mut Self {
        let mut raw = Vec::new();
        for arg in args {
            raw.extend_from_slice(arg.as_bytes());
            raw.push(0);
        }
        fs::write(self.dir.join("cmdline"), raw).unwrap();
        self
    }

    pub fn stat(&mut self, pid: i32, comm: &str, state: char) -> &mut Self {
        let line = format!(
            "{pid} ({comm}) {state} 1 {pid} {pid} 0 -1 4194304 120 0 0 0 3 1 0 0 20 0 1 0 98765 \
             12345678 300 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0\n"
        );
        fs::write(self.dir.join("stat"), line).unwrap();
        self
    }

    /// Write `maps` and a sparse `mem` file holding every mapped byte.
    ///
    /// `truncate_mem_at` cuts the memory file short to simulate a region
    /// that vanished between listing and reading.
    pub fn commit_with(&mut self, truncate_mem_at: Option<u64>) {
        let mut maps = self.maps.join("\n");
        maps.push('\n');
        fs::write(self.dir.join("maps"), maps).unwrap();

        let mut mem = File::create(self.dir.join("mem")).unwrap();
        let high = self
            .memory
            .iter()
            .map(|(start, bytes)| start + bytes.len() as u64)
            .max()
            .unwrap_or(0);
        mem.set_len(high).unwrap();
        for (start, bytes) in &self.memory {
            mem.seek(SeekFrom::Start(*start)).unwrap();
            mem.write_all(bytes).unwrap();
        }
        if let Some(len) = truncate_mem_at {
            mem.set_len(len).unwrap();
        }
    }

    pub fn commit(&mut self) {
        self.commit_with(None)
    }
}
