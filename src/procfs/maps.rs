//! Region catalog: `/proc/<pid>/maps` parsing.
//!
//! Each line follows a fixed grammar:
//!
//! ```text
//! <start_hex>-<end_hex> <r><w><x><s|p> <offset_hex> <major_hex>:<minor_hex> <inode_dec> [pathname]
//! ```
//!
//! Parsing is fail-fast: the first malformed line aborts the whole catalog.

use std::fmt;

use bitflags::bitflags;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ProcFs, DELETED_MARKER};
use crate::error::{ProcImageError, Result};

/// Inode value of anonymous mappings.
pub const UNKNOWN_INODE: u64 = 0;

bitflags! {
    /// Access rights of a mapped region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct VmaPerms: u8 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXEC = 0x4;
        const MAY_SHARE = 0x8;
    }
}

impl fmt::Display for VmaPerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::with_capacity(4);
        perms.push(if self.contains(VmaPerms::READ) { 'r' } else { '-' });
        perms.push(if self.contains(VmaPerms::WRITE) { 'w' } else { '-' });
        perms.push(if self.contains(VmaPerms::EXEC) { 'x' } else { '-' });
        perms.push(if self.contains(VmaPerms::MAY_SHARE) { 's' } else { 'p' });
        f.write_str(&perms)
    }
}

/// One mapped region of a process address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VirtualMemoryArea {
    pub start_address: u64,
    pub end_address: u64,
    pub permissions: VmaPerms,
    /// Offset into the backing file; 0 for anonymous regions.
    pub file_offset: u64,
    pub device_major: u32,
    pub device_minor: u32,
    /// [`UNKNOWN_INODE`] for anonymous regions.
    pub inode: u64,
    /// Empty for anonymous regions.
    pub pathname: String,
}

impl VirtualMemoryArea {
    /// Size of the region in bytes.
    pub fn len(&self) -> u64 {
        self.end_address - self.start_address
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start_address && address < self.end_address
    }

    pub fn is_anonymous(&self) -> bool {
        self.inode == UNKNOWN_INODE
    }

    /// `[stack]`, `[heap]`, `[vdso]` and friends.
    pub fn is_pseudo_path(&self) -> bool {
        self.pathname.starts_with('[') && self.pathname.ends_with(']')
    }

    pub fn is_deleted(&self) -> bool {
        self.pathname.len() > DELETED_MARKER.len() && self.pathname.ends_with(DELETED_MARKER)
    }

    /// Pathname with the deleted marker removed.
    pub fn backing_path(&self) -> &str {
        if self.is_deleted() {
            &self.pathname[..self.pathname.len() - DELETED_MARKER.len()]
        } else {
            &self.pathname
        }
    }

    /// `(major, minor)` of the backing device.
    pub fn device(&self) -> (u32, u32) {
        (self.device_major, self.device_minor)
    }

    /// Half-open file offset span this region mirrors.
    pub fn file_range(&self) -> std::ops::Range<u64> {
        self.file_offset..self.file_offset.saturating_add(self.len())
    }
}

impl fmt::Display for VirtualMemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}-{:x} {} {:08x} {:02x}:{:02x} {}",
            self.start_address,
            self.end_address,
            self.permissions,
            self.file_offset,
            self.device_major,
            self.device_minor,
            self.inode
        )?;
        if !self.pathname.is_empty() {
            write!(f, " {}", self.pathname)?;
        }
        Ok(())
    }
}

/// Ordered region sequence for one pid, in listing (ascending address) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionCatalog {
    regions: Vec<VirtualMemoryArea>,
}

impl RegionCatalog {
    pub fn new(regions: Vec<VirtualMemoryArea>) -> Self {
        Self { regions }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&VirtualMemoryArea> {
        self.regions.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VirtualMemoryArea> {
        self.regions.iter()
    }

    pub fn as_slice(&self) -> &[VirtualMemoryArea] {
        &self.regions
    }

    pub fn into_vec(self) -> Vec<VirtualMemoryArea> {
        self.regions
    }

    /// First region whose backing path equals `path`.
    pub fn find_by_path(&self, path: &str) -> Option<&VirtualMemoryArea> {
        self.regions.iter().find(|vma| vma.backing_path() == path)
    }

    /// Ordered subsequence of regions backed by `inode`.
    pub fn regions_with_inode(&self, inode: u64) -> Vec<VirtualMemoryArea> {
        self.regions
            .iter()
            .filter(|vma| vma.inode == inode)
            .cloned()
            .collect()
    }

    /// Ordered subsequence of regions backed by `inode` on `device`.
    ///
    /// Inode numbers repeat across filesystems; the device pins the file.
    pub fn regions_with_file(&self, device: (u32, u32), inode: u64) -> Vec<VirtualMemoryArea> {
        self.regions
            .iter()
            .filter(|vma| vma.inode == inode && vma.device() == device)
            .cloned()
            .collect()
    }
}

impl<'a> IntoIterator for &'a RegionCatalog {
    type Item = &'a VirtualMemoryArea;
    type IntoIter = std::slice::Iter<'a, VirtualMemoryArea>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

/// Byte cursor over one maps line.
struct LineCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LineCursor<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            bytes: line.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn number(&mut self, radix: u32, field: &str) -> std::result::Result<u64, String> {
        let start = self.pos;
        let mut value: u64 = 0;
        while let Some(digit) = self.peek().and_then(|b| (b as char).to_digit(radix)) {
            value = value
                .checked_mul(radix as u64)
                .and_then(|v| v.checked_add(digit as u64))
                .ok_or_else(|| format!("{field} overflows"))?;
            self.pos += 1;
        }
        if self.pos == start {
            return Err(format!("{field} has no digits"));
        }
        Ok(value)
    }

    fn expect(&mut self, separator: u8, after: &str) -> std::result::Result<(), String> {
        match self.peek() {
            Some(b) if b == separator => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(format!(
                "expected {:?} after {after}, found {:?}",
                separator as char, b as char
            )),
            None => Err(format!("line ends after {after}")),
        }
    }

    fn permissions(&mut self) -> std::result::Result<VmaPerms, String> {
        let field = self
            .bytes
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| "permission field shorter than 4 characters".to_string())?;

        let mut perms = VmaPerms::empty();
        for (i, (&got, (set, flag))) in field
            .iter()
            .zip([
                (b'r', VmaPerms::READ),
                (b'w', VmaPerms::WRITE),
                (b'x', VmaPerms::EXEC),
            ])
            .enumerate()
        {
            if got == set {
                perms |= flag;
            } else if got != b'-' {
                return Err(format!("bad permission character {:?} at {i}", got as char));
            }
        }
        match field[3] {
            b's' => perms |= VmaPerms::MAY_SHARE,
            b'p' => {}
            other => return Err(format!("bad sharing flag {:?}", other as char)),
        }

        self.pos += 4;
        Ok(perms)
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

fn decode_line(line: &str) -> std::result::Result<VirtualMemoryArea, String> {
    let mut cur = LineCursor::new(line);

    let start_address = cur.number(16, "start address")?;
    cur.expect(b'-', "start address")?;
    let end_address = cur.number(16, "end address")?;
    cur.expect(b' ', "end address")?;
    if start_address >= end_address {
        return Err(format!(
            "empty or inverted range {start_address:#x}-{end_address:#x}"
        ));
    }

    let permissions = cur.permissions()?;
    cur.expect(b' ', "permissions")?;

    let file_offset = cur.number(16, "file offset")?;
    cur.expect(b' ', "file offset")?;

    let device_major = cur.number(16, "device major")?;
    cur.expect(b':', "device major")?;
    let device_minor = cur.number(16, "device minor")?;
    cur.expect(b' ', "device minor")?;
    let device_major = u32::try_from(device_major).map_err(|_| "device major overflows")?;
    let device_minor = u32::try_from(device_minor).map_err(|_| "device minor overflows")?;

    let inode = cur.number(10, "inode")?;
    let pathname = if cur.peek().is_none() {
        String::new()
    } else {
        cur.expect(b' ', "inode")?;
        cur.skip_spaces();
        let rest = cur.rest();
        let rest = rest.strip_suffix(b"\n").unwrap_or(rest);
        String::from_utf8_lossy(rest).into_owned()
    };

    Ok(VirtualMemoryArea {
        start_address,
        end_address,
        permissions,
        file_offset,
        device_major,
        device_minor,
        inode,
        pathname,
    })
}

/// Decode one maps line. `line_no` is 1-based and only used for reporting.
pub fn parse_maps_line(line: &str, line_no: usize) -> Result<VirtualMemoryArea> {
    decode_line(line).map_err(|reason| ProcImageError::MalformedMaps {
        line: line_no,
        reason,
    })
}

/// Decode a whole maps listing.
pub fn parse_maps(content: &str) -> Result<RegionCatalog> {
    let mut regions = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let vma = parse_maps_line(line, idx + 1).map_err(|e| {
            warn!(line = idx + 1, error = %e, "Rejecting maps listing");
            e
        })?;
        regions.push(vma);
    }
    Ok(RegionCatalog::new(regions))
}

impl ProcFs {
    /// Read and decode `/proc/<pid>/maps`.
    pub fn read_maps(&self, pid: Pid) -> Result<RegionCatalog> {
        let path = self.maps_path(pid);
        let raw = std::fs::read(&path).map_err(|e| {
            ProcImageError::from_procfs_io(e, pid.as_raw(), &path.to_string_lossy())
        })?;
        let catalog = parse_maps(&String::from_utf8_lossy(&raw))?;
        debug!(pid = pid.as_raw(), regions = catalog.len(), "Parsed region catalog");
        Ok(catalog)
    }
}
