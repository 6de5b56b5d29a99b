//! ELF header and program header normalization
//!
//! Decodes the ELF header found at the start of an executable's first mapped
//! region and the program header table wherever it landed, producing one
//! canonical 64-bit representation for both ELF classes. Every field is read
//! explicitly with its declared width and byte order; buffers are never
//! reinterpreted as structs.

pub mod headers;
pub mod segments;
pub mod types;
pub mod utils;

use std::ops::Range;

use headers::normalize_header;
pub use segments::locate_region;
pub use types::*;

/// Bytes of one mapped region together with the file offset they mirror.
#[derive(Debug, Clone, Copy)]
pub struct RegionView<'a> {
    pub file_offset: u64,
    pub bytes: &'a [u8],
}

impl<'a> RegionView<'a> {
    pub fn new(file_offset: u64, bytes: &'a [u8]) -> Self {
        Self { file_offset, bytes }
    }
}

/// Canonical decoded header state for one target executable.
///
/// Program headers are only decoded after the header; asking for them first
/// parses the header on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedElfImage {
    header: Option<ElfHeader>,
    program_headers: Vec<ProgramHeader>,
}

impl NormalizedElfImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode header and program headers from `regions` in one go.
    pub fn parse(regions: &[RegionView<'_>]) -> Result<Self> {
        let mut image = Self::new();
        image.parse_program_headers(regions)?;
        Ok(image)
    }

    /// Decode the header from the first region.
    pub fn parse_header(&mut self, regions: &[RegionView<'_>]) -> Result<&ElfHeader> {
        let first = regions.first().ok_or(ElfError::NoRegions)?;
        let header = normalize_header(first.bytes)?;
        self.program_headers.clear();
        Ok(self.header.insert(header))
    }

    /// Decode the program header table, parsing the header first if needed.
    pub fn parse_program_headers(&mut self, regions: &[RegionView<'_>]) -> Result<&[ProgramHeader]> {
        let header = match self.header {
            Some(header) => header,
            None => *self.parse_header(regions)?,
        };
        self.program_headers = segments::parse_program_headers(regions, &header)?;
        Ok(&self.program_headers)
    }

    pub fn header(&self) -> Option<&ElfHeader> {
        self.header.as_ref()
    }

    pub fn class(&self) -> Option<ElfClass> {
        self.header.map(|h| h.ident.class)
    }

    pub fn is_32bit(&self) -> bool {
        self.header.is_some_and(|h| h.is_32bit())
    }

    pub fn program_headers(&self) -> &[ProgramHeader] {
        &self.program_headers
    }

    pub fn load_segments(&self) -> impl Iterator<Item = &ProgramHeader> {
        self.program_headers.iter().filter(|ph| ph.is_load())
    }

    /// File ranges of all `PT_LOAD` segments with a non-empty file image.
    pub fn load_file_ranges(&self) -> Vec<Range<u64>> {
        self.load_segments()
            .filter(|ph| ph.p_filesz > 0)
            .map(|ph| ph.file_range())
            .collect()
    }

    /// Does `range` intersect the file image of any `PT_LOAD` segment.
    pub fn covers_file_range(&self, range: &Range<u64>) -> bool {
        self.load_file_ranges()
            .iter()
            .any(|load| load.start < range.end && range.start < load.end)
    }
}
