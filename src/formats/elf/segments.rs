//! Program header table decoding from memory regions

use crate::formats::elf::types::*;
use crate::formats::elf::utils::EndianRead;
use crate::formats::elf::RegionView;

/// Index of the region holding file offset `target`.
///
/// Regions are scanned in catalog order; the answer is the first region
/// whose successor starts beyond `target`, or the last region when no
/// successor does. Region boundaries decide, not `target` alone.
pub fn locate_region(regions: &[RegionView<'_>], target: u64) -> Option<usize> {
    if regions.is_empty() {
        return None;
    }
    let found = regions
        .windows(2)
        .position(|pair| pair[1].file_offset > target);
    Some(found.unwrap_or(regions.len() - 1))
}

/// Decode the program header table described by `header`.
pub fn parse_program_headers(
    regions: &[RegionView<'_>],
    header: &ElfHeader,
) -> Result<Vec<ProgramHeader>> {
    let count = header.e_phnum as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    let idx = locate_region(regions, header.e_phoff).ok_or(ElfError::NoRegions)?;
    let region = &regions[idx];
    let relative = header
        .e_phoff
        .checked_sub(region.file_offset)
        .and_then(|rel| usize::try_from(rel).ok())
        .ok_or(ElfError::ProgramHeadersOutOfRange {
            offset: header.e_phoff,
        })?;

    let stride = header.e_phentsize as usize;
    let mut headers = Vec::with_capacity(count);
    for i in 0..count {
        let offset = relative + i * stride;
        headers.push(parse_program_header(
            region.bytes,
            offset,
            header.ident.class,
            header.ident.data,
        )?);
    }
    Ok(headers)
}

/// Parse a single program header, field by field.
fn parse_program_header(
    data: &[u8],
    offset: usize,
    class: ElfClass,
    endian: ElfData,
) -> Result<ProgramHeader> {
    let size = class.program_header_size();
    if offset.checked_add(size).map_or(true, |end| end > data.len()) {
        return Err(ElfError::Truncated {
            offset,
            needed: size,
        });
    }

    match class {
        ElfClass::Elf32 => Ok(ProgramHeader {
            p_type: data.read_u32(offset, endian)?,
            p_offset: u64::from(data.read_u32(offset + 4, endian)?),
            p_vaddr: u64::from(data.read_u32(offset + 8, endian)?),
            p_paddr: u64::from(data.read_u32(offset + 12, endian)?),
            p_filesz: u64::from(data.read_u32(offset + 16, endian)?),
            p_memsz: u64::from(data.read_u32(offset + 20, endian)?),
            p_flags: data.read_u32(offset + 24, endian)?,
            p_align: u64::from(data.read_u32(offset + 28, endian)?),
        }),
        ElfClass::Elf64 => Ok(ProgramHeader {
            p_type: data.read_u32(offset, endian)?,
            p_flags: data.read_u32(offset + 4, endian)?,
            p_offset: data.read_u64(offset + 8, endian)?,
            p_vaddr: data.read_u64(offset + 16, endian)?,
            p_paddr: data.read_u64(offset + 24, endian)?,
            p_filesz: data.read_u64(offset + 32, endian)?,
            p_memsz: data.read_u64(offset + 40, endian)?,
            p_align: data.read_u64(offset + 48, endian)?,
        }),
    }
}
