//! ELF header normalization
//!
//! Both classes decode into the same [`ElfHeader`]. The 32-bit and 64-bit
//! layouts agree up to `e_version`; `e_entry`, `e_phoff` and `e_shoff` change
//! width, and everything from `e_flags` on keeps its width but moves.

use crate::formats::elf::types::*;
use crate::formats::elf::utils::EndianRead;

/// Parse ELF identification bytes
pub fn parse_ident(data: &[u8]) -> Result<ElfIdent> {
    if data.len() < EI_NIDENT {
        return Err(ElfError::Truncated {
            offset: 0,
            needed: EI_NIDENT,
        });
    }

    // Check magic
    if &data[0..4] != ELF_MAGIC {
        return Err(ElfError::InvalidMagic);
    }

    let mut raw = [0u8; EI_NIDENT];
    raw.copy_from_slice(&data[..EI_NIDENT]);

    Ok(ElfIdent {
        raw,
        class: ElfClass::from_u8(data[4])?,
        data: ElfData::from_u8(data[5])?,
        version: data[6],
        osabi: data[7],
        abiversion: data[8],
    })
}

/// Decode the header at the start of `data` into the canonical 64-bit form.
pub fn normalize_header(data: &[u8]) -> Result<ElfHeader> {
    let ident = parse_ident(data)?;

    let header_size = ident.class.header_size();
    if data.len() < header_size {
        return Err(ElfError::Truncated {
            offset: 0,
            needed: header_size,
        });
    }

    let endian = ident.data;

    // Shared leading fields.
    let e_type = data.read_u16(16, endian)?;
    let e_machine = data.read_u16(18, endian)?;
    let e_version = data.read_u32(20, endian)?;

    // Width-changing fields.
    let (e_entry, e_phoff, e_shoff) = match ident.class {
        ElfClass::Elf32 => (
            u64::from(data.read_u32(24, endian)?),
            u64::from(data.read_u32(28, endian)?),
            u64::from(data.read_u32(32, endian)?),
        ),
        ElfClass::Elf64 => (
            data.read_u64(24, endian)?,
            data.read_u64(32, endian)?,
            data.read_u64(40, endian)?,
        ),
    };

    // Trailing fields, same widths in both classes.
    let base = match ident.class {
        ElfClass::Elf32 => 36,
        ElfClass::Elf64 => 48,
    };
    let header = ElfHeader {
        ident,
        e_type,
        e_machine,
        e_version,
        e_entry,
        e_phoff,
        e_shoff,
        e_flags: data.read_u32(base, endian)?,
        e_ehsize: data.read_u16(base + 4, endian)?,
        e_phentsize: data.read_u16(base + 6, endian)?,
        e_phnum: data.read_u16(base + 8, endian)?,
        e_shentsize: data.read_u16(base + 10, endian)?,
        e_shnum: data.read_u16(base + 12, endian)?,
        e_shstrndx: data.read_u16(base + 14, endian)?,
    };

    // Program headers are decoded with this stride, so it must match the class.
    let expected_phentsize = ident.class.program_header_size();
    if header.e_phnum > 0 && header.e_phentsize as usize != expected_phentsize {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_phentsize: expected {}, got {}",
            expected_phentsize, header.e_phentsize
        )));
    }

    Ok(header)
}
