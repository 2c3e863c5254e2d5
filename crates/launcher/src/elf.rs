//! ELF64 image parsing for the guest executable.
//!
//! Built on the `object` crate's `read::elf` module rather than a
//! hand-rolled header parser. `object` is used here purely as a
//! structured reader over the raw program headers -- this loader still
//! does its own segment mapping and auxv construction, since `object`
//! has no opinion about process layout.

use object::Endianness;
use object::read::elf::{ElfFile64, FileHeader, ProgramHeader};

use thiserror::Error;

const EM_AARCH64: u16 = 183;
const PT_LOAD: u32 = 1;
const PT_PHDR: u32 = 6;
const PT_INTERP: u32 = 3;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("not a valid ELF image: {0}")]
    Malformed(String),
    /// Not a 64-bit LE ELF for the expected guest architecture.
    #[error("wrong host")]
    WrongArchitecture,
    #[error("guest image has no PT_LOAD segments")]
    Empty,
    #[error("guest image requires a dynamic interpreter, which this launcher does not support")]
    RequiresInterpreter,
}

#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

/// A parsed, not-yet-mapped guest executable image.
pub struct Image<'data> {
    pub data: &'data [u8],
    pub entry: u64,
    pub phdr_vaddr: u64,
    pub phent: u16,
    pub phnum: u16,
    pub segments: Vec<Segment>,
}

impl<'data> Image<'data> {
    pub fn parse(data: &'data [u8]) -> Result<Self, ElfError> {
        let elf = ElfFile64::<Endianness>::parse(data).map_err(|e| ElfError::Malformed(e.to_string()))?;
        let endian = elf.endian();
        let header = elf.elf_header();

        if header.e_machine(endian) != EM_AARCH64 {
            return Err(ElfError::WrongArchitecture);
        }

        let mut segments = Vec::new();
        let mut phdr_vaddr = 0u64;

        for phdr in elf.elf_program_headers() {
            let p_type = phdr.p_type(endian);
            if p_type == PT_INTERP {
                return Err(ElfError::RequiresInterpreter);
            }
            if p_type == PT_PHDR {
                phdr_vaddr = phdr.p_vaddr(endian);
            }
            if p_type == PT_LOAD {
                let flags = phdr.p_flags(endian);
                segments.push(Segment {
                    vaddr: phdr.p_vaddr(endian),
                    offset: phdr.p_offset(endian),
                    filesz: phdr.p_filesz(endian),
                    memsz: phdr.p_memsz(endian),
                    readable: flags & 0x4 != 0,
                    writable: flags & 0x2 != 0,
                    executable: flags & 0x1 != 0,
                });
            }
        }

        if segments.is_empty() {
            return Err(ElfError::Empty);
        }

        Ok(Self {
            data,
            entry: header.e_entry(endian),
            phdr_vaddr,
            phent: header.e_phentsize(endian),
            phnum: header.e_phnum(endian),
            segments,
        })
    }

    pub fn load_bias(&self) -> u64 {
        self.segments.iter().map(|s| s.vaddr).min().unwrap_or(0)
    }

    pub fn load_extent(&self) -> u64 {
        self.segments.iter().map(|s| s.vaddr + s.memsz).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_truncated_garbage() {
        assert!(matches!(Image::parse(&[0u8; 4]), Err(ElfError::Malformed(_))));
    }
}
