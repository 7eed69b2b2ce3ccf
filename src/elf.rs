// ELF header, program header table and section header table decoding.
//
// Fields are read one at a time at their on-disk width. Class and byte order
// live in the `FieldReader` of a single parse.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result};

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

const EI_NIDENT: usize = 16;
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;
const EI_OSABI: usize = 7;

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATANONE: u8 = 0;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_PHDR: u32 = 6;

pub const SHT_NOBITS: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            ELFCLASS32 => Ok(ElfClass::Elf32),
            ELFCLASS64 => Ok(ElfClass::Elf64),
            other => Err(Error::UnsupportedClass(other)),
        }
    }

    // Width in bytes of address-sized fields for this class.
    pub fn addr_width(self) -> usize {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }

    fn program_header_size(self) -> u16 {
        match self {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 56,
        }
    }

    fn section_header_size(self) -> u16 {
        match self {
            ElfClass::Elf32 => 40,
            ElfClass::Elf64 => 64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Little,
    Big,
}

impl Encoding {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            // Unset encoding: read as the PC's own byte order
            ELFDATANONE | ELFDATA2LSB => Ok(Encoding::Little),
            ELFDATA2MSB => Ok(Encoding::Big),
            other => Err(Error::UnsupportedEncoding(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElfIdentity {
    pub class: ElfClass,
    pub encoding: Encoding,
    pub version: u8,
    pub os_abi: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElfHeader {
    pub e_type: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub flags: u32,
    pub align: u64,
}

impl ProgramHeader {
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    // Zero bytes that follow the file-backed part in memory.
    pub fn padding(&self) -> u64 {
        self.memsz.saturating_sub(self.filesz)
    }

    pub fn type_name(&self) -> &'static str {
        match self.p_type {
            PT_NULL => "NULL",
            PT_LOAD => "LOAD",
            PT_DYNAMIC => "DYNAMIC",
            PT_INTERP => "INTERP",
            PT_NOTE => "NOTE",
            PT_PHDR => "PHDR",
            _ => "OTHER",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: u32,
    pub sh_type: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

impl SectionHeader {
    // A section is copied into the image only if it has a target address
    // and bytes in the file.
    pub fn is_loadable(&self) -> bool {
        self.addr != 0 && self.sh_type != SHT_NOBITS
    }
}

// Everything decoded from one ELF file, tables in file order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElfFile {
    pub identity: ElfIdentity,
    pub header: ElfHeader,
    pub program_headers: Vec<ProgramHeader>,
    pub section_headers: Vec<SectionHeader>,
}

struct FieldReader<'a, R> {
    inner: &'a mut R,
    class: ElfClass,
    encoding: Encoding,
    what: &'static str,
}

impl<'a, R: Read + Seek> FieldReader<'a, R> {
    fn seek(&mut self, offset: u64, what: &'static str) -> Result<()> {
        self.what = what;
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(Error::Read)?;
        Ok(())
    }

    fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let offset = self.inner.stream_position().map_err(Error::Read)?;
        let mut buf = [0u8; N];
        self.inner
            .read_exact(&mut buf)
            .map_err(|e| Error::from_read(e, self.what, offset))?;
        Ok(buf)
    }

    fn half(&mut self) -> Result<u16> {
        let b = self.bytes::<2>()?;
        Ok(match self.encoding {
            Encoding::Little => u16::from_le_bytes(b),
            Encoding::Big => u16::from_be_bytes(b),
        })
    }

    fn word(&mut self) -> Result<u32> {
        let b = self.bytes::<4>()?;
        Ok(match self.encoding {
            Encoding::Little => u32::from_le_bytes(b),
            Encoding::Big => u32::from_be_bytes(b),
        })
    }

    fn xword(&mut self) -> Result<u64> {
        let b = self.bytes::<8>()?;
        Ok(match self.encoding {
            Encoding::Little => u64::from_le_bytes(b),
            Encoding::Big => u64::from_be_bytes(b),
        })
    }

    // Address-sized: 4 bytes for ELF32, 8 for ELF64.
    fn addr(&mut self) -> Result<u64> {
        match self.class {
            ElfClass::Elf32 => self.word().map(u64::from),
            ElfClass::Elf64 => self.xword(),
        }
    }

    fn header(&mut self) -> Result<ElfHeader> {
        Ok(ElfHeader {
            e_type: self.half()?,
            machine: self.half()?,
            version: self.word()?,
            entry: self.addr()?,
            phoff: self.addr()?,
            shoff: self.addr()?,
            flags: self.word()?,
            ehsize: self.half()?,
            phentsize: self.half()?,
            phnum: self.half()?,
            shentsize: self.half()?,
            shnum: self.half()?,
            shstrndx: self.half()?,
        })
    }

    fn program_header(&mut self) -> Result<ProgramHeader> {
        match self.class {
            ElfClass::Elf32 => Ok(ProgramHeader {
                p_type: self.word()?,
                offset: self.addr()?,
                vaddr: self.addr()?,
                paddr: self.addr()?,
                filesz: self.addr()?,
                memsz: self.addr()?,
                flags: self.word()?,
                align: self.addr()?,
            }),
            // ELF64 moves p_flags up next to p_type.
            ElfClass::Elf64 => {
                let p_type = self.word()?;
                let flags = self.word()?;
                Ok(ProgramHeader {
                    p_type,
                    flags,
                    offset: self.addr()?,
                    vaddr: self.addr()?,
                    paddr: self.addr()?,
                    filesz: self.addr()?,
                    memsz: self.addr()?,
                    align: self.addr()?,
                })
            }
        }
    }

    fn section_header(&mut self) -> Result<SectionHeader> {
        Ok(SectionHeader {
            name: self.word()?,
            sh_type: self.word()?,
            flags: self.addr()?,
            addr: self.addr()?,
            offset: self.addr()?,
            size: self.addr()?,
            link: self.word()?,
            info: self.word()?,
            addralign: self.addr()?,
            entsize: self.addr()?,
        })
    }
}

fn read_identity<R: Read + Seek>(stream: &mut R) -> Result<ElfIdentity> {
    stream.seek(SeekFrom::Start(0)).map_err(Error::Read)?;

    let mut ident = Vec::with_capacity(EI_NIDENT);
    stream
        .by_ref()
        .take(EI_NIDENT as u64)
        .read_to_end(&mut ident)
        .map_err(Error::Read)?;

    // 1. The magic decides "is this ELF at all", even for a short file
    let mut magic = [0u8; 4];
    let n = ident.len().min(4);
    magic[..n].copy_from_slice(&ident[..n]);
    if n < 4 || magic != ELF_MAGIC {
        return Err(Error::NotElf { magic });
    }

    // 2. Past the magic, a short identity block is a truncated file
    if ident.len() < EI_NIDENT {
        return Err(Error::TruncatedRead {
            what: "ELF identity",
            offset: 0,
        });
    }

    Ok(ElfIdentity {
        class: ElfClass::from_byte(ident[EI_CLASS])?,
        encoding: Encoding::from_byte(ident[EI_DATA])?,
        version: ident[EI_VERSION],
        os_abi: ident[EI_OSABI],
    })
}

fn check_entry_size(what: &'static str, count: u16, size: u16, minimum: u16) -> Result<()> {
    if count > 0 && size < minimum {
        return Err(Error::BadEntrySize {
            what,
            size,
            minimum,
        });
    }
    Ok(())
}

// Entries sit at `table offset + index * entsize`, padding included.
pub fn decode<R: Read + Seek>(stream: &mut R) -> Result<ElfFile> {
    // 1. Identity: magic, class and byte order for everything after it
    let identity = read_identity(stream)?;

    let mut fields = FieldReader {
        inner: stream,
        class: identity.class,
        encoding: identity.encoding,
        what: "ELF header",
    };
    // 2. The file header, right after the identity
    let header = fields.header()?;

    // 3. Program header table
    check_entry_size(
        "program header",
        header.phnum,
        header.phentsize,
        identity.class.program_header_size(),
    )?;
    let mut program_headers = Vec::with_capacity(usize::from(header.phnum));
    for index in 0..u64::from(header.phnum) {
        let at = entry_offset("program header", header.phoff, index, header.phentsize)?;
        fields.seek(at, "program header")?;
        program_headers.push(fields.program_header()?);
    }

    // 4. Section header table, absent when e_shoff is 0
    let shnum = if header.shoff == 0 { 0 } else { header.shnum };
    check_entry_size(
        "section header",
        shnum,
        header.shentsize,
        identity.class.section_header_size(),
    )?;
    let mut section_headers = Vec::with_capacity(usize::from(shnum));
    for index in 0..u64::from(shnum) {
        let at = entry_offset("section header", header.shoff, index, header.shentsize)?;
        fields.seek(at, "section header")?;
        section_headers.push(fields.section_header()?);
    }

    log::debug!(
        "decoded {:?} {:?} ELF: entry {:#x}, {} program headers, {} section headers",
        identity.class,
        identity.encoding,
        header.entry,
        program_headers.len(),
        section_headers.len()
    );

    Ok(ElfFile {
        identity,
        header,
        program_headers,
        section_headers,
    })
}

// An entry whose offset overflows cannot be present in the file.
fn entry_offset(what: &'static str, table: u64, index: u64, entsize: u16) -> Result<u64> {
    index
        .checked_mul(u64::from(entsize))
        .and_then(|rel| table.checked_add(rel))
        .ok_or(Error::TruncatedRead {
            what,
            offset: table,
        })
}
