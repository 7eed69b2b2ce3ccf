// In-memory ELF files for the unit tests.

use std::io::{self, Cursor, Seek, SeekFrom, Write};

use crate::elf::{PT_LOAD, SHT_NOBITS};

const SHT_PROGBITS: u32 = 1;

pub struct Segment {
    pub p_type: u32,
    pub vaddr: u64,
    pub data: Vec<u8>,
    pub memsz: u64,
}

impl Segment {
    pub fn load(vaddr: u64, data: Vec<u8>, memsz: u64) -> Self {
        Segment {
            p_type: PT_LOAD,
            vaddr,
            data,
            memsz,
        }
    }

    pub fn other(p_type: u32, vaddr: u64, data: Vec<u8>) -> Self {
        let memsz = data.len() as u64;
        Segment {
            p_type,
            vaddr,
            data,
            memsz,
        }
    }
}

struct Section {
    sh_type: u32,
    addr: u64,
    data: Vec<u8>,
    size: u64,
}

pub struct ElfBuilder {
    wide: bool,
    big: bool,
    entry: u64,
    phentsize: Option<u16>,
    segments: Vec<Segment>,
    sections: Vec<Section>,
}

impl ElfBuilder {
    pub fn elf32() -> Self {
        ElfBuilder {
            wide: false,
            big: false,
            entry: 0,
            phentsize: None,
            segments: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn elf64() -> Self {
        ElfBuilder {
            wide: true,
            ..ElfBuilder::elf32()
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.big = true;
        self
    }

    pub fn entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    pub fn phentsize(mut self, size: u16) -> Self {
        self.phentsize = Some(size);
        self
    }

    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn section(mut self, addr: u64, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        self.sections.push(Section {
            sh_type: SHT_PROGBITS,
            addr,
            data,
            size,
        });
        self
    }

    pub fn nobits_section(mut self, addr: u64, size: u64) -> Self {
        self.sections.push(Section {
            sh_type: SHT_NOBITS,
            addr,
            data: Vec::new(),
            size,
        });
        self
    }

    fn ehsize(&self) -> u16 {
        if self.wide {
            64
        } else {
            52
        }
    }

    fn entry_sizes(&self) -> (u16, u16) {
        let natural = if self.wide { 56 } else { 32 };
        let shentsize = if self.wide { 64 } else { 40 };
        (self.phentsize.unwrap_or(natural), shentsize)
    }

    // Header and program header table only; segment offsets point past the end.
    pub fn build_headers_only(&self) -> Vec<u8> {
        let (phentsize, _) = self.entry_sizes();
        let phoff = u64::from(self.ehsize());
        let data_start = phoff + u64::from(phentsize) * self.segments.len() as u64;

        let mut out = Out::new(self.wide, self.big);
        self.write_header(&mut out, phoff, 0, 0);
        let mut offset = data_start;
        for segment in &self.segments {
            self.write_program_header(&mut out, segment, offset, phentsize);
            offset += segment.data.len() as u64;
        }
        out.bytes
    }

    pub fn build(&self) -> Vec<u8> {
        let (phentsize, shentsize) = self.entry_sizes();
        let phoff = u64::from(self.ehsize());
        let mut data_at = phoff + u64::from(phentsize) * self.segments.len() as u64;

        let mut segment_offsets = Vec::new();
        for segment in &self.segments {
            segment_offsets.push(data_at);
            data_at += segment.data.len() as u64;
        }
        let mut section_offsets = Vec::new();
        for section in &self.sections {
            section_offsets.push(data_at);
            data_at += section.data.len() as u64;
        }
        let shoff = data_at;
        let shnum = if self.sections.is_empty() {
            0
        } else {
            self.sections.len() as u16 + 1
        };

        let mut out = Out::new(self.wide, self.big);
        self.write_header(&mut out, phoff, if shnum == 0 { 0 } else { shoff }, shnum);
        for (segment, &offset) in self.segments.iter().zip(&segment_offsets) {
            self.write_program_header(&mut out, segment, offset, phentsize);
        }
        for segment in &self.segments {
            out.bytes.extend_from_slice(&segment.data);
        }
        for section in &self.sections {
            out.bytes.extend_from_slice(&section.data);
        }
        if shnum > 0 {
            out.section_header(0, 0, 0, 0);
            for (section, &offset) in self.sections.iter().zip(&section_offsets) {
                out.section_header(section.sh_type, section.addr, offset, section.size);
            }
            debug_assert_eq!(
                out.bytes.len() as u64,
                shoff + u64::from(shentsize) * u64::from(shnum)
            );
        }
        out.bytes
    }

    fn write_header(&self, out: &mut Out, phoff: u64, shoff: u64, shnum: u16) {
        let (phentsize, shentsize) = self.entry_sizes();
        out.bytes.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
        out.bytes.push(if self.wide { 2 } else { 1 });
        out.bytes.push(if self.big { 2 } else { 1 });
        out.bytes.push(1);
        out.bytes.extend_from_slice(&[0; 9]);
        out.half(2); // ET_EXEC
        out.half(3); // EM_386
        out.word(1);
        out.addr(self.entry);
        out.addr(phoff);
        out.addr(shoff);
        out.word(0);
        out.half(self.ehsize());
        out.half(phentsize);
        out.half(self.segments.len() as u16);
        out.half(shentsize);
        out.half(shnum);
        out.half(0);
    }

    fn write_program_header(&self, out: &mut Out, segment: &Segment, offset: u64, stride: u16) {
        let start = out.bytes.len();
        let filesz = segment.data.len() as u64;
        if self.wide {
            out.word(segment.p_type);
            out.word(0x5);
            out.addr(offset);
            out.addr(segment.vaddr);
            out.addr(segment.vaddr);
            out.addr(filesz);
            out.addr(segment.memsz);
            out.addr(0x1000);
        } else {
            out.word(segment.p_type);
            out.addr(offset);
            out.addr(segment.vaddr);
            out.addr(segment.vaddr);
            out.addr(filesz);
            out.addr(segment.memsz);
            out.word(0x5);
            out.addr(0x1000);
        }
        out.bytes.resize(start + usize::from(stride), 0);
    }
}

struct Out {
    wide: bool,
    big: bool,
    bytes: Vec<u8>,
}

impl Out {
    fn new(wide: bool, big: bool) -> Self {
        Out {
            wide,
            big,
            bytes: Vec::new(),
        }
    }

    fn half(&mut self, v: u16) {
        let b = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
        self.bytes.extend_from_slice(&b);
    }

    fn word(&mut self, v: u32) {
        let b = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
        self.bytes.extend_from_slice(&b);
    }

    fn addr(&mut self, v: u64) {
        if self.wide {
            let b = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
            self.bytes.extend_from_slice(&b);
        } else {
            self.word(v as u32);
        }
    }

    fn section_header(&mut self, sh_type: u32, addr: u64, offset: u64, size: u64) {
        self.word(0);
        self.word(sh_type);
        self.addr(0x2); // SHF_ALLOC
        self.addr(addr);
        self.addr(offset);
        self.addr(size);
        self.word(0);
        self.word(0);
        self.addr(1);
        self.addr(0);
    }
}

// Output that refuses any write reaching past `limit` bytes, like a full disk.
#[derive(Debug)]
pub struct FailingWriter {
    inner: Cursor<Vec<u8>>,
    limit: u64,
}

impl FailingWriter {
    pub fn new(limit: u64) -> Self {
        FailingWriter {
            inner: Cursor::new(Vec::new()),
            limit,
        }
    }
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.inner.position() + buf.len() as u64 > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for FailingWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
