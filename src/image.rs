// Lays segment and section content into the flat output image.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::elf::{ProgramHeader, SectionHeader};
use crate::error::{Error, Result};
use crate::loader::ContentBuffer;

pub struct ImageWriter<W> {
    out: W,
    // One past the highest byte written so far
    extent: u64,
}

impl<W: Write + Seek> ImageWriter<W> {
    pub fn new(out: W) -> Self {
        ImageWriter { out, extent: 0 }
    }

    pub fn extent(&self) -> u64 {
        self.extent
    }

    fn position(addr: u64, base: u64) -> Result<u64> {
        addr.checked_add(base)
            .ok_or(Error::AddressOverflow { addr, base })
    }

    fn write_at(&mut self, at: u64, bytes: &[u8]) -> Result<()> {
        self.out
            .seek(SeekFrom::Start(at))
            .map_err(Error::ImageWrite)?;
        self.out.write_all(bytes).map_err(Error::ImageWrite)?;
        self.extent = self.extent.max(at + bytes.len() as u64);
        Ok(())
    }

    // Zeros at the current position, right after the last write.
    fn write_zeros(&mut self, count: u64) -> Result<()> {
        let written = io::copy(&mut io::repeat(0).take(count), &mut self.out)
            .map_err(Error::ImageWrite)?;
        let end = self.out.stream_position().map_err(Error::ImageWrite)?;
        debug_assert_eq!(written, count);
        self.extent = self.extent.max(end);
        Ok(())
    }

    // Writes a segment's file bytes at `vaddr + base`, followed by
    // `memsz - filesz` zero bytes.
    pub fn write_segment(
        &mut self,
        index: usize,
        entry: &ProgramHeader,
        content: ContentBuffer,
        base: u64,
    ) -> Result<()> {
        if entry.memsz < entry.filesz {
            return Err(Error::BadSegmentSize {
                index,
                filesz: entry.filesz,
                memsz: entry.memsz,
            });
        }
        let at = Self::position(entry.vaddr, base)?;
        let end = at
            .checked_add(entry.memsz)
            .ok_or(Error::AddressOverflow {
                addr: entry.vaddr,
                base,
            })?;

        // 1. The file-backed part
        self.write_at(at, content.as_slice())?;

        // 2. The zero-initialized tail (.bss and friends)
        let padding = entry.padding();
        if padding > 0 {
            self.write_zeros(padding)?;
        }

        log::debug!(
            "segment {}: {:#x} bytes at {:#x}, {:#x} bytes of padding, ends at {:#x}",
            index,
            content.len(),
            at,
            padding,
            end
        );
        Ok(())
    }

    // Writes a section's bytes at `addr + base`. Sections without a target
    // address or without file bytes are skipped; returns whether anything
    // was written.
    pub fn write_section(
        &mut self,
        index: usize,
        entry: &SectionHeader,
        content: ContentBuffer,
        base: u64,
    ) -> Result<bool> {
        if !entry.is_loadable() {
            log::debug!("section {}: not loadable, skipped", index);
            return Ok(false);
        }
        let at = Self::position(entry.addr, base)?;
        self.write_at(at, content.as_slice())?;
        log::debug!("section {}: {:#x} bytes at {:#x}", index, content.len(), at);
        Ok(true)
    }

    // Reserved fields go in last: taking `self` means nothing can follow them
    pub(crate) fn seal(mut self, fields: &[(u64, &[u8])]) -> Result<W> {
        for &(at, bytes) in fields {
            self.write_at(at, bytes)?;
        }
        self.out.flush().map_err(Error::ImageWrite)?;
        Ok(self.out)
    }
}
