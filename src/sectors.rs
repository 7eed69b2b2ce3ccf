use std::io::{Seek, Write};

use crate::elf::ProgramHeader;
use crate::error::{Error, Result};
use crate::image::ImageWriter;

pub const SECTOR_SIZE: u64 = 512;

// Where the bootblock expects the kernel size, in sectors.
pub const SECTOR_COUNT_OFFSET: u64 = 2;

pub const BOOT_SIGNATURE_OFFSET: u64 = 0x1FE;
pub const BOOT_SIGNATURE: [u8; 2] = [0xAA, 0x55];

// Sectors needed to hold the memory image of every program header.
pub fn count_kernel_sectors(program_headers: &[ProgramHeader]) -> u64 {
    let total = program_headers
        .iter()
        .fold(0u64, |acc, ph| acc.saturating_add(ph.memsz));
    total.div_ceil(SECTOR_SIZE)
}

// Writes the kernel sector count and the boot signature, the last writes
// the image ever receives.
pub fn record<W: Write + Seek>(
    image: ImageWriter<W>,
    sectors: u64,
    sector_count_offset: u64,
) -> Result<W> {
    let count = u8::try_from(sectors).map_err(|_| Error::TooManySectors(sectors))?;
    log::info!(
        "recording {} kernel sectors at {:#x}, boot signature at {:#x}",
        count,
        sector_count_offset,
        BOOT_SIGNATURE_OFFSET
    );
    let count = [count];
    let fields: [(u64, &[u8]); 2] = [
        (sector_count_offset, &count),
        (BOOT_SIGNATURE_OFFSET, &BOOT_SIGNATURE),
    ];
    image.seal(&fields)
}
