// Drives bootblock and kernel through decode, load and write, then records
// the kernel size. Strictly sequential: the bootblock is finished before the
// kernel is opened for decoding, and the reserved fields go in last.

use std::fmt;
use std::io::{Read, Seek, Write};

use crate::elf::{decode, ElfFile};
use crate::error::{Error, Result};
use crate::image::ImageWriter;
use crate::loader::{load_section, load_segment};
use crate::sectors::{self, BOOT_SIGNATURE_OFFSET, SECTOR_COUNT_OFFSET, SECTOR_SIZE};

// Where each region of the image starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub bootblock_base: u64,
    pub kernel_base: u64,
    pub sector_count_offset: u64,
}

impl Default for Layout {
    fn default() -> Self {
        Layout {
            bootblock_base: 0,
            kernel_base: SECTOR_SIZE,
            sector_count_offset: SECTOR_COUNT_OFFSET,
        }
    }
}

impl Layout {
    // The count byte lives in the boot sector, in front of the signature.
    pub fn validate(&self) -> Result<()> {
        if self.sector_count_offset >= BOOT_SIGNATURE_OFFSET {
            return Err(Error::ReservedOverlap(self.sector_count_offset));
        }
        Ok(())
    }
}

// A stream together with the name it is reported under.
pub struct Named<T> {
    pub name: String,
    pub inner: T,
}

impl<T> Named<T> {
    pub fn new(name: impl Into<String>, inner: T) -> Self {
        Named {
            name: name.into(),
            inner,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Start,
    BootblockParsed,
    BootblockWritten,
    KernelParsed,
    KernelWritten,
    SectorsRecorded,
    Done,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Start => "start",
            BuildState::BootblockParsed => "bootblock parsed",
            BuildState::BootblockWritten => "bootblock written",
            BuildState::KernelParsed => "kernel parsed",
            BuildState::KernelWritten => "kernel written",
            BuildState::SectorsRecorded => "sectors recorded",
            BuildState::Done => "done",
            BuildState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// A build that stopped early. `state` is the last state reached.
#[derive(Debug, thiserror::Error)]
#[error("{file} (build stopped after: {state})")]
pub struct BuildFailure {
    pub file: String,
    pub state: BuildState,
    #[source]
    pub source: Error,
}

// Read-only view of a finished build, for the diagnostic printer.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub bootblock_name: String,
    pub bootblock: ElfFile,
    pub kernel_name: String,
    pub kernel: ElfFile,
    pub kernel_sectors: u64,
    pub layout: Layout,
    pub image_extent: u64,
}

struct Progress<'a> {
    state: BuildState,
    output_name: &'a str,
}

impl Progress<'_> {
    fn advance<T>(
        &mut self,
        result: Result<T>,
        next: BuildState,
        file: &str,
    ) -> std::result::Result<T, BuildFailure> {
        match result {
            Ok(value) => {
                log::info!("{}: {} -> {}", file, self.state, next);
                self.state = next;
                Ok(value)
            }
            Err(source) => {
                // A failed image write is blamed on the image, whichever input was being copied
                let file = match source {
                    Error::ImageWrite(_) => self.output_name,
                    _ => file,
                };
                let failure = BuildFailure {
                    file: file.to_string(),
                    state: self.state,
                    source,
                };
                log::debug!("{}: failed after {}: {}", file, self.state, failure.source);
                self.state = BuildState::Failed;
                Err(failure)
            }
        }
    }
}

// Copies every loadable segment, then every loadable section, of one
// decoded file into the image at `base`.
fn write_file<R, W>(image: &mut ImageWriter<W>, stream: &mut R, elf: &ElfFile, base: u64) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    // 1. Loadable segments, each padded out to memsz
    for (index, entry) in elf.program_headers.iter().enumerate() {
        if !entry.is_load() {
            log::debug!("program header {}: {} segment, skipped", index, entry.type_name());
            continue;
        }
        let content = load_segment(stream, entry)?;
        image.write_segment(index, entry, content, base)?;
    }

    // 2. Sections second, over the segment ranges they sit in
    for (index, entry) in elf.section_headers.iter().enumerate() {
        if !entry.is_loadable() {
            continue;
        }
        let content = load_section(stream, entry)?;
        image.write_section(index, entry, content, base)?;
    }
    Ok(())
}

// Builds the boot image into `output`. A failed build may leave it partially written.
pub fn build_image<B, K, W>(
    mut bootblock: Named<B>,
    mut kernel: Named<K>,
    output: Named<W>,
    layout: &Layout,
) -> std::result::Result<(BuildReport, W), BuildFailure>
where
    B: Read + Seek,
    K: Read + Seek,
    W: Write + Seek,
{
    let output_name = output.name;
    let mut progress = Progress {
        state: BuildState::Start,
        output_name: &output_name,
    };
    layout.validate().map_err(|source| BuildFailure {
        file: output_name.clone(),
        state: BuildState::Start,
        source,
    })?;
    let mut image = ImageWriter::new(output.inner);

    // 1. Bootblock: decode, then load and write
    let boot_elf = progress.advance(
        decode(&mut bootblock.inner),
        BuildState::BootblockParsed,
        &bootblock.name,
    )?;
    progress.advance(
        write_file(&mut image, &mut bootblock.inner, &boot_elf, layout.bootblock_base),
        BuildState::BootblockWritten,
        &bootblock.name,
    )?;

    // 2. Kernel, into its own region
    let kernel_elf = progress.advance(
        decode(&mut kernel.inner),
        BuildState::KernelParsed,
        &kernel.name,
    )?;
    progress.advance(
        write_file(&mut image, &mut kernel.inner, &kernel_elf, layout.kernel_base),
        BuildState::KernelWritten,
        &kernel.name,
    )?;

    // 3. Sector count and signature, nothing is written after these
    let kernel_sectors = sectors::count_kernel_sectors(&kernel_elf.program_headers);
    let image_extent = image.extent();
    let out = progress.advance(
        sectors::record(image, kernel_sectors, layout.sector_count_offset),
        BuildState::SectorsRecorded,
        &output_name,
    )?;
    progress.advance(Ok(()), BuildState::Done, &output_name)?;

    let report = BuildReport {
        bootblock_name: bootblock.name,
        bootblock: boot_elf,
        kernel_name: kernel.name,
        kernel: kernel_elf,
        kernel_sectors,
        layout: *layout,
        image_extent: image_extent.max(BOOT_SIGNATURE_OFFSET + 2),
    };
    Ok((report, out))
}
