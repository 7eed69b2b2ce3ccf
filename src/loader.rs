use std::io::{Read, Seek, SeekFrom};

use crate::elf::{ProgramHeader, SectionHeader};
use crate::error::{Error, Result};

// Bytes of one segment or section, owned until the image writer takes them.
#[derive(Debug, PartialEq, Eq)]
pub struct ContentBuffer(Vec<u8>);

impl ContentBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<u8>> for ContentBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        ContentBuffer(bytes)
    }
}

fn load_range<R: Read + Seek>(
    stream: &mut R,
    offset: u64,
    size: u64,
    what: &'static str,
) -> Result<ContentBuffer> {
    // A size that cannot be addressed here cannot be read from the file either
    let len = usize::try_from(size).map_err(|_| Error::TruncatedRead { what, offset })?;

    // 1. Jump to the content
    stream
        .seek(SeekFrom::Start(offset))
        .map_err(Error::Read)?;

    // 2. Read at most `size` bytes; fewer means the file ends early
    let mut bytes = Vec::new();
    stream
        .by_ref()
        .take(size)
        .read_to_end(&mut bytes)
        .map_err(Error::Read)?;
    if bytes.len() != len {
        return Err(Error::TruncatedRead { what, offset });
    }
    Ok(ContentBuffer(bytes))
}

// Reads the `filesz` file-backed bytes of a segment.
pub fn load_segment<R: Read + Seek>(stream: &mut R, entry: &ProgramHeader) -> Result<ContentBuffer> {
    load_range(stream, entry.offset, entry.filesz, "segment content")
}

// Reads `sh_size` bytes of a section. Does not check eligibility; callers
// skip sections that are not `is_loadable()`.
pub fn load_section<R: Read + Seek>(stream: &mut R, entry: &SectionHeader) -> Result<ContentBuffer> {
    load_range(stream, entry.offset, entry.size, "section content")
}
