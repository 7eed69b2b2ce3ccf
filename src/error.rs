use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not an ELF file (magic {magic:02x?})")]
    NotElf { magic: [u8; 4] },

    #[error("unsupported ELF class {0}")]
    UnsupportedClass(u8),

    #[error("unsupported ELF data encoding {0}")]
    UnsupportedEncoding(u8),

    #[error("truncated read of {what} at offset {offset:#x}")]
    TruncatedRead { what: &'static str, offset: u64 },

    #[error("read error: {0}")]
    Read(#[source] io::Error),

    #[error("{what} entry size {size} is smaller than {minimum}")]
    BadEntrySize {
        what: &'static str,
        size: u16,
        minimum: u16,
    },

    #[error("program header {index}: memsz {memsz:#x} is smaller than filesz {filesz:#x}")]
    BadSegmentSize { index: usize, filesz: u64, memsz: u64 },

    #[error("address {addr:#x} + base {base:#x} does not fit the image")]
    AddressOverflow { addr: u64, base: u64 },

    #[error("kernel needs {0} sectors, more than the sector count field can hold")]
    TooManySectors(u64),

    #[error("image write error: {0}")]
    ImageWrite(#[source] io::Error),

    #[error("cannot open input {}: {source}", .path.display())]
    InputOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot open output {}: {source}", .path.display())]
    OutputOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sector count offset {0:#x} is not inside the boot sector before the signature")]
    ReservedOverlap(u64),
}

impl Error {
    // Classifies a failed `read_exact` on an input stream.
    pub fn from_read(err: io::Error, what: &'static str, offset: u64) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::TruncatedRead { what, offset }
        } else {
            Error::Read(err)
        }
    }
}
