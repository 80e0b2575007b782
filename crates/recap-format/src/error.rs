use thiserror::Error;

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid capture file magic")]
    InvalidMagic,

    #[error("unsupported capture file version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("unknown block type 0x{0:08x}")]
    UnknownBlockType(u32),

    #[error("unknown meta-data type {0}")]
    UnknownMetaDataType(u32),

    #[error("unknown file option {0}")]
    UnknownFileOption(u32),

    #[error("unknown compression type {0}")]
    UnknownCompressionType(u32),

    #[error("corrupt capture file: {0}")]
    Corrupt(&'static str),

    #[error("decompression failed: {0}")]
    Decompress(&'static str),

    #[error("allocation of {len} bytes failed")]
    OutOfMemory { len: usize },
}
