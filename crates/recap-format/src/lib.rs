//! Wire format of capture files: block framing constants and types, the
//! block-compression port, little-endian io helpers, and a validating reader.
//!
//! The capture engine lives in `recap-capture`; this crate is shared between
//! the writer side and inspection tooling.

mod compress;
mod error;
mod format;
mod reader;

pub mod io;

pub use crate::compress::{create_compressor, decompress_into, Compressor, Lz4Compressor};
pub use crate::error::{FormatError, Result};
pub use crate::format::{
    ApiCallId, BlockType, CompressionType, FileOption, HandleId, MetaDataType,
    BLOCK_HEADER_SIZE, CAPTURE_FILE_FOURCC, COMPRESSED_BLOCK_BIT,
    COMPRESSED_FUNCTION_CALL_PREAMBLE_SIZE, DISPLAY_MESSAGE_PREAMBLE_SIZE, FILE_HEADER_SIZE,
    FILE_OPTION_PAIR_SIZE, FILE_VERSION_MAJOR, FILE_VERSION_MINOR, FILL_MEMORY_PREAMBLE_SIZE,
    FUNCTION_CALL_PREAMBLE_SIZE, RESIZE_WINDOW_COMMAND_SIZE,
};
pub use crate::reader::{Block, TraceFileReader};
