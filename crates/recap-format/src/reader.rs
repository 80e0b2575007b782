//! Validating reader for capture files.
//!
//! The reader is used by inspection tooling and tests. It never trusts length
//! fields: payload lengths are derived from the block header and checked
//! against the fixed per-kind layouts before any allocation, and compressed
//! payloads must decode to exactly the recorded uncompressed size.

use std::io::Read;

use crate::compress::decompress_into;
use crate::error::{FormatError, Result};
use crate::format::{
    ApiCallId, BlockType, CompressionType, FileOption, HandleId, MetaDataType,
    CAPTURE_FILE_FOURCC, COMPRESSED_FUNCTION_CALL_PREAMBLE_SIZE, DISPLAY_MESSAGE_PREAMBLE_SIZE,
    FILE_VERSION_MAJOR, FILE_VERSION_MINOR, FILL_MEMORY_PREAMBLE_SIZE,
    FUNCTION_CALL_PREAMBLE_SIZE, RESIZE_WINDOW_COMMAND_SIZE,
};
use crate::io::ReadLeExt;

// An absurd option count is a corrupt header, not a real file.
const MAX_FILE_OPTIONS: u32 = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    FunctionCall {
        api_call_id: ApiCallId,
        thread_id: u64,
        parameters: Vec<u8>,
        compressed: bool,
    },
    DisplayMessage {
        thread_id: u64,
        message: String,
    },
    FillMemory {
        thread_id: u64,
        memory_id: HandleId,
        memory_offset: u64,
        memory_size: u64,
        data: Vec<u8>,
        compressed: bool,
    },
    ResizeWindow {
        thread_id: u64,
        surface_id: HandleId,
        width: u32,
        height: u32,
    },
}

pub struct TraceFileReader<R> {
    reader: R,
    compression: CompressionType,
    options: Vec<(FileOption, u32)>,
}

impl<R: Read> TraceFileReader<R> {
    pub fn open(mut reader: R) -> Result<Self> {
        if reader.read_u32_le()? != CAPTURE_FILE_FOURCC {
            return Err(FormatError::InvalidMagic);
        }
        let major = reader.read_u16_le()?;
        let minor = reader.read_u16_le()?;
        if major != FILE_VERSION_MAJOR || minor != FILE_VERSION_MINOR {
            return Err(FormatError::UnsupportedVersion { major, minor });
        }

        let num_options = reader.read_u32_le()?;
        if num_options > MAX_FILE_OPTIONS {
            return Err(FormatError::Corrupt("file option count out of range"));
        }

        let mut compression = CompressionType::None;
        let mut options = Vec::with_capacity(num_options as usize);
        for _ in 0..num_options {
            let option_id = reader.read_u32_le()?;
            let option_value = reader.read_u32_le()?;
            let option =
                FileOption::from_u32(option_id).ok_or(FormatError::UnknownFileOption(option_id))?;
            match option {
                FileOption::CompressionType => {
                    compression = CompressionType::from_u32(option_value)
                        .ok_or(FormatError::UnknownCompressionType(option_value))?;
                }
            }
            options.push((option, option_value));
        }

        Ok(Self {
            reader,
            compression,
            options,
        })
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn options(&self) -> &[(FileOption, u32)] {
        &self.options
    }

    /// Read the next block, or `None` at a clean end of file. EOF in the
    /// middle of a block is an error: packets are written atomically, so a
    /// torn block means the file is corrupt rather than merely truncated
    /// between packets.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        let mut first = [0u8; 4];
        let mut filled = 0;
        while filled < first.len() {
            let n = self.reader.read(&mut first[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FormatError::Corrupt("truncated block header"));
            }
            filled += n;
        }
        let raw_type = u32::from_le_bytes(first);
        let size = self.reader.read_u64_le()?;
        let block_type =
            BlockType::from_u32(raw_type).ok_or(FormatError::UnknownBlockType(raw_type))?;

        match block_type {
            BlockType::FunctionCall | BlockType::CompressedFunctionCall => {
                self.read_function_call(block_type.is_compressed(), size).map(Some)
            }
            BlockType::MetaData | BlockType::CompressedMetaData => {
                self.read_meta_data(block_type.is_compressed(), size).map(Some)
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        while let Some(block) = self.next_block()? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn read_function_call(&mut self, compressed: bool, size: u64) -> Result<Block> {
        let api_call_id = ApiCallId(self.reader.read_u32_le()?);
        let thread_id = self.reader.read_u64_le()?;

        let parameters = if compressed {
            let uncompressed_size = self.reader.read_u64_le()?;
            let payload_len = size
                .checked_sub(COMPRESSED_FUNCTION_CALL_PREAMBLE_SIZE)
                .ok_or(FormatError::Corrupt("block size smaller than its header"))?;
            let payload = self.read_payload(payload_len)?;
            self.decompress_payload(&payload, uncompressed_size)?
        } else {
            let payload_len = size
                .checked_sub(FUNCTION_CALL_PREAMBLE_SIZE)
                .ok_or(FormatError::Corrupt("block size smaller than its header"))?;
            self.read_payload(payload_len)?
        };

        Ok(Block::FunctionCall {
            api_call_id,
            thread_id,
            parameters,
            compressed,
        })
    }

    fn read_meta_data(&mut self, compressed: bool, size: u64) -> Result<Block> {
        let meta_raw = self.reader.read_u32_le()?;
        let meta_type =
            MetaDataType::from_u32(meta_raw).ok_or(FormatError::UnknownMetaDataType(meta_raw))?;

        match meta_type {
            MetaDataType::DisplayMessageCommand => {
                if compressed {
                    return Err(FormatError::Corrupt("display message blocks are never compressed"));
                }
                let thread_id = self.reader.read_u64_le()?;
                let message_len = size
                    .checked_sub(DISPLAY_MESSAGE_PREAMBLE_SIZE)
                    .ok_or(FormatError::Corrupt("block size smaller than its header"))?;
                let bytes = self.read_payload(message_len)?;
                let message = String::from_utf8(bytes)
                    .map_err(|_| FormatError::Corrupt("display message is not utf-8"))?;
                Ok(Block::DisplayMessage { thread_id, message })
            }
            MetaDataType::FillMemoryCommand => {
                let thread_id = self.reader.read_u64_le()?;
                let memory_id = HandleId(self.reader.read_u64_le()?);
                let memory_offset = self.reader.read_u64_le()?;
                let memory_size = self.reader.read_u64_le()?;
                let payload_len = size
                    .checked_sub(FILL_MEMORY_PREAMBLE_SIZE)
                    .ok_or(FormatError::Corrupt("block size smaller than its header"))?;
                let data = if compressed {
                    // The header carries the uncompressed length in
                    // memory_size, so compression only flips the block type.
                    let payload = self.read_payload(payload_len)?;
                    self.decompress_payload(&payload, memory_size)?
                } else {
                    if payload_len != memory_size {
                        return Err(FormatError::Corrupt("fill-memory payload length mismatch"));
                    }
                    self.read_payload(payload_len)?
                };
                Ok(Block::FillMemory {
                    thread_id,
                    memory_id,
                    memory_offset,
                    memory_size,
                    data,
                    compressed,
                })
            }
            MetaDataType::ResizeWindowCommand => {
                if compressed {
                    return Err(FormatError::Corrupt("resize window blocks are never compressed"));
                }
                if size != RESIZE_WINDOW_COMMAND_SIZE {
                    return Err(FormatError::Corrupt("resize window block size mismatch"));
                }
                let thread_id = self.reader.read_u64_le()?;
                let surface_id = HandleId(self.reader.read_u64_le()?);
                let width = self.reader.read_u32_le()?;
                let height = self.reader.read_u32_le()?;
                Ok(Block::ResizeWindow {
                    thread_id,
                    surface_id,
                    width,
                    height,
                })
            }
        }
    }

    fn read_payload(&mut self, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len)
            .map_err(|_| FormatError::Corrupt("payload length out of range"))?;
        self.reader.read_exact_vec(len)
    }

    fn decompress_payload(&mut self, payload: &[u8], uncompressed_size: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(uncompressed_size)
            .map_err(|_| FormatError::Corrupt("uncompressed size out of range"))?;
        let mut out = Vec::new();
        out.try_reserve_exact(len)
            .map_err(|_| FormatError::OutOfMemory { len })?;
        out.resize(len, 0);
        decompress_into(self.compression, payload, &mut out)?;
        Ok(out)
    }
}
