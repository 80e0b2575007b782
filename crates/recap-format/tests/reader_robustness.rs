//! Malformed-input behavior of the capture file reader: every rejection path
//! must produce a typed error, never a panic or a runaway allocation.

use std::io::Cursor;

use recap_format::{
    BlockType, CompressionType, FormatError, TraceFileReader, CAPTURE_FILE_FOURCC,
    COMPRESSED_BLOCK_BIT,
};

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn file_header(compression: CompressionType) -> Vec<u8> {
    let mut bytes = Vec::new();
    push_u32(&mut bytes, CAPTURE_FILE_FOURCC);
    push_u16(&mut bytes, 0); // major
    push_u16(&mut bytes, 0); // minor
    push_u32(&mut bytes, 1); // num_options
    push_u32(&mut bytes, 1); // FileOption::CompressionType
    push_u32(&mut bytes, compression as u32);
    bytes
}

fn open(bytes: Vec<u8>) -> recap_format::Result<TraceFileReader<Cursor<Vec<u8>>>> {
    TraceFileReader::open(Cursor::new(bytes))
}

#[test]
fn rejects_bad_magic() {
    let mut bytes = file_header(CompressionType::None);
    bytes[0] ^= 0xFF;
    assert!(matches!(open(bytes), Err(FormatError::InvalidMagic)));
}

#[test]
fn rejects_nonzero_version() {
    let mut bytes = file_header(CompressionType::None);
    bytes[4] = 1;
    assert!(matches!(
        open(bytes),
        Err(FormatError::UnsupportedVersion { major: 1, minor: 0 })
    ));
}

#[test]
fn rejects_unknown_file_option() {
    let mut bytes = Vec::new();
    push_u32(&mut bytes, CAPTURE_FILE_FOURCC);
    push_u16(&mut bytes, 0);
    push_u16(&mut bytes, 0);
    push_u32(&mut bytes, 1);
    push_u32(&mut bytes, 999);
    push_u32(&mut bytes, 0);
    assert!(matches!(open(bytes), Err(FormatError::UnknownFileOption(999))));
}

#[test]
fn rejects_unknown_compression_value() {
    let mut bytes = Vec::new();
    push_u32(&mut bytes, CAPTURE_FILE_FOURCC);
    push_u16(&mut bytes, 0);
    push_u16(&mut bytes, 0);
    push_u32(&mut bytes, 1);
    push_u32(&mut bytes, 1);
    push_u32(&mut bytes, 77);
    assert!(matches!(
        open(bytes),
        Err(FormatError::UnknownCompressionType(77))
    ));
}

#[test]
fn rejects_unreasonable_option_count() {
    let mut bytes = Vec::new();
    push_u32(&mut bytes, CAPTURE_FILE_FOURCC);
    push_u16(&mut bytes, 0);
    push_u16(&mut bytes, 0);
    push_u32(&mut bytes, u32::MAX);
    assert!(matches!(open(bytes), Err(FormatError::Corrupt(_))));
}

#[test]
fn empty_block_stream_is_clean_eof() -> anyhow::Result<()> {
    let mut reader = open(file_header(CompressionType::None))?;
    assert!(reader.next_block()?.is_none());
    Ok(())
}

#[test]
fn rejects_unknown_block_type() -> anyhow::Result<()> {
    let mut bytes = file_header(CompressionType::None);
    push_u32(&mut bytes, 0xAB); // neither a known type nor compressed bit
    push_u64(&mut bytes, 0);
    let mut reader = open(bytes)?;
    assert!(matches!(
        reader.next_block(),
        Err(FormatError::UnknownBlockType(0xAB))
    ));
    Ok(())
}

#[test]
fn rejects_torn_block_header() -> anyhow::Result<()> {
    let mut bytes = file_header(CompressionType::None);
    push_u32(&mut bytes, BlockType::FunctionCall as u32);
    bytes.extend_from_slice(&[0u8; 3]); // partial size field
    let mut reader = open(bytes)?;
    assert!(reader.next_block().is_err());
    Ok(())
}

#[test]
fn rejects_block_size_smaller_than_preamble() -> anyhow::Result<()> {
    let mut bytes = file_header(CompressionType::None);
    push_u32(&mut bytes, BlockType::FunctionCall as u32);
    push_u64(&mut bytes, 4); // smaller than api_call_id + thread_id
    push_u32(&mut bytes, 1);
    push_u64(&mut bytes, 1);
    let mut reader = open(bytes)?;
    assert!(matches!(reader.next_block(), Err(FormatError::Corrupt(_))));
    Ok(())
}

#[test]
fn rejects_fill_memory_length_mismatch() -> anyhow::Result<()> {
    let mut bytes = file_header(CompressionType::None);
    push_u32(&mut bytes, BlockType::MetaData as u32);
    push_u64(&mut bytes, 36 + 8); // preamble + 8 payload bytes
    push_u32(&mut bytes, 2); // MetaDataType::FillMemoryCommand
    push_u64(&mut bytes, 1); // thread_id
    push_u64(&mut bytes, 5); // memory_id
    push_u64(&mut bytes, 0); // memory_offset
    push_u64(&mut bytes, 16); // memory_size disagrees with the payload
    bytes.extend_from_slice(&[0u8; 8]);
    let mut reader = open(bytes)?;
    assert!(matches!(reader.next_block(), Err(FormatError::Corrupt(_))));
    Ok(())
}

#[test]
fn rejects_compressed_block_when_file_has_no_compression() -> anyhow::Result<()> {
    let payload = lz4_flex::block::compress(&[9u8; 32]);
    let mut bytes = file_header(CompressionType::None);
    push_u32(&mut bytes, 1 | COMPRESSED_BLOCK_BIT);
    push_u64(&mut bytes, 20 + payload.len() as u64);
    push_u32(&mut bytes, 1); // api_call_id
    push_u64(&mut bytes, 1); // thread_id
    push_u64(&mut bytes, 32); // uncompressed_size
    bytes.extend_from_slice(&payload);
    let mut reader = open(bytes)?;
    assert!(matches!(reader.next_block(), Err(FormatError::Corrupt(_))));
    Ok(())
}

#[test]
fn rejects_lz4_payload_with_wrong_uncompressed_size() -> anyhow::Result<()> {
    let payload = lz4_flex::block::compress(&[9u8; 32]);
    let mut bytes = file_header(CompressionType::Lz4);
    push_u32(&mut bytes, 1 | COMPRESSED_BLOCK_BIT);
    push_u64(&mut bytes, 20 + payload.len() as u64);
    push_u32(&mut bytes, 1);
    push_u64(&mut bytes, 1);
    push_u64(&mut bytes, 64); // lies about the uncompressed size
    bytes.extend_from_slice(&payload);
    let mut reader = open(bytes)?;
    assert!(matches!(reader.next_block(), Err(FormatError::Decompress(_))));
    Ok(())
}
