//! Packet framing.
//!
//! Builds block headers for function-call and metadata packets and writes
//! header + payload through the (already locked) file stream. Compression is
//! decided here with the strict benefit rule: a compressed payload is used
//! only when it is strictly smaller than the uncompressed bytes, since an
//! equal-size payload would still pay the larger header.

use recap_format::{
    ApiCallId, BlockType, CompressionType, Compressor, FileOption, HandleId, MetaDataType,
    CAPTURE_FILE_FOURCC, COMPRESSED_FUNCTION_CALL_PREAMBLE_SIZE, DISPLAY_MESSAGE_PREAMBLE_SIZE,
    FILE_VERSION_MAJOR, FILE_VERSION_MINOR, FILL_MEMORY_PREAMBLE_SIZE,
    FUNCTION_CALL_PREAMBLE_SIZE, RESIZE_WINDOW_COMMAND_SIZE,
};

use crate::file_writer::FileWriter;

pub(crate) enum PacketPayload<'a> {
    Uncompressed(&'a [u8]),
    Compressed {
        data: &'a [u8],
        uncompressed_size: u64,
    },
}

pub(crate) fn prepare_payload<'a>(
    compressor: Option<&dyn Compressor>,
    src: &'a [u8],
    scratch: &'a mut Vec<u8>,
) -> PacketPayload<'a> {
    if let Some(compressor) = compressor {
        let compressed_size = compressor.compress(src, scratch);
        if compressed_size > 0 && compressed_size < src.len() {
            return PacketPayload::Compressed {
                data: &scratch[..compressed_size],
                uncompressed_size: src.len() as u64,
            };
        }
    }
    PacketPayload::Uncompressed(src)
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn write_file_header(file: &mut FileWriter, compression: CompressionType, force_flush: bool) {
    let mut header = Vec::with_capacity(20);
    put_u32(&mut header, CAPTURE_FILE_FOURCC);
    put_u16(&mut header, FILE_VERSION_MAJOR);
    put_u16(&mut header, FILE_VERSION_MINOR);
    put_u32(&mut header, 1); // num_options
    put_u32(&mut header, FileOption::CompressionType as u32);
    put_u32(&mut header, compression as u32);
    file.write(&header);
    if force_flush {
        file.flush();
    }
}

pub(crate) fn write_function_call(
    file: &mut FileWriter,
    call_id: ApiCallId,
    thread_id: u64,
    payload: PacketPayload<'_>,
    force_flush: bool,
) {
    let mut header = Vec::with_capacity(32);
    let data = match payload {
        PacketPayload::Uncompressed(data) => {
            put_u32(&mut header, BlockType::FunctionCall as u32);
            put_u64(&mut header, FUNCTION_CALL_PREAMBLE_SIZE + data.len() as u64);
            put_u32(&mut header, call_id.0);
            put_u64(&mut header, thread_id);
            data
        }
        PacketPayload::Compressed {
            data,
            uncompressed_size,
        } => {
            put_u32(&mut header, BlockType::CompressedFunctionCall as u32);
            put_u64(
                &mut header,
                COMPRESSED_FUNCTION_CALL_PREAMBLE_SIZE + data.len() as u64,
            );
            put_u32(&mut header, call_id.0);
            put_u64(&mut header, thread_id);
            put_u64(&mut header, uncompressed_size);
            data
        }
    };
    file.write(&header);
    file.write(data);
    if force_flush {
        file.flush();
    }
}

pub(crate) fn write_fill_memory(
    file: &mut FileWriter,
    thread_id: u64,
    memory_id: HandleId,
    memory_offset: u64,
    payload: PacketPayload<'_>,
    force_flush: bool,
) {
    // The header always records the uncompressed length in memory_size, so a
    // compressed payload only flips the block type.
    let (block_type, data, memory_size) = match payload {
        PacketPayload::Uncompressed(data) => (BlockType::MetaData, data, data.len() as u64),
        PacketPayload::Compressed {
            data,
            uncompressed_size,
        } => (BlockType::CompressedMetaData, data, uncompressed_size),
    };

    let mut header = Vec::with_capacity(48);
    put_u32(&mut header, block_type as u32);
    put_u64(&mut header, FILL_MEMORY_PREAMBLE_SIZE + data.len() as u64);
    put_u32(&mut header, MetaDataType::FillMemoryCommand as u32);
    put_u64(&mut header, thread_id);
    put_u64(&mut header, memory_id.0);
    put_u64(&mut header, memory_offset);
    put_u64(&mut header, memory_size);
    file.write(&header);
    file.write(data);
    if force_flush {
        file.flush();
    }
}

pub(crate) fn write_resize_window(
    file: &mut FileWriter,
    thread_id: u64,
    surface_id: HandleId,
    width: u32,
    height: u32,
    force_flush: bool,
) {
    let mut packet = Vec::with_capacity(40);
    put_u32(&mut packet, BlockType::MetaData as u32);
    put_u64(&mut packet, RESIZE_WINDOW_COMMAND_SIZE);
    put_u32(&mut packet, MetaDataType::ResizeWindowCommand as u32);
    put_u64(&mut packet, thread_id);
    put_u64(&mut packet, surface_id.0);
    put_u32(&mut packet, width);
    put_u32(&mut packet, height);
    file.write(&packet);
    if force_flush {
        file.flush();
    }
}

pub(crate) fn write_display_message(
    file: &mut FileWriter,
    thread_id: u64,
    message: &str,
    force_flush: bool,
) {
    let mut header = Vec::with_capacity(24);
    put_u32(&mut header, BlockType::MetaData as u32);
    put_u64(
        &mut header,
        DISPLAY_MESSAGE_PREAMBLE_SIZE + message.len() as u64,
    );
    put_u32(&mut header, MetaDataType::DisplayMessageCommand as u32);
    put_u64(&mut header, thread_id);
    file.write(&header);
    file.write(message.as_bytes());
    if force_flush {
        file.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recap_format::Lz4Compressor;

    #[test]
    fn benefit_rule_is_strict() {
        // Highly repetitive input shrinks and is used compressed.
        let src = vec![0u8; 1024];
        let mut scratch = Vec::new();
        match prepare_payload(Some(&Lz4Compressor), &src, &mut scratch) {
            PacketPayload::Compressed {
                data,
                uncompressed_size,
            } => {
                assert!(data.len() < src.len());
                assert_eq!(uncompressed_size, 1024);
            }
            PacketPayload::Uncompressed(_) => panic!("expected compressed payload"),
        }
    }

    #[test]
    fn no_compressor_means_uncompressed() {
        let src = [1u8, 2, 3, 4];
        let mut scratch = Vec::new();
        assert!(matches!(
            prepare_payload(None, &src, &mut scratch),
            PacketPayload::Uncompressed(_)
        ));
    }

    #[test]
    fn tiny_input_does_not_shrink_and_stays_uncompressed() {
        let src = [0xA5u8; 4];
        let mut scratch = Vec::new();
        assert!(matches!(
            prepare_payload(Some(&Lz4Compressor), &src, &mut scratch),
            PacketPayload::Uncompressed(_)
        ));
    }
}
