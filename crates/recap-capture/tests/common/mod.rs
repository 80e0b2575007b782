//! Shared helpers for `recap-capture` integration tests.
#![allow(dead_code)] // each test binary uses a different subset

use std::fs::File;
use std::path::Path;

use anyhow::Result;
use recap_capture::{
    ApiCallId, CaptureFileOptions, CaptureManager, CaptureSettings, CompressionType,
    MemoryTrackingMode,
};
use recap_format::{Block, TraceFileReader};

/// Test settings: deterministic filename, flush after every packet so files
/// can be read while the manager is still alive.
pub fn settings(dir: &Path, name: &str) -> CaptureSettings {
    CaptureSettings {
        base_filename: dir.join(name),
        file_options: CaptureFileOptions {
            compression_type: CompressionType::None,
        },
        timestamp_filename: false,
        force_flush: true,
        memory_tracking_mode: MemoryTrackingMode::Unassisted,
        trim_ranges: Vec::new(),
    }
}

pub fn read_blocks(path: &Path) -> Result<Vec<Block>> {
    let file = File::open(path)?;
    Ok(TraceFileReader::open(file)?.read_all()?)
}

pub fn issue_call(manager: &CaptureManager, call_id: u32, payload: &[u8]) {
    let mut encoder = manager.init_api_call_trace(ApiCallId(call_id));
    encoder.write_bytes(payload);
    manager.end_api_call_trace(encoder);
}

pub fn function_call_ids(blocks: &[Block]) -> Vec<u32> {
    blocks
        .iter()
        .filter_map(|block| match block {
            Block::FunctionCall { api_call_id, .. } => Some(api_call_id.0),
            _ => None,
        })
        .collect()
}

pub fn fill_memory_blocks(blocks: &[Block]) -> Vec<(u64, u64, u64, Vec<u8>)> {
    blocks
        .iter()
        .filter_map(|block| match block {
            Block::FillMemory {
                memory_id,
                memory_offset,
                memory_size,
                data,
                ..
            } => Some((memory_id.0, *memory_offset, *memory_size, data.clone())),
            _ => None,
        })
        .collect()
}
