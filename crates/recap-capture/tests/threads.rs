//! Concurrency: packet atomicity under contention and logical-thread-id
//! behavior observable in the emitted file.

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;

use recap_capture::{ApiCallId, CaptureManager, CompressionType, NullStateTracker};
use recap_format::Block;

use common::{read_blocks, settings};

const THREADS: usize = 8;
const CALLS_PER_THREAD: u32 = 50;

#[test]
fn concurrent_calls_produce_exactly_n_times_k_untorn_packets() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = settings(dir.path(), "threads.rcap");
    // Compression on: the compressed path must be just as atomic.
    config.file_options.compression_type = CompressionType::Lz4;
    config.force_flush = false;
    let manager = CaptureManager::new(config, Box::new(NullStateTracker));

    let mut workers = Vec::new();
    for worker in 0..THREADS as u32 {
        let manager = Arc::clone(&manager);
        workers.push(thread::spawn(move || {
            for seq in 0..CALLS_PER_THREAD {
                let mut encoder = manager.init_api_call_trace(ApiCallId(worker));
                encoder.write_u32(worker);
                encoder.write_u32(seq);
                // Enough bulk that packets interleave at the file mutex.
                encoder.write_bytes(&[worker as u8; 256]);
                manager.end_api_call_trace(encoder);
            }
        }));
    }
    for worker in workers {
        worker.join().expect("worker thread panicked");
    }
    drop(manager); // flush

    let blocks = read_blocks(&dir.path().join("threads.rcap"))?;
    assert_eq!(blocks.len(), THREADS * CALLS_PER_THREAD as usize);

    // Per-thread packets appear in program order; ids are distinct, nonzero,
    // and consistent between the header and the encoded payload.
    let mut per_thread: BTreeMap<u64, Vec<u32>> = BTreeMap::new();
    for block in &blocks {
        let Block::FunctionCall {
            api_call_id,
            thread_id,
            parameters,
            ..
        } = block
        else {
            panic!("unexpected block {block:?}");
        };
        assert_ne!(*thread_id, 0);
        assert_eq!(parameters.len(), 8 + 256);
        let worker = u32::from_le_bytes(parameters[0..4].try_into()?);
        let seq = u32::from_le_bytes(parameters[4..8].try_into()?);
        assert_eq!(worker, api_call_id.0);
        assert!(parameters[8..].iter().all(|&b| b == worker as u8));
        per_thread.entry(*thread_id).or_default().push(seq);
    }

    assert_eq!(per_thread.len(), THREADS);
    for sequence in per_thread.values() {
        let expected: Vec<u32> = (0..CALLS_PER_THREAD).collect();
        assert_eq!(sequence, &expected);
    }
    Ok(())
}

#[test]
fn one_thread_keeps_one_logical_id() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let manager = CaptureManager::new(settings(dir.path(), "stable.rcap"), Box::new(NullStateTracker));

    let handle = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            for call_id in [10u32, 11, 12] {
                let encoder = manager.init_api_call_trace(ApiCallId(call_id));
                manager.end_api_call_trace(encoder);
            }
        })
    };
    handle.join().expect("worker thread panicked");

    let blocks = read_blocks(&dir.path().join("stable.rcap"))?;
    let ids: BTreeSet<u64> = blocks
        .iter()
        .map(|block| match block {
            Block::FunctionCall { thread_id, .. } => *thread_id,
            other => panic!("unexpected block {other:?}"),
        })
        .collect();
    assert_eq!(ids.len(), 1);
    assert_ne!(ids.first().copied(), Some(0));
    Ok(())
}
