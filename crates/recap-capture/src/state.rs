//! Boundary to the external state tracker.
//!
//! The capture core does not know how to describe live API objects; an
//! installed [`StateTracker`] does. At trim activation the core hands the
//! tracker a [`StateWriter`] over the freshly opened capture file, and the
//! tracker emits synthetic creation/initialization packets so a replayer can
//! reach the equivalent live state without the preceding frames.

use recap_format::{ApiCallId, Compressor, HandleId};

use crate::file_writer::FileWriter;
use crate::memory::DeviceMemoryWrapper;
use crate::packet;
use crate::update_template::UpdateTemplateInfo;

/// Packet sink handed to [`StateTracker::write_state`]. Packets written here
/// use the same framing (and compression rule) as the normal call path, so
/// snapshot packets are indistinguishable from hook packets on disk.
pub struct StateWriter<'a> {
    file: &'a mut FileWriter,
    compressor: Option<&'a dyn Compressor>,
    thread_id: u64,
    force_flush: bool,
    scratch: Vec<u8>,
}

impl<'a> StateWriter<'a> {
    pub(crate) fn new(
        file: &'a mut FileWriter,
        compressor: Option<&'a dyn Compressor>,
        thread_id: u64,
        force_flush: bool,
    ) -> Self {
        Self {
            file,
            compressor,
            thread_id,
            force_flush,
            scratch: Vec::new(),
        }
    }

    /// Logical id of the thread driving the snapshot; recorded in every
    /// packet written through this writer.
    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn write_function_call(&mut self, call_id: ApiCallId, parameters: &[u8]) {
        let payload = packet::prepare_payload(self.compressor, parameters, &mut self.scratch);
        packet::write_function_call(self.file, call_id, self.thread_id, payload, self.force_flush);
    }

    pub fn write_fill_memory(&mut self, memory_id: HandleId, offset: u64, data: &[u8]) {
        let payload = packet::prepare_payload(self.compressor, data, &mut self.scratch);
        packet::write_fill_memory(
            self.file,
            self.thread_id,
            memory_id,
            offset,
            payload,
            self.force_flush,
        );
    }
}

/// Records live object state while the capture is in a tracking phase.
///
/// Implementations own the wrapper bookkeeping the core skips while tracking
/// is enabled: `track_mapped_memory` must store (or clear, for a null
/// pointer) the wrapper's `mapped_data`/`mapped_offset`/`mapped_size`, and
/// `track_allocate_memory` must record `allocation_size`.
pub trait StateTracker: Send {
    fn track_allocate_memory(&mut self, memory: &mut DeviceMemoryWrapper, allocation_size: u64);

    fn track_mapped_memory(
        &mut self,
        memory: &mut DeviceMemoryWrapper,
        mapped_data: *mut u8,
        mapped_offset: u64,
        mapped_size: u64,
    );

    fn track_update_descriptor_set_with_template(
        &mut self,
        set: HandleId,
        info: &UpdateTemplateInfo,
        data: &[u8],
    );

    /// Serialize every live tracked object into `writer` as synthetic
    /// packets. Called once per trim activation, before any call packet of
    /// the new range is written.
    fn write_state(&mut self, writer: &mut StateWriter<'_>);
}

/// Tracker that keeps the wrapper bookkeeping correct but snapshots nothing.
/// Suitable when no trim range ever needs a mid-stream state snapshot.
pub struct NullStateTracker;

impl StateTracker for NullStateTracker {
    fn track_allocate_memory(&mut self, memory: &mut DeviceMemoryWrapper, allocation_size: u64) {
        memory.allocation_size = allocation_size;
    }

    fn track_mapped_memory(
        &mut self,
        memory: &mut DeviceMemoryWrapper,
        mapped_data: *mut u8,
        mapped_offset: u64,
        mapped_size: u64,
    ) {
        memory.mapped_data = mapped_data;
        memory.mapped_offset = mapped_offset;
        memory.mapped_size = mapped_size;
    }

    fn track_update_descriptor_set_with_template(
        &mut self,
        _set: HandleId,
        _info: &UpdateTemplateInfo,
        _data: &[u8],
    ) {
    }

    fn write_state(&mut self, _writer: &mut StateWriter<'_>) {}
}
