//! The trace manager: a process-wide engine that turns intercepted API calls
//! into a replayable capture file.
//!
//! API shims drive the manager through `PreProcess_*`/`PostProcess_*`-shaped
//! hooks. Parameter encoding happens on per-thread buffers without
//! synchronization; each finished packet (header + payload) is written under
//! the file mutex in one critical section so packets are contiguous on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use recap_format::{create_compressor, ApiCallId, Compressor, HandleId};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::file_writer::FileWriter;
use crate::filename;
use crate::memory::{DeviceMemoryWrapper, MappedMemoryEntry, MappedMemoryRange, WHOLE_SIZE};
use crate::packet;
#[cfg(unix)]
use crate::page_guard::PageGuardTracker;
use crate::settings::{CaptureFileOptions, CaptureSettings, MemoryTrackingMode, TrimRange};
use crate::state::{StateTracker, StateWriter};
use crate::thread_data::{self, ParameterEncoder};
use crate::update_template::{
    build_update_template_info, DescriptorUpdateTemplateWrapper, UpdateTemplateEntryCreateInfo,
};

// Frame numbering is one-based.
const FIRST_FRAME: u32 = 1;

bitflags! {
    /// Capture phases compose: `WRITE` and `TRACK` toggle independently, and
    /// both are set while recording a range that later ranges must be able to
    /// snapshot from. Empty means capture is disabled.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CaptureMode: u32 {
        const WRITE = 1 << 0;
        const TRACK = 1 << 1;
    }
}

struct TrimState {
    enabled: bool,
    /// Remaining-frame counts are decremented in place as frames complete.
    ranges: Vec<TrimRange>,
    current_range: usize,
    current_frame: u32,
}

pub struct CaptureManager {
    base_filename: PathBuf,
    file_options: CaptureFileOptions,
    timestamp_filename: bool,
    force_flush: bool,
    memory_tracking_mode: MemoryTrackingMode,
    mode: AtomicU32,
    trim: Mutex<TrimState>,
    file: Mutex<Option<FileWriter>>,
    compressor: Mutex<Option<Arc<dyn Compressor>>>,
    state_tracker: Mutex<Option<Box<dyn StateTracker>>>,
    #[cfg(unix)]
    page_guard: Option<PageGuardTracker>,
    /// Unassisted mode only: live mappings to rewrite at queue submit.
    mapped_memory: Mutex<BTreeMap<u64, MappedMemoryEntry>>,
}

impl CaptureManager {
    /// Build a manager from explicit settings. Initialization failures
    /// (unopenable capture file) disable capture and are logged; the
    /// intercepted application must keep running with a no-op trace, so no
    /// error is surfaced.
    pub fn new(settings: CaptureSettings, state_tracker: Box<dyn StateTracker>) -> Arc<Self> {
        let CaptureSettings {
            base_filename,
            file_options,
            timestamp_filename,
            force_flush,
            memory_tracking_mode,
            trim_ranges,
        } = settings;

        #[cfg_attr(unix, allow(unused_mut))]
        let mut memory_tracking_mode = memory_tracking_mode;
        #[cfg(not(unix))]
        if memory_tracking_mode == MemoryTrackingMode::PageGuard {
            warn!("page-guard memory tracking is unsupported on this platform; using unassisted");
            memory_tracking_mode = MemoryTrackingMode::Unassisted;
        }

        let trim_ranges: Vec<TrimRange> = trim_ranges
            .into_iter()
            .filter(|range| {
                if range.count == 0 {
                    warn!(first = range.first, "ignoring empty trim range");
                    return false;
                }
                true
            })
            .collect();

        let mut trim_enabled = !trim_ranges.is_empty();
        let mut mode = CaptureMode::WRITE;
        let mut initial_target = Some(base_filename.clone());
        if trim_enabled {
            if trim_ranges[0].first == FIRST_FRAME {
                // Capturing from the first frame only needs state tracking
                // when a later range will have to snapshot.
                if trim_ranges.len() > 1 {
                    mode |= CaptureMode::TRACK;
                }
                initial_target = Some(filename::trim_filename(&base_filename, trim_ranges[0]));
            } else {
                mode = CaptureMode::TRACK;
                initial_target = None;
            }
        }

        let mut file = None;
        if let Some(target) = initial_target {
            let path = filename::capture_filename(&target, timestamp_filename);
            match Self::open_capture_file(&path, file_options, force_flush) {
                Ok(writer) => file = Some(writer),
                Err(err) => {
                    error!(error = %err, "failed to initialize capture; capture has been disabled");
                    mode = CaptureMode::empty();
                    trim_enabled = false;
                }
            }
        }

        let compressor = if mode.is_empty() {
            None
        } else {
            create_compressor(file_options.compression_type).map(Arc::from)
        };
        let state_tracker = if mode.contains(CaptureMode::TRACK) {
            Some(state_tracker)
        } else {
            None
        };
        #[cfg(unix)]
        let page_guard = (!mode.is_empty()
            && memory_tracking_mode == MemoryTrackingMode::PageGuard)
            .then(PageGuardTracker::new);

        Arc::new(Self {
            base_filename,
            file_options,
            timestamp_filename,
            force_flush,
            memory_tracking_mode,
            mode: AtomicU32::new(mode.bits()),
            trim: Mutex::new(TrimState {
                enabled: trim_enabled,
                ranges: trim_ranges,
                current_range: 0,
                current_frame: FIRST_FRAME,
            }),
            file: Mutex::new(file),
            compressor: Mutex::new(compressor),
            state_tracker: Mutex::new(state_tracker),
            #[cfg(unix)]
            page_guard,
            mapped_memory: Mutex::new(BTreeMap::new()),
        })
    }

    pub(crate) fn new_disabled() -> Arc<Self> {
        let settings = CaptureSettings::default();
        Arc::new(Self {
            base_filename: settings.base_filename,
            file_options: settings.file_options,
            timestamp_filename: settings.timestamp_filename,
            force_flush: settings.force_flush,
            memory_tracking_mode: settings.memory_tracking_mode,
            mode: AtomicU32::new(CaptureMode::empty().bits()),
            trim: Mutex::new(TrimState {
                enabled: false,
                ranges: Vec::new(),
                current_range: 0,
                current_frame: FIRST_FRAME,
            }),
            file: Mutex::new(None),
            compressor: Mutex::new(None),
            state_tracker: Mutex::new(None),
            #[cfg(unix)]
            page_guard: None,
            mapped_memory: Mutex::new(BTreeMap::new()),
        })
    }

    fn open_capture_file(
        path: &Path,
        options: CaptureFileOptions,
        force_flush: bool,
    ) -> Result<FileWriter> {
        let mut writer = FileWriter::create(path)?;
        info!(path = %path.display(), "recording graphics API capture");
        packet::write_file_header(&mut writer, options.compression_type, force_flush);
        Ok(writer)
    }

    pub fn mode(&self) -> CaptureMode {
        CaptureMode::from_bits_truncate(self.mode.load(Ordering::Acquire))
    }

    fn set_mode_bits(&self, bits: CaptureMode) {
        self.mode.fetch_or(bits.bits(), Ordering::Release);
    }

    fn clear_mode_bits(&self, bits: CaptureMode) {
        self.mode.fetch_and(!bits.bits(), Ordering::Release);
    }

    /// One-based number of the frame currently executing.
    pub fn current_frame(&self) -> u32 {
        self.trim.lock().expect("trim lock poisoned").current_frame
    }

    /// Bytes accounted to the currently open capture file, if any.
    pub fn bytes_written(&self) -> u64 {
        self.file
            .lock()
            .expect("file lock poisoned")
            .as_ref()
            .map(FileWriter::bytes_written)
            .unwrap_or(0)
    }

    /// Begin encoding one API call on the calling thread: records the pending
    /// call id and hands out the thread's parameter encoder.
    pub fn init_api_call_trace(&self, call_id: ApiCallId) -> ParameterEncoder {
        thread_data::take_encoder(call_id)
    }

    /// Finish one API call: frame the encoded parameters (compressed when
    /// strictly beneficial) and append the packet. Outside a write phase the
    /// parameters are discarded. Either way the thread's buffers return to
    /// thread-local storage with their capacity intact.
    pub fn end_api_call_trace(&self, mut encoder: ParameterEncoder) {
        if self.mode().contains(CaptureMode::WRITE) {
            let compressor = self
                .compressor
                .lock()
                .expect("compressor lock poisoned")
                .clone();
            let ParameterEncoder {
                call_id,
                thread_id,
                parameters,
                scratch,
            } = &mut encoder;
            let payload = packet::prepare_payload(compressor.as_deref(), parameters, scratch);
            let mut file = self.file.lock().expect("file lock poisoned");
            if let Some(writer) = file.as_mut() {
                packet::write_function_call(writer, *call_id, *thread_id, payload, self.force_flush);
            }
        }
        thread_data::return_encoder(encoder);
    }

    /// Advance the frame counter and drive trim-range transitions. No-op
    /// unless trimming is configured.
    pub fn end_frame(&self) {
        let mut trim = self.trim.lock().expect("trim lock poisoned");
        if !trim.enabled {
            return;
        }
        trim.current_frame += 1;

        let mode = self.mode();
        if mode.contains(CaptureMode::WRITE) {
            // Recording a range; check for its end.
            let index = trim.current_range;
            trim.ranges[index].count -= 1;
            if trim.ranges[index].count == 0 {
                self.clear_mode_bits(CaptureMode::WRITE);
                *self.file.lock().expect("file lock poisoned") = None;
                info!("finished recording graphics API capture");

                trim.current_range += 1;
                if trim.current_range >= trim.ranges.len() {
                    // Nothing left to capture; release everything.
                    trim.enabled = false;
                    self.mode.store(CaptureMode::empty().bits(), Ordering::Release);
                    *self.state_tracker.lock().expect("state tracker lock poisoned") = None;
                    *self.compressor.lock().expect("compressor lock poisoned") = None;
                } else if trim.ranges[trim.current_range].first == trim.current_frame {
                    // Two consecutive ranges; the next frame starts a new file.
                    self.activate_trimming(&mut trim);
                }
            }
        } else if mode.contains(CaptureMode::TRACK)
            && trim.ranges[trim.current_range].first == trim.current_frame
        {
            self.activate_trimming(&mut trim);
        }
    }

    /// Open the capture file for the current trim range and snapshot live
    /// state into it so the range replays as if from startup.
    fn activate_trimming(&self, trim: &mut TrimState) {
        let range = trim.ranges[trim.current_range];
        let target = filename::trim_filename(&self.base_filename, range);
        let path = filename::capture_filename(&target, self.timestamp_filename);

        match Self::open_capture_file(&path, self.file_options, self.force_flush) {
            Ok(writer) => {
                let thread_id = thread_data::current_thread_id();
                let compressor = self
                    .compressor
                    .lock()
                    .expect("compressor lock poisoned")
                    .clone();
                let mut tracker = self.state_tracker.lock().expect("state tracker lock poisoned");
                let mut file = self.file.lock().expect("file lock poisoned");
                *file = Some(writer);
                self.set_mode_bits(CaptureMode::WRITE);
                if let (Some(tracker), Some(writer)) = (tracker.as_mut(), file.as_mut()) {
                    let mut state_writer =
                        StateWriter::new(writer, compressor.as_deref(), thread_id, self.force_flush);
                    tracker.write_state(&mut state_writer);
                }
            }
            Err(err) => {
                error!(
                    error = %err,
                    "failed to initialize capture for trim range; capture has been disabled"
                );
                trim.enabled = false;
                self.mode.store(CaptureMode::empty().bits(), Ordering::Release);
                *self.state_tracker.lock().expect("state tracker lock poisoned") = None;
                *self.compressor.lock().expect("compressor lock poisoned") = None;
                *self.file.lock().expect("file lock poisoned") = None;
            }
        }
    }

    pub fn write_display_message_cmd(&self, message: &str) {
        if !self.mode().contains(CaptureMode::WRITE) {
            return;
        }
        let thread_id = thread_data::current_thread_id();
        let mut file = self.file.lock().expect("file lock poisoned");
        if let Some(writer) = file.as_mut() {
            packet::write_display_message(writer, thread_id, message, self.force_flush);
        }
    }

    pub fn write_resize_window_cmd(&self, surface_id: HandleId, width: u32, height: u32) {
        if !self.mode().contains(CaptureMode::WRITE) {
            return;
        }
        let thread_id = thread_data::current_thread_id();
        let mut file = self.file.lock().expect("file lock poisoned");
        if let Some(writer) = file.as_mut() {
            packet::write_resize_window(writer, thread_id, surface_id, width, height, self.force_flush);
        }
    }

    /// Record `data` as the contents of `memory_id` at `offset`. The payload
    /// is compressed opportunistically under the same strict benefit rule as
    /// call packets; compression only flips the block type.
    pub fn write_fill_memory_cmd(&self, memory_id: HandleId, offset: u64, data: &[u8]) {
        if !self.mode().contains(CaptureMode::WRITE) {
            return;
        }
        let thread_id = thread_data::current_thread_id();
        let compressor = self
            .compressor
            .lock()
            .expect("compressor lock poisoned")
            .clone();
        thread_data::with_scratch(|scratch| {
            let payload = packet::prepare_payload(compressor.as_deref(), data, scratch);
            let mut file = self.file.lock().expect("file lock poisoned");
            if let Some(writer) = file.as_mut() {
                packet::write_fill_memory(writer, thread_id, memory_id, offset, payload, self.force_flush);
            }
        });
    }

    /// The swapchain's surface extent is the replay window size; record it
    /// before the underlying create runs.
    pub fn pre_process_create_swapchain(&self, surface_id: HandleId, width: u32, height: u32) {
        self.write_resize_window_cmd(surface_id, width, height);
    }

    pub fn post_process_allocate_memory(
        &self,
        success: bool,
        memory: &mut DeviceMemoryWrapper,
        allocation_size: u64,
    ) {
        if !success {
            return;
        }
        if self.mode().contains(CaptureMode::TRACK) {
            let mut tracker = self.state_tracker.lock().expect("state tracker lock poisoned");
            if let Some(tracker) = tracker.as_mut() {
                tracker.track_allocate_memory(memory, allocation_size);
            }
        } else {
            // The state tracker records this while tracking; keep it
            // available for mapped-memory tracking either way.
            memory.allocation_size = allocation_size;
        }
    }

    /// Register a new mapping. In page-guard mode the pointer the application
    /// receives is replaced with the tracker's effective pointer.
    pub fn post_process_map_memory(
        &self,
        success: bool,
        memory: &mut DeviceMemoryWrapper,
        offset: u64,
        size: u64,
        mapped_ptr: &mut *mut u8,
    ) {
        if !success || mapped_ptr.is_null() {
            return;
        }

        if !memory.mapped_data.is_null() {
            warn!(
                memory_id = memory.handle_id.0,
                "memory object has been mapped more than once"
            );
            return;
        }

        if self.mode().contains(CaptureMode::TRACK) {
            let mut tracker = self.state_tracker.lock().expect("state tracker lock poisoned");
            if let Some(tracker) = tracker.as_mut() {
                tracker.track_mapped_memory(memory, *mapped_ptr, offset, size);
            }
        } else {
            memory.mapped_data = *mapped_ptr;
            memory.mapped_offset = offset;
            memory.mapped_size = size;
        }

        match self.memory_tracking_mode {
            MemoryTrackingMode::PageGuard => {
                #[cfg(unix)]
                if let Some(page_guard) = self.page_guard.as_ref() {
                    let mut guard_size = size;
                    if guard_size == WHOLE_SIZE {
                        guard_size = memory.allocation_size;
                    }
                    match usize::try_from(guard_size) {
                        Ok(guard_size) if guard_size > 0 => {
                            *mapped_ptr = page_guard.add_memory(
                                memory.handle_id,
                                *mapped_ptr,
                                guard_size,
                                false,
                            );
                        }
                        Ok(_) => {}
                        Err(_) => warn!(
                            memory_id = memory.handle_id.0,
                            "mapped size does not fit in the address space; writes will not be captured"
                        ),
                    }
                }
            }
            MemoryTrackingMode::Unassisted => {
                let mut mapped = self.mapped_memory.lock().expect("mapped memory lock poisoned");
                mapped.insert(
                    memory.handle_id.0,
                    MappedMemoryEntry {
                        mapped_data: *mapped_ptr,
                        mapped_size: size,
                        allocation_size: memory.allocation_size,
                    },
                );
            }
            MemoryTrackingMode::Assisted => {}
        }
    }

    /// Emit fill-memory packets for application-declared dirty ranges
    /// (assisted) or harvest the page-guard tracker (page-guard).
    pub fn pre_process_flush_mapped_memory_ranges(&self, ranges: &[MappedMemoryRange<'_>]) {
        match self.memory_tracking_mode {
            MemoryTrackingMode::PageGuard => {
                #[cfg(unix)]
                if let Some(page_guard) = self.page_guard.as_ref() {
                    // All dirty pages of an object are processed at once, so
                    // consecutive ranges naming the same object are filtered.
                    let mut last: Option<HandleId> = None;
                    for range in ranges {
                        if last == Some(range.memory.handle_id) {
                            continue;
                        }
                        last = Some(range.memory.handle_id);
                        if range.memory.mapped_data.is_null() {
                            warn!(
                                memory_id = range.memory.handle_id.0,
                                "flush called for memory that is not mapped"
                            );
                            continue;
                        }
                        page_guard.process_memory_entry(
                            range.memory.handle_id,
                            |memory_id, base, range_offset, len| {
                                self.write_fill_from_tracker(memory_id, base, range_offset, len);
                            },
                        );
                    }
                }
            }
            MemoryTrackingMode::Assisted => {
                for range in ranges {
                    if range.memory.mapped_data.is_null() {
                        continue;
                    }
                    // The mapped pointer already includes the mapped offset;
                    // re-base the object-relative range offset onto it.
                    let Some(relative_offset) = range.offset.checked_sub(range.memory.mapped_offset)
                    else {
                        warn!(
                            memory_id = range.memory.handle_id.0,
                            "flush range precedes the mapped offset"
                        );
                        continue;
                    };
                    let mut size = range.size;
                    if size == WHOLE_SIZE {
                        size = range.memory.allocation_size.saturating_sub(range.offset);
                    }
                    let (Ok(rel), Ok(len)) = (usize::try_from(relative_offset), usize::try_from(size))
                    else {
                        continue;
                    };
                    let data = unsafe {
                        std::slice::from_raw_parts(range.memory.mapped_data.add(rel) as *const u8, len)
                    };
                    self.write_fill_memory_cmd(range.memory.handle_id, relative_offset, data);
                }
            }
            MemoryTrackingMode::Unassisted => {}
        }
    }

    pub fn pre_process_unmap_memory(&self, memory: &mut DeviceMemoryWrapper) {
        if memory.mapped_data.is_null() {
            warn!(
                memory_id = memory.handle_id.0,
                "attempting to unmap memory that has not been mapped"
            );
            return;
        }

        let mapped_data = memory.mapped_data;
        let mapped_size = memory.mapped_size;
        let allocation_size = memory.allocation_size;

        if self.mode().contains(CaptureMode::TRACK) {
            let mut tracker = self.state_tracker.lock().expect("state tracker lock poisoned");
            if let Some(tracker) = tracker.as_mut() {
                tracker.track_mapped_memory(memory, std::ptr::null_mut(), 0, 0);
            }
        } else {
            memory.mapped_data = std::ptr::null_mut();
            memory.mapped_offset = 0;
            memory.mapped_size = 0;
        }

        match self.memory_tracking_mode {
            MemoryTrackingMode::PageGuard => {
                #[cfg(unix)]
                if let Some(page_guard) = self.page_guard.as_ref() {
                    page_guard.process_memory_entry(
                        memory.handle_id,
                        |memory_id, base, range_offset, len| {
                            self.write_fill_from_tracker(memory_id, base, range_offset, len);
                        },
                    );
                    page_guard.remove_memory(memory.handle_id);
                }
            }
            MemoryTrackingMode::Unassisted => {
                // Rewrite the whole mapped extent; the mapped pointer already
                // includes the offset, so the fill offset is zero.
                let mut size = mapped_size;
                if size == WHOLE_SIZE {
                    size = allocation_size;
                }
                if let Ok(len) = usize::try_from(size) {
                    let data = unsafe { std::slice::from_raw_parts(mapped_data as *const u8, len) };
                    self.write_fill_memory_cmd(memory.handle_id, 0, data);
                }
                self.mapped_memory
                    .lock()
                    .expect("mapped memory lock poisoned")
                    .remove(&memory.handle_id.0);
            }
            MemoryTrackingMode::Assisted => {}
        }
    }

    /// Freeing memory that is still mapped releases page-guard tracking
    /// resources without emitting a fill command.
    pub fn pre_process_free_memory(&self, memory: &mut DeviceMemoryWrapper) {
        if memory.mapped_data.is_null() {
            return;
        }
        match self.memory_tracking_mode {
            MemoryTrackingMode::PageGuard => {
                #[cfg(unix)]
                if let Some(page_guard) = self.page_guard.as_ref() {
                    page_guard.remove_memory(memory.handle_id);
                }
            }
            MemoryTrackingMode::Unassisted => {}
            MemoryTrackingMode::Assisted => {}
        }
    }

    /// Fill-memory packets for work the GPU is about to consume must precede
    /// the submit's own call packet; shims call this from the submit's
    /// pre-process hook.
    pub fn pre_process_queue_submit(&self) {
        match self.memory_tracking_mode {
            MemoryTrackingMode::PageGuard => {
                #[cfg(unix)]
                if let Some(page_guard) = self.page_guard.as_ref() {
                    page_guard.process_memory_entries(|memory_id, base, range_offset, len| {
                        self.write_fill_from_tracker(memory_id, base, range_offset, len);
                    });
                }
            }
            MemoryTrackingMode::Unassisted => {
                let mapped = self.mapped_memory.lock().expect("mapped memory lock poisoned");
                for (&handle, entry) in mapped.iter() {
                    let mut size = entry.mapped_size;
                    if size == WHOLE_SIZE {
                        size = entry.allocation_size;
                    }
                    if let Ok(len) = usize::try_from(size) {
                        let data = unsafe { std::slice::from_raw_parts(entry.mapped_data, len) };
                        self.write_fill_memory_cmd(HandleId(handle), 0, data);
                    }
                }
            }
            MemoryTrackingMode::Assisted => {}
        }
    }

    pub fn pre_process_create_descriptor_update_template(
        &self,
        success: bool,
        entries: &[UpdateTemplateEntryCreateInfo],
        wrapper: &mut DescriptorUpdateTemplateWrapper,
    ) {
        if !success || entries.is_empty() {
            return;
        }
        wrapper.info = build_update_template_info(entries);
    }

    /// Extension-suffixed alias of the same entry point.
    pub fn pre_process_create_descriptor_update_template_khr(
        &self,
        success: bool,
        entries: &[UpdateTemplateEntryCreateInfo],
        wrapper: &mut DescriptorUpdateTemplateWrapper,
    ) {
        self.pre_process_create_descriptor_update_template(success, entries, wrapper);
    }

    pub fn track_update_descriptor_set_with_template(
        &self,
        set: HandleId,
        wrapper: &DescriptorUpdateTemplateWrapper,
        data: &[u8],
    ) {
        if !self.mode().contains(CaptureMode::TRACK) {
            return;
        }
        let mut tracker = self.state_tracker.lock().expect("state tracker lock poisoned");
        if let Some(tracker) = tracker.as_mut() {
            tracker.track_update_descriptor_set_with_template(set, &wrapper.info, data);
        }
    }

    #[cfg(unix)]
    fn write_fill_from_tracker(&self, memory_id: HandleId, base: *const u8, offset: usize, len: usize) {
        // The tracker only reports ranges inside a registered mapping.
        let data = unsafe { std::slice::from_raw_parts(base.add(offset), len) };
        self.write_fill_memory_cmd(memory_id, offset as u64, data);
    }
}

struct InstanceSlot {
    manager: Option<Arc<CaptureManager>>,
    count: u32,
}

static INSTANCE: Mutex<InstanceSlot> = Mutex::new(InstanceSlot {
    manager: None,
    count: 0,
});

fn init_logging() {
    // An embedding application's subscriber wins; ours is a fallback so the
    // layer still reports problems when loaded into an arbitrary process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Called from the shim that creates the top-level API instance. The first
/// call loads settings, initializes logging and builds the process-wide
/// manager; later calls share it. Every call must be balanced by
/// [`destroy_instance`].
pub fn create_instance<F>(make_state_tracker: F) -> Arc<CaptureManager>
where
    F: FnOnce() -> Box<dyn StateTracker>,
{
    let mut slot = INSTANCE.lock().expect("instance lock poisoned");
    if slot.count == 0 {
        init_logging();
        let manager = match CaptureSettings::from_env() {
            Ok(settings) => CaptureManager::new(settings, make_state_tracker()),
            Err(err) => {
                error!(error = %err, "invalid capture settings; capture has been disabled");
                CaptureManager::new_disabled()
            }
        };
        slot.manager = Some(manager);
    }
    slot.count += 1;
    debug!(count = slot.count, "create instance");
    slot.manager
        .as_ref()
        .expect("instance slot populated above")
        .clone()
}

/// Called from the shim that destroys a top-level API instance. The manager
/// is torn down when the last instance goes away.
pub fn destroy_instance() {
    let mut slot = INSTANCE.lock().expect("instance lock poisoned");
    if slot.count == 0 {
        warn!("destroy_instance called with no live instance");
        return;
    }
    slot.count -= 1;
    debug!(count = slot.count, "destroy instance");
    if slot.count == 0 {
        slot.manager = None;
    }
}

/// Undo the refcount taken by [`create_instance`] when the driver's own
/// instance creation subsequently failed.
pub fn check_create_instance_status(success: bool) {
    if !success {
        destroy_instance();
    }
}

/// The live process-wide manager, if any instance is alive.
pub fn instance() -> Option<Arc<CaptureManager>> {
    INSTANCE.lock().expect("instance lock poisoned").manager.clone()
}
