//! Mapped-memory entities shared with the shim layer.

use recap_format::HandleId;

/// Sentinel meaning "to the end of the allocation" in map/flush sizes.
pub const WHOLE_SIZE: u64 = u64::MAX;

/// Per-allocation bookkeeping owned by the shim layer's handle table and
/// passed to the capture hooks by mutable reference.
///
/// When state tracking is off the capture core fills the mapped-state fields
/// itself; when tracking is on, the installed
/// [`StateTracker`](crate::StateTracker) does. The two paths are mutually
/// exclusive.
#[derive(Debug)]
pub struct DeviceMemoryWrapper {
    pub handle_id: HandleId,
    pub allocation_size: u64,
    /// Host pointer returned by the driver's map call; null while unmapped.
    pub mapped_data: *mut u8,
    pub mapped_offset: u64,
    /// Size passed at map time. May be [`WHOLE_SIZE`]; recorded unresolved.
    pub mapped_size: u64,
}

impl DeviceMemoryWrapper {
    pub fn new(handle_id: HandleId) -> Self {
        Self {
            handle_id,
            allocation_size: 0,
            mapped_data: std::ptr::null_mut(),
            mapped_offset: 0,
            mapped_size: 0,
        }
    }
}

// The raw pointer belongs to the application's mapping; the shim layer's
// handle table owns the wrapper and serializes access to it.
unsafe impl Send for DeviceMemoryWrapper {}
unsafe impl Sync for DeviceMemoryWrapper {}

/// One flushed range of a mapped allocation. `offset` is relative to the
/// start of the memory object, not the mapped pointer.
pub struct MappedMemoryRange<'a> {
    pub memory: &'a DeviceMemoryWrapper,
    pub offset: u64,
    pub size: u64,
}

/// Snapshot of a live mapping, kept by value in the unassisted-mode mapped
/// set so queue submits can rewrite every mapped region without touching the
/// shim's wrappers.
pub(crate) struct MappedMemoryEntry {
    pub(crate) mapped_data: *const u8,
    pub(crate) mapped_size: u64,
    pub(crate) allocation_size: u64,
}

// Entries only live while the shim reports the memory as mapped; the pointer
// is read under the mapped-memory mutex.
unsafe impl Send for MappedMemoryEntry {}
