//! Page-guard dirty-memory tracker.
//!
//! Registered regions are protected read-only; the first write to a page
//! faults, the fault handler marks the page dirty and restores write access,
//! and the next harvest re-protects the page and reports contiguous dirty
//! byte ranges. Registration can substitute a page-aligned shadow buffer for
//! the real mapping; the application then writes the shadow and harvests copy
//! dirty ranges back before reporting them.
//!
//! The fault handler consults a process-global region table and forwards
//! faults outside every region to whichever handler was installed before
//! ours. Handler code is restricted to the region lock, atomics and
//! `mprotect`; it never allocates.

use std::alloc::{alloc, dealloc, Layout};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use recap_format::HandleId;
use tracing::{error, warn};

pub(crate) struct PageGuardTracker {
    tracker_id: u64,
}

struct ShadowAllocation {
    ptr: *mut u8,
    layout: Layout,
}

impl Drop for ShadowAllocation {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

struct GuardedRegion {
    memory_id: HandleId,
    tracker_id: u64,
    /// The application's real mapped pointer; target of shadow write-back.
    real_base: *mut u8,
    /// Base of the bytes the application actually writes (shadow or real).
    data_base: *mut u8,
    size: usize,
    /// Page-aligned protected span covering `data_base..data_base + size`.
    guard_start: usize,
    guard_len: usize,
    page_size: usize,
    dirty: Vec<AtomicBool>,
    shadow: Option<ShadowAllocation>,
}

// The pointers refer to an application mapping (or our shadow allocation)
// that stays valid until remove_memory; dirty flags are atomics and the byte
// contents are serialized by the page-protection discipline itself.
unsafe impl Send for GuardedRegion {}
unsafe impl Sync for GuardedRegion {}

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(1);

static REGIONS: OnceLock<RwLock<Vec<Arc<GuardedRegion>>>> = OnceLock::new();

fn regions() -> &'static RwLock<Vec<Arc<GuardedRegion>>> {
    REGIONS.get_or_init(|| RwLock::new(Vec::new()))
}

fn host_page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    })
}

struct PrevActions {
    segv: libc::sigaction,
    bus: libc::sigaction,
}

static PREV_ACTIONS: OnceLock<PrevActions> = OnceLock::new();

fn install_fault_handler() {
    PREV_ACTIONS.get_or_init(|| unsafe {
        let handler: unsafe extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
            fault_handler;
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        action.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut action.sa_mask);

        let mut segv: libc::sigaction = std::mem::zeroed();
        libc::sigaction(libc::SIGSEGV, &action, &mut segv);
        let mut bus: libc::sigaction = std::mem::zeroed();
        libc::sigaction(libc::SIGBUS, &action, &mut bus);
        PrevActions { segv, bus }
    });
}

unsafe extern "C" fn fault_handler(
    sig: libc::c_int,
    info: *mut libc::siginfo_t,
    ctx: *mut libc::c_void,
) {
    if !info.is_null() {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let addr = (*info).si_addr() as usize;
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let addr = (*info).si_addr as usize;
        if addr != 0 && mark_page_dirty(addr) {
            return;
        }
    }
    forward_fault(sig, info, ctx);
}

/// Returns true when `addr` hit a guarded page, which is then marked dirty
/// and made writable so the faulting store can retry.
fn mark_page_dirty(addr: usize) -> bool {
    // Only look at the table; the handler must never run the initializer.
    let Some(regions) = REGIONS.get() else {
        return false;
    };
    let Ok(regions) = regions.read() else {
        return false;
    };
    for region in regions.iter() {
        if addr < region.guard_start || addr >= region.guard_start + region.guard_len {
            continue;
        }
        let page_index = (addr - region.guard_start) / region.page_size;
        region.dirty[page_index].store(true, Ordering::Release);
        let page_addr = region.guard_start + page_index * region.page_size;
        unsafe {
            libc::mprotect(
                page_addr as *mut libc::c_void,
                region.page_size,
                libc::PROT_READ | libc::PROT_WRITE,
            );
        }
        return true;
    }
    false
}

unsafe fn forward_fault(sig: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    let prev = match PREV_ACTIONS.get() {
        Some(prev) if sig == libc::SIGBUS => &prev.bus,
        Some(prev) => &prev.segv,
        None => return,
    };
    let handler = prev.sa_sigaction;
    if handler == libc::SIG_IGN {
        return;
    }
    if handler == libc::SIG_DFL {
        // Reinstall the default action; returning re-executes the faulting
        // instruction and the process terminates the normal way.
        libc::sigaction(sig, prev, std::ptr::null_mut());
        return;
    }
    if prev.sa_flags & libc::SA_SIGINFO != 0 {
        let f: unsafe extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
            std::mem::transmute(handler);
        f(sig, info, ctx);
    } else {
        let f: unsafe extern "C" fn(libc::c_int) = std::mem::transmute(handler);
        f(sig);
    }
}

impl PageGuardTracker {
    pub(crate) fn new() -> Self {
        install_fault_handler();
        Self {
            tracker_id: NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Begin tracking `size` bytes at `mapped`, returning the pointer the
    /// application should use (the shadow buffer when `use_shadow` is set).
    pub(crate) fn add_memory(
        &self,
        memory_id: HandleId,
        mapped: *mut u8,
        size: usize,
        use_shadow: bool,
    ) -> *mut u8 {
        if mapped.is_null() || size == 0 {
            warn!(memory_id = memory_id.0, "refusing to track an empty mapping");
            return mapped;
        }

        {
            let regions = regions().read().expect("page guard region lock poisoned");
            if let Some(existing) = regions
                .iter()
                .find(|r| r.tracker_id == self.tracker_id && r.memory_id == memory_id)
            {
                warn!(memory_id = memory_id.0, "memory is already tracked");
                return existing.data_base;
            }
        }

        let page_size = host_page_size();
        let (data_base, guard_start, guard_len, shadow) = if use_shadow {
            let guard_len = size.next_multiple_of(page_size);
            let Ok(layout) = Layout::from_size_align(guard_len, page_size) else {
                error!(memory_id = memory_id.0, "shadow layout overflow; tracking without shadow");
                return self.add_memory(memory_id, mapped, size, false);
            };
            let ptr = unsafe { alloc(layout) };
            if ptr.is_null() {
                error!(memory_id = memory_id.0, "shadow allocation failed; tracking without shadow");
                return self.add_memory(memory_id, mapped, size, false);
            }
            // Prime the shadow with the current mapped contents so reads
            // through the substituted pointer observe the driver's data.
            unsafe { std::ptr::copy_nonoverlapping(mapped, ptr, size) };
            (ptr, ptr as usize, guard_len, Some(ShadowAllocation { ptr, layout }))
        } else {
            let addr = mapped as usize;
            let guard_start = addr - addr % page_size;
            let guard_end = (addr + size).next_multiple_of(page_size);
            (mapped, guard_start, guard_end - guard_start, None)
        };

        let page_count = guard_len / page_size;
        let mut dirty = Vec::with_capacity(page_count);
        dirty.resize_with(page_count, || AtomicBool::new(false));

        let region = Arc::new(GuardedRegion {
            memory_id,
            tracker_id: self.tracker_id,
            real_base: mapped,
            data_base,
            size,
            guard_start,
            guard_len,
            page_size,
            dirty,
            shadow,
        });

        // Register before protecting so a fault can never observe a guarded
        // page the handler does not know about.
        regions()
            .write()
            .expect("page guard region lock poisoned")
            .push(region);

        let rc = unsafe {
            libc::mprotect(
                guard_start as *mut libc::c_void,
                guard_len,
                libc::PROT_READ,
            )
        };
        if rc != 0 {
            error!(
                memory_id = memory_id.0,
                error = %std::io::Error::last_os_error(),
                "failed to write-protect mapped memory; writes will not be captured"
            );
        }

        data_base
    }

    /// Visit every dirty sub-range of one tracked region and mark it clean.
    /// The visitor receives `(memory_id, data_base, offset, len)`; the bytes
    /// live at `data_base + offset`.
    pub(crate) fn process_memory_entry(
        &self,
        memory_id: HandleId,
        mut visitor: impl FnMut(HandleId, *const u8, usize, usize),
    ) {
        let regions = regions().read().expect("page guard region lock poisoned");
        for region in regions.iter() {
            if region.tracker_id == self.tracker_id && region.memory_id == memory_id {
                harvest_region(region, &mut visitor);
                return;
            }
        }
        warn!(memory_id = memory_id.0, "memory is not tracked");
    }

    /// Visit dirty sub-ranges of every region this tracker owns.
    pub(crate) fn process_memory_entries(
        &self,
        mut visitor: impl FnMut(HandleId, *const u8, usize, usize),
    ) {
        let regions = regions().read().expect("page guard region lock poisoned");
        for region in regions.iter() {
            if region.tracker_id == self.tracker_id {
                harvest_region(region, &mut visitor);
            }
        }
    }

    /// Stop tracking; subsequent host writes are not observed. Shadow memory
    /// is released, so a substituted pointer must not be used afterwards.
    pub(crate) fn remove_memory(&self, memory_id: HandleId) {
        let mut regions = regions().write().expect("page guard region lock poisoned");
        let Some(index) = regions
            .iter()
            .position(|r| r.tracker_id == self.tracker_id && r.memory_id == memory_id)
        else {
            warn!(memory_id = memory_id.0, "memory is not tracked");
            return;
        };
        let region = regions.swap_remove(index);
        unprotect_region(&region);
    }
}

impl Drop for PageGuardTracker {
    fn drop(&mut self) {
        let mut regions = regions().write().expect("page guard region lock poisoned");
        regions.retain(|region| {
            if region.tracker_id != self.tracker_id {
                return true;
            }
            unprotect_region(region);
            false
        });
    }
}

fn unprotect_region(region: &GuardedRegion) {
    unsafe {
        libc::mprotect(
            region.guard_start as *mut libc::c_void,
            region.guard_len,
            libc::PROT_READ | libc::PROT_WRITE,
        );
    }
}

fn harvest_region(region: &GuardedRegion, visitor: &mut impl FnMut(HandleId, *const u8, usize, usize)) {
    let page_count = region.dirty.len();
    let data_start = region.data_base as usize;
    let data_end = data_start + region.size;

    let mut page = 0;
    while page < page_count {
        if !region.dirty[page].swap(false, Ordering::AcqRel) {
            page += 1;
            continue;
        }
        let run_start = page;
        page += 1;
        while page < page_count && region.dirty[page].swap(false, Ordering::AcqRel) {
            page += 1;
        }
        let run_end = page;

        // Revoke write access before reading so stores racing this harvest
        // fault again and land in the next one.
        unsafe {
            libc::mprotect(
                (region.guard_start + run_start * region.page_size) as *mut libc::c_void,
                (run_end - run_start) * region.page_size,
                libc::PROT_READ,
            );
        }

        let run_bytes_start = region.guard_start + run_start * region.page_size;
        let run_bytes_end = region.guard_start + run_end * region.page_size;
        let begin = run_bytes_start.max(data_start);
        let end = run_bytes_end.min(data_end);
        if begin >= end {
            continue;
        }
        let offset = begin - data_start;
        let len = end - begin;

        if region.shadow.is_some() {
            // Keep the driver's mapping observationally identical to what the
            // application wrote through the shadow.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    region.data_base.add(offset) as *const u8,
                    region.real_base.add(offset),
                    len,
                );
            }
        }

        visitor(region.memory_id, region.data_base as *const u8, offset, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::alloc_zeroed;

    struct AlignedBuf {
        ptr: *mut u8,
        layout: Layout,
    }

    impl AlignedBuf {
        fn new(len: usize) -> Self {
            let layout = Layout::from_size_align(len, host_page_size()).unwrap();
            let ptr = unsafe { alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            Self { ptr, layout }
        }
    }

    impl Drop for AlignedBuf {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr, self.layout) };
        }
    }

    fn collect_ranges(
        tracker: &PageGuardTracker,
        memory_id: HandleId,
    ) -> Vec<(usize, usize, Vec<u8>)> {
        let mut ranges = Vec::new();
        tracker.process_memory_entry(memory_id, |_, base, offset, len| {
            let bytes = unsafe { std::slice::from_raw_parts(base.add(offset), len) }.to_vec();
            ranges.push((offset, len, bytes));
        });
        ranges
    }

    #[test]
    fn reports_only_the_dirty_page() {
        let page = host_page_size();
        let buf = AlignedBuf::new(2 * page);
        let tracker = PageGuardTracker::new();
        let memory_id = HandleId(0x1001);

        let effective = tracker.add_memory(memory_id, buf.ptr, 2 * page, false);
        assert_eq!(effective, buf.ptr);

        unsafe { effective.add(page + 5).write(0xCD) };

        let ranges = collect_ranges(&tracker, memory_id);
        assert_eq!(ranges.len(), 1);
        let (offset, len, bytes) = &ranges[0];
        assert_eq!(*offset, page);
        assert_eq!(*len, page);
        assert_eq!(bytes[5], 0xCD);

        // Clean after harvest.
        assert!(collect_ranges(&tracker, memory_id).is_empty());
        tracker.remove_memory(memory_id);
    }

    #[test]
    fn adjacent_dirty_pages_coalesce_into_one_range() {
        let page = host_page_size();
        let buf = AlignedBuf::new(2 * page);
        let tracker = PageGuardTracker::new();
        let memory_id = HandleId(0x1002);

        let effective = tracker.add_memory(memory_id, buf.ptr, 2 * page, false);
        unsafe {
            effective.add(100).write(0x11);
            effective.add(page + 10).write(0x22);
        }

        let ranges = collect_ranges(&tracker, memory_id);
        assert_eq!(ranges.len(), 1);
        let (offset, len, bytes) = &ranges[0];
        assert_eq!(*offset, 0);
        assert_eq!(*len, 2 * page);
        assert_eq!(bytes[100], 0x11);
        assert_eq!(bytes[page + 10], 0x22);
        tracker.remove_memory(memory_id);
    }

    #[test]
    fn ranges_clamp_to_the_registered_size() {
        let page = host_page_size();
        let size = page + 100;
        let buf = AlignedBuf::new(2 * page);
        let tracker = PageGuardTracker::new();
        let memory_id = HandleId(0x1003);

        let effective = tracker.add_memory(memory_id, buf.ptr, size, false);
        unsafe { effective.add(size - 1).write(0xEE) };

        let ranges = collect_ranges(&tracker, memory_id);
        assert_eq!(ranges.len(), 1);
        let (offset, len, bytes) = &ranges[0];
        assert_eq!(*offset, page);
        assert_eq!(*len, 100);
        assert_eq!(bytes[99], 0xEE);
        tracker.remove_memory(memory_id);
    }

    #[test]
    fn shadow_substitutes_and_writes_back() {
        let page = host_page_size();
        let buf = AlignedBuf::new(page);
        unsafe { std::ptr::write_bytes(buf.ptr, 0xAA, page) };
        let tracker = PageGuardTracker::new();
        let memory_id = HandleId(0x1004);

        let effective = tracker.add_memory(memory_id, buf.ptr, page, true);
        assert_ne!(effective, buf.ptr);
        // Shadow is primed with the mapped contents.
        assert_eq!(unsafe { effective.read() }, 0xAA);

        unsafe { effective.add(7).write(0x55) };
        let ranges = collect_ranges(&tracker, memory_id);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].2[7], 0x55);
        // Harvest copied the dirty range back to the real mapping.
        assert_eq!(unsafe { buf.ptr.add(7).read() }, 0x55);
        assert_eq!(unsafe { buf.ptr.add(8).read() }, 0xAA);

        tracker.remove_memory(memory_id);
    }

    #[test]
    fn removed_memory_is_no_longer_observed() {
        let page = host_page_size();
        let buf = AlignedBuf::new(page);
        let tracker = PageGuardTracker::new();
        let memory_id = HandleId(0x1005);

        tracker.add_memory(memory_id, buf.ptr, page, false);
        tracker.remove_memory(memory_id);

        unsafe { buf.ptr.write(0x77) };
        tracker.process_memory_entry(memory_id, |_, _, _, _| {
            panic!("untracked memory must not report ranges");
        });
    }

    #[test]
    fn trackers_only_see_their_own_regions() {
        let page = host_page_size();
        let buf_a = AlignedBuf::new(page);
        let buf_b = AlignedBuf::new(page);
        let tracker_a = PageGuardTracker::new();
        let tracker_b = PageGuardTracker::new();

        tracker_a.add_memory(HandleId(0x1006), buf_a.ptr, page, false);
        tracker_b.add_memory(HandleId(0x1007), buf_b.ptr, page, false);
        unsafe {
            buf_a.ptr.write(1);
            buf_b.ptr.write(2);
        }

        let mut seen = Vec::new();
        tracker_a.process_memory_entries(|id, _, _, _| seen.push(id));
        assert_eq!(seen, vec![HandleId(0x1006)]);

        tracker_a.remove_memory(HandleId(0x1006));
        tracker_b.remove_memory(HandleId(0x1007));
    }
}
