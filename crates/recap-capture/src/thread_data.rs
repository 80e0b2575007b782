//! Per-thread capture context.
//!
//! Each thread owns a reusable parameter buffer and compression scratch
//! buffer, plus a stable logical thread id recorded in every packet it
//! writes. The buffers move out of thread-local storage for the duration of
//! one API call (as a [`ParameterEncoder`]) and move back when the call ends,
//! so encoding never synchronizes with other threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::thread;

use recap_format::{ApiCallId, HandleId};

/// Issues dense logical thread ids, starting at 1. Id 0 is reserved and never
/// issued. The os-thread → logical-id mapping is injective and stable for the
/// life of the allocator.
pub(crate) struct ThreadIdAllocator {
    next_id: u64,
    ids: HashMap<thread::ThreadId, u64>,
}

impl ThreadIdAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            ids: HashMap::new(),
        }
    }

    pub(crate) fn id_for(&mut self, os_id: thread::ThreadId) -> u64 {
        if let Some(&id) = self.ids.get(&os_id) {
            return id;
        }
        self.next_id += 1;
        self.ids.insert(os_id, self.next_id);
        self.next_id
    }
}

fn global_thread_ids() -> &'static Mutex<ThreadIdAllocator> {
    static THREAD_IDS: OnceLock<Mutex<ThreadIdAllocator>> = OnceLock::new();
    THREAD_IDS.get_or_init(|| Mutex::new(ThreadIdAllocator::new()))
}

#[derive(Default)]
struct Buffers {
    parameters: Vec<u8>,
    scratch: Vec<u8>,
}

struct ThreadData {
    thread_id: u64,
    // None while an encoder is checked out for an in-flight call.
    buffers: Option<Buffers>,
}

impl ThreadData {
    fn new() -> Self {
        let os_id = thread::current().id();
        let thread_id = global_thread_ids()
            .lock()
            .expect("thread id map lock poisoned")
            .id_for(os_id);
        Self {
            thread_id,
            buffers: Some(Buffers::default()),
        }
    }
}

thread_local! {
    static THREAD_DATA: RefCell<ThreadData> = RefCell::new(ThreadData::new());
}

pub(crate) fn current_thread_id() -> u64 {
    THREAD_DATA.with(|td| td.borrow().thread_id)
}

pub(crate) fn take_encoder(call_id: ApiCallId) -> ParameterEncoder {
    THREAD_DATA.with(|td| {
        let mut td = td.borrow_mut();
        let thread_id = td.thread_id;
        let buffers = td.buffers.take().unwrap_or_default();
        ParameterEncoder {
            call_id,
            thread_id,
            parameters: buffers.parameters,
            scratch: buffers.scratch,
        }
    })
}

pub(crate) fn return_encoder(encoder: ParameterEncoder) {
    let mut buffers = Buffers {
        parameters: encoder.parameters,
        scratch: encoder.scratch,
    };
    // Length resets, capacity stays for the next call.
    buffers.parameters.clear();
    THREAD_DATA.with(|td| td.borrow_mut().buffers = Some(buffers));
}

/// Run `f` with this thread's compression scratch buffer. Falls back to a
/// temporary buffer in the unlikely case the thread's buffers are checked out
/// by an in-flight encoder.
pub(crate) fn with_scratch<R>(f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
    THREAD_DATA.with(|td| {
        let mut td = td.borrow_mut();
        match td.buffers.as_mut() {
            Some(buffers) => f(&mut buffers.scratch),
            None => f(&mut Vec::new()),
        }
    })
}

/// Byte sink for one API call's parameters. Produced by
/// `CaptureManager::init_api_call_trace` and consumed by
/// `CaptureManager::end_api_call_trace`; the shim layer encodes every
/// parameter of the intercepted call between the two.
pub struct ParameterEncoder {
    pub(crate) call_id: ApiCallId,
    pub(crate) thread_id: u64,
    pub(crate) parameters: Vec<u8>,
    pub(crate) scratch: Vec<u8>,
}

impl ParameterEncoder {
    pub fn call_id(&self) -> ApiCallId {
        self.call_id
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn parameter_size(&self) -> usize {
        self.parameters.len()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.parameters.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.parameters.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.parameters.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.parameters.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.parameters.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.parameters.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.parameters.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_handle_id(&mut self, v: HandleId) {
        self.write_u64(v.0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.parameters.extend_from_slice(bytes);
    }
}
