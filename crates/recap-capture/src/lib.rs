//! Capture core for a graphics-API interception layer.
//!
//! Generated per-entry-point shims feed this crate: they ask the
//! [`CaptureManager`] for a per-thread [`ParameterEncoder`], encode the
//! intercepted call's parameters, and report the call end, at which point the
//! manager frames and writes a packet (see `recap-format` for the on-disk
//! layout). The manager also owns mapped-memory tracking, the
//! write/track capture phases across trim ranges, and mid-stream state
//! snapshots through an installed [`StateTracker`].

mod error;
mod file_writer;
mod filename;
mod manager;
mod memory;
mod packet;
#[cfg(unix)]
mod page_guard;
mod settings;
mod state;
mod thread_data;
mod update_template;

pub use recap_format::{ApiCallId, CompressionType, HandleId};

pub use crate::error::{CaptureError, Result};
pub use crate::manager::{
    check_create_instance_status, create_instance, destroy_instance, instance, CaptureManager,
    CaptureMode,
};
pub use crate::memory::{DeviceMemoryWrapper, MappedMemoryRange, WHOLE_SIZE};
pub use crate::settings::{
    CaptureFileOptions, CaptureSettings, MemoryTrackingMode, TrimRange, DEFAULT_CAPTURE_FILE,
    ENV_CAPTURE_FILE, ENV_CAPTURE_FRAMES, ENV_COMPRESSION_TYPE, ENV_FORCE_FLUSH,
    ENV_MEMORY_TRACKING_MODE, ENV_TIMESTAMP_FILE,
};
pub use crate::state::{NullStateTracker, StateTracker, StateWriter};
pub use crate::thread_data::ParameterEncoder;
pub use crate::update_template::{
    encode_update_template_data, DescriptorType, DescriptorUpdateTemplateWrapper,
    UpdateTemplateEntry, UpdateTemplateEntryCreateInfo, UpdateTemplateInfo,
    DESCRIPTOR_BUFFER_INFO_SIZE, DESCRIPTOR_IMAGE_INFO_SIZE, TEXEL_BUFFER_VIEW_SIZE,
};
