//! Capture settings.
//!
//! Settings come from the environment when the capture layer is loaded into
//! an arbitrary application (`RECAP_*` variables); embedders and tests build
//! a [`CaptureSettings`] directly. Malformed values are ignored with a
//! warning so a typo cannot take the application down — except for an unknown
//! compression algorithm, which is a configuration error that disables
//! capture entirely.

use std::path::PathBuf;

use recap_format::CompressionType;
use tracing::warn;

use crate::error::{CaptureError, Result};

pub const ENV_CAPTURE_FILE: &str = "RECAP_CAPTURE_FILE";
pub const ENV_COMPRESSION_TYPE: &str = "RECAP_COMPRESSION_TYPE";
pub const ENV_MEMORY_TRACKING_MODE: &str = "RECAP_MEMORY_TRACKING_MODE";
pub const ENV_CAPTURE_FRAMES: &str = "RECAP_CAPTURE_FRAMES";
pub const ENV_TIMESTAMP_FILE: &str = "RECAP_TIMESTAMP_FILE";
pub const ENV_FORCE_FLUSH: &str = "RECAP_FORCE_FLUSH";

pub const DEFAULT_CAPTURE_FILE: &str = "recap_capture.rcap";

/// How mapped-memory writes are turned into fill-memory packets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryTrackingMode {
    /// Guard mapped pages and harvest dirty ranges on flush/submit/unmap.
    #[default]
    PageGuard,
    /// Trust the application's explicit flush ranges.
    Assisted,
    /// No hints: rewrite every mapped region at queue submit and unmap.
    Unassisted,
}

impl MemoryTrackingMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "page-guard" => Some(Self::PageGuard),
            "assisted" => Some(Self::Assisted),
            "unassisted" => Some(Self::Unassisted),
            _ => None,
        }
    }
}

/// Options recorded in the capture-file header.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaptureFileOptions {
    pub compression_type: CompressionType,
}

/// One frame range to record when trimming. `count` must be nonzero.
///
/// Ranges are processed in list order and assumed non-overlapping and
/// monotonically increasing; the behavior of overlapping or unsorted lists is
/// undefined (they are neither validated nor re-sorted).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrimRange {
    pub first: u32,
    pub count: u32,
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub base_filename: PathBuf,
    pub file_options: CaptureFileOptions,
    pub timestamp_filename: bool,
    pub force_flush: bool,
    pub memory_tracking_mode: MemoryTrackingMode,
    pub trim_ranges: Vec<TrimRange>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            base_filename: PathBuf::from(DEFAULT_CAPTURE_FILE),
            file_options: CaptureFileOptions {
                compression_type: CompressionType::Lz4,
            },
            timestamp_filename: true,
            force_flush: false,
            memory_tracking_mode: MemoryTrackingMode::default(),
            trim_ranges: Vec::new(),
        }
    }
}

impl CaptureSettings {
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(value) = read_env(ENV_CAPTURE_FILE) {
            settings.base_filename = PathBuf::from(value);
        }

        if let Some(value) = read_env(ENV_COMPRESSION_TYPE) {
            match CompressionType::from_name(&value) {
                Some(ty) => settings.file_options.compression_type = ty,
                None => return Err(CaptureError::UnknownCompression(value)),
            }
        }

        if let Some(value) = read_env(ENV_MEMORY_TRACKING_MODE) {
            match MemoryTrackingMode::from_name(&value) {
                Some(mode) => settings.memory_tracking_mode = mode,
                None => warn!(
                    env_var = ENV_MEMORY_TRACKING_MODE,
                    value = %value,
                    "ignoring unknown memory tracking mode"
                ),
            }
        }

        if let Some(value) = read_env(ENV_CAPTURE_FRAMES) {
            match parse_trim_ranges(&value) {
                Some(ranges) => settings.trim_ranges = ranges,
                None => warn!(
                    env_var = ENV_CAPTURE_FRAMES,
                    value = %value,
                    "ignoring malformed frame range list"
                ),
            }
        }

        if let Some(value) = read_env(ENV_TIMESTAMP_FILE) {
            match parse_bool(&value) {
                Some(flag) => settings.timestamp_filename = flag,
                None => warn!(env_var = ENV_TIMESTAMP_FILE, value = %value, "ignoring non-boolean value"),
            }
        }

        if let Some(value) = read_env(ENV_FORCE_FLUSH) {
            match parse_bool(&value) {
                Some(flag) => settings.force_flush = flag,
                None => warn!(env_var = ENV_FORCE_FLUSH, value = %value, "ignoring non-boolean value"),
            }
        }

        Ok(settings)
    }
}

fn read_env(var: &'static str) -> Option<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        Ok(_) => None,
        Err(std::env::VarError::NotPresent) => None,
        Err(std::env::VarError::NotUnicode(_)) => {
            warn!(env_var = var, "ignoring {var} because it is not valid unicode");
            None
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `"1,5-8,20"` into trim ranges. A bare frame number is a one-frame
/// range; `F-L` is inclusive on both ends. Frames are 1-based.
fn parse_trim_ranges(value: &str) -> Option<Vec<TrimRange>> {
    let mut ranges = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        let range = match part.split_once('-') {
            Some((first, last)) => {
                let first: u32 = first.trim().parse().ok()?;
                let last: u32 = last.trim().parse().ok()?;
                if first == 0 || last < first {
                    return None;
                }
                TrimRange {
                    first,
                    count: last - first + 1,
                }
            }
            None => {
                let first: u32 = part.parse().ok()?;
                if first == 0 {
                    return None;
                }
                TrimRange { first, count: 1 }
            }
        };
        ranges.push(range);
    }
    if ranges.is_empty() {
        return None;
    }
    Some(ranges)
}
