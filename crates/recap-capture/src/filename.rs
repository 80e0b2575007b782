//! Capture filename construction.
//!
//! Trim captures get a `_frame_N` / `_frames_F_through_L` postfix before the
//! extension; the optional timestamp is applied after that, so a trimmed and
//! timestamped capture reads `base_frames_3_through_4_20260802T101500.rcap`.

use std::path::{Path, PathBuf};

use crate::settings::TrimRange;

pub(crate) fn capture_filename(base: &Path, timestamp: bool) -> PathBuf {
    if timestamp {
        let stamp = format!("_{}", chrono::Local::now().format("%Y%m%dT%H%M%S"));
        insert_filename_postfix(base, &stamp)
    } else {
        base.to_path_buf()
    }
}

pub(crate) fn trim_filename(base: &Path, range: TrimRange) -> PathBuf {
    debug_assert!(range.count > 0);
    let postfix = if range.count == 1 {
        format!("_frame_{}", range.first)
    } else {
        format!(
            "_frames_{}_through_{}",
            range.first,
            range.first + range.count - 1
        )
    };
    insert_filename_postfix(base, &postfix)
}

fn insert_filename_postfix(path: &Path, postfix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{postfix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{postfix}"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_postfix() {
        assert_eq!(
            trim_filename(Path::new("out/cap.rcap"), TrimRange { first: 7, count: 1 }),
            PathBuf::from("out/cap_frame_7.rcap")
        );
    }

    #[test]
    fn multi_frame_postfix() {
        assert_eq!(
            trim_filename(Path::new("cap.rcap"), TrimRange { first: 3, count: 2 }),
            PathBuf::from("cap_frames_3_through_4.rcap")
        );
    }

    #[test]
    fn postfix_without_extension() {
        assert_eq!(
            trim_filename(Path::new("cap"), TrimRange { first: 1, count: 1 }),
            PathBuf::from("cap_frame_1")
        );
    }

    #[test]
    fn timestamp_keeps_extension() {
        let named = capture_filename(Path::new("dir/cap.rcap"), true);
        let name = named.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cap_"));
        assert!(name.ends_with(".rcap"));
        assert_eq!(named.parent(), Some(Path::new("dir")));
    }

    #[test]
    fn no_timestamp_is_identity() {
        assert_eq!(
            capture_filename(Path::new("cap.rcap"), false),
            PathBuf::from("cap.rcap")
        );
    }
}
