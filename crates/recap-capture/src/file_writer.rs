//! Append-only capture file stream.
//!
//! Write errors never reach the captured application: a failed write is
//! logged, reflected in the byte counter, and not retried. The file then ends
//! mid-stream, which downstream tooling treats as a valid prefix.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::error;

use crate::error::{CaptureError, Result};

pub(crate) struct FileWriter {
    out: BufWriter<File>,
    path: PathBuf,
    bytes_written: u64,
}

impl FileWriter {
    pub(crate) fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| CaptureError::CreateFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            bytes_written: 0,
        })
    }

    /// Write `bytes`, returning how many were accounted. Callers writing a
    /// packet must keep the header+payload pair inside one file-mutex
    /// critical section so packets stay contiguous on disk.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> usize {
        match self.out.write_all(bytes) {
            Ok(()) => {
                self.bytes_written += bytes.len() as u64;
                bytes.len()
            }
            Err(err) => {
                error!(
                    path = %self.path.display(),
                    error = %err,
                    "capture file write failed; the capture will be truncated"
                );
                0
            }
        }
    }

    pub(crate) fn flush(&mut self) {
        if let Err(err) = self.out.flush() {
            error!(path = %self.path.display(), error = %err, "capture file flush failed");
        }
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
