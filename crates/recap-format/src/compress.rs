//! Block compression port.
//!
//! Writers compress whole packet payloads at a time into a caller-owned
//! scratch buffer; a return of 0 means "failed or not beneficial" and the
//! caller falls back to the uncompressed form.

use crate::error::{FormatError, Result};
use crate::format::CompressionType;

pub trait Compressor: Send + Sync {
    fn algorithm(&self) -> CompressionType;

    /// Compress `src` into `dst`, growing `dst` as needed, and return the
    /// compressed length. Returns 0 when compression failed; callers must
    /// then write the uncompressed payload.
    fn compress(&self, src: &[u8], dst: &mut Vec<u8>) -> usize;
}

pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionType {
        CompressionType::Lz4
    }

    fn compress(&self, src: &[u8], dst: &mut Vec<u8>) -> usize {
        if src.is_empty() {
            return 0;
        }
        // The library exposes the exact worst-case output size for its block
        // format; preallocating that bound makes `compress_into` infallible in
        // practice.
        let bound = lz4_flex::block::get_maximum_output_size(src.len());
        if dst.len() < bound {
            dst.resize(bound, 0);
        }
        lz4_flex::block::compress_into(src, dst).unwrap_or(0)
    }
}

/// Build the compressor for a capture file option. `CompressionType::None`
/// yields no compressor; packets are then always written uncompressed.
pub fn create_compressor(ty: CompressionType) -> Option<Box<dyn Compressor>> {
    match ty {
        CompressionType::None => None,
        CompressionType::Lz4 => Some(Box::new(Lz4Compressor)),
    }
}

/// Decompress a block payload into `dst`, which must already have the
/// uncompressed length recorded in the block.
pub fn decompress_into(ty: CompressionType, src: &[u8], dst: &mut [u8]) -> Result<()> {
    match ty {
        CompressionType::None => Err(FormatError::Corrupt(
            "compressed block in a capture without compression",
        )),
        CompressionType::Lz4 => {
            let written = lz4_flex::block::decompress_into(src, dst)
                .map_err(|_| FormatError::Decompress("lz4 block decode error"))?;
            if written != dst.len() {
                return Err(FormatError::Decompress(
                    "lz4 payload shorter than recorded uncompressed size",
                ));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    #[test]
    fn lz4_roundtrip() {
        let src = vec![7u8; 4096];
        let mut scratch = Vec::new();
        let n = Lz4Compressor.compress(&src, &mut scratch);
        assert!(n > 0 && n < src.len());

        let mut out = vec![0u8; src.len()];
        decompress_into(CompressionType::Lz4, &scratch[..n], &mut out).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn incompressible_payload_still_compresses_but_grows() {
        // Random bytes do not shrink under lz4; the writer's strict
        // less-than rule is what keeps them out of the file.
        let mut src = vec![0u8; 64];
        StdRng::seed_from_u64(0x5EED).fill_bytes(&mut src);
        let mut scratch = Vec::new();
        let n = Lz4Compressor.compress(&src, &mut scratch);
        assert!(n >= src.len());
    }

    #[test]
    fn empty_input_reports_not_beneficial() {
        let mut scratch = Vec::new();
        assert_eq!(Lz4Compressor.compress(&[], &mut scratch), 0);
    }

    #[test]
    fn none_has_no_compressor() {
        assert!(create_compressor(CompressionType::None).is_none());
        assert!(create_compressor(CompressionType::Lz4).is_some());
    }
}
