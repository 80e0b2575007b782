use std::io::{Read, Write};

use crate::error::{FormatError, Result};

pub trait WriteLeExt: Write {
    fn write_u16_le(&mut self, v: u16) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u32_le(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u64_le(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(())
    }
}

impl<T: Write + ?Sized> WriteLeExt for T {}

pub trait ReadLeExt: Read {
    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read exactly `len` bytes into a fresh buffer. `len` originates from
    /// untrusted length fields, so allocation failure is reported as an error
    /// instead of aborting.
    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| FormatError::OutOfMemory { len })?;
        buf.resize(len, 0);
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<T: Read + ?Sized> ReadLeExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_exact_vec_allocation_failure_returns_error() {
        let mut cursor = Cursor::new(Vec::new());
        let err = cursor.read_exact_vec(usize::MAX).unwrap_err();
        assert!(matches!(err, FormatError::OutOfMemory { .. }));
    }

    #[test]
    fn write_read_widths() -> Result<()> {
        let mut buf = Vec::new();
        buf.write_u16_le(0xBEEF)?;
        buf.write_u32_le(0xDEAD_BEEF)?;
        buf.write_u64_le(0x0123_4567_89AB_CDEF)?;
        let mut cursor = Cursor::new(buf);
        assert_eq!(cursor.read_u16_le()?, 0xBEEF);
        assert_eq!(cursor.read_u32_le()?, 0xDEAD_BEEF);
        assert_eq!(cursor.read_u64_le()?, 0x0123_4567_89AB_CDEF);
        Ok(())
    }
}
