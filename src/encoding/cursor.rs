//! Cursor-based little-endian reader and writer over a block buffer

use crate::error::{Error, Result};

/// Writes little-endian fields into a fixed-size block
///
/// The block is always allocated to its final size by the caller, so writes
/// past the end are layout bugs and panic.
pub struct BlockWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BlockWriter<'a> {
    /// Create a writer positioned at the start of `buf`
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current write offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the write offset
    pub fn seek(&mut self, pos: usize) {
        assert!(pos <= self.buf.len(), "seek to {} past block end {}", pos, self.buf.len());
        self.pos = pos;
    }

    /// Total size of the underlying block
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the underlying block is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write one byte
    pub fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    /// Write a little-endian `i32`
    pub fn put_i32(&mut self, value: i32) {
        self.put_bytes(&value.to_le_bytes());
    }

    /// Write a little-endian `i64`
    pub fn put_i64(&mut self, value: i64) {
        self.put_bytes(&value.to_le_bytes());
    }

    /// Copy raw bytes at the current offset and advance
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    /// Write raw bytes at an absolute offset without moving the cursor
    pub fn put_bytes_at(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// Reads little-endian fields from a block
pub struct BlockReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    /// Create a reader positioned at the start of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the read offset; bounds are checked on the next read
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Total size of the underlying block
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the underlying block is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Read one byte
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.get_bytes(1)?[0])
    }

    /// Read a little-endian `i32`
    pub fn get_i32(&mut self) -> Result<i32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.get_bytes(4)?);
        Ok(i32::from_le_bytes(raw))
    }

    /// Read a little-endian `i64`
    pub fn get_i64(&mut self) -> Result<i64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.get_bytes(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    /// Borrow `len` bytes at the current offset and advance
    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.bytes_at(self.pos, len)?;
        self.pos += len;
        Ok(bytes)
    }

    /// Borrow `len` bytes at an absolute offset without moving the cursor
    pub fn bytes_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                Error::CorruptData(format!(
                    "read of {} bytes at offset {} overruns {}-byte block",
                    len,
                    offset,
                    self.buf.len()
                ))
            })?;
        Ok(&self.buf[offset..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut block = [0u8; 12];
        let mut writer = BlockWriter::new(&mut block);
        writer.put_i32(0x0102_0304);
        writer.put_i64(-2);
        assert_eq!(&block[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&block[4..12], &[0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_reader_overrun_is_corrupt_data() {
        let block = [0u8; 6];
        let mut reader = BlockReader::new(&block);
        assert!(reader.get_i32().is_ok());
        assert!(matches!(reader.get_i32(), Err(Error::CorruptData(_))));
        assert!(matches!(reader.bytes_at(usize::MAX, 2), Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_put_bytes_at_keeps_cursor() {
        let mut block = [0u8; 8];
        let mut writer = BlockWriter::new(&mut block);
        writer.put_u8(1);
        writer.put_bytes_at(6, &[9, 9]);
        assert_eq!(writer.position(), 1);
        assert_eq!(block, [1, 0, 0, 0, 0, 0, 9, 9]);
    }

    #[test]
    #[should_panic]
    fn test_writer_overrun_panics() {
        let mut block = [0u8; 2];
        let mut writer = BlockWriter::new(&mut block);
        writer.put_i32(1);
    }
}
