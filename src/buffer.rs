//! In-memory scratch buffers used to stage one record at a time.
//!
//! `InputBuffer` exposes a cursor over an owned byte region; `OutputBuffer`
//! is its growable write-side counterpart. Neither performs any I/O. The
//! streaming pipeline reuses one `InputBuffer` per producer as its record
//! arena, so these types are never shared across threads.

use crate::error::{ArchiveError, Result};

/// Cursor-based sequential reader over an owned byte region.
#[derive(Debug, Default)]
pub struct InputBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl InputBuffer {
    pub fn new() -> Self {
        InputBuffer::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        InputBuffer { data, pos: 0 }
    }

    /// Replace the contents with `bytes` and reset the cursor, keeping the
    /// existing allocation when it is large enough.
    pub fn reload(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.pos = 0;
    }

    /// Mutable access for refilling from a reader; resets the cursor.
    pub fn fill_from(&mut self, size: usize) -> &mut Vec<u8> {
        self.data.resize(size, 0);
        self.pos = 0;
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            return Err(short_read());
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        let bytes = self.read_fixed_slice(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.read_fixed_slice(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        let bytes = self.read_fixed_slice(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    /// 16-bit big-endian read, used for the query record flag word.
    pub fn read_u16_be(&mut self) -> Result<u16> {
        let bytes = self.read_fixed_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a variable-width unsigned integer. The width selector comes
    /// from a flag byte: 0 reads one byte, 1 reads two, 2 reads four.
    pub fn read_packed(&mut self, width: u8) -> Result<u32> {
        match width {
            0 => Ok(u32::from(self.read_u8()?)),
            1 => {
                let bytes = self.read_fixed_slice(2)?;
                Ok(u32::from(u16::from_le_bytes([bytes[0], bytes[1]])))
            }
            2 => self.read_u32_le(),
            w => Err(ArchiveError::format(format!(
                "invalid packed width selector {w}"
            ))),
        }
    }

    /// Slice up to (not including) the next zero byte, advancing past the
    /// terminator. Fails with `TruncatedInput` when no terminator exists.
    pub fn read_null_terminated_slice(&mut self) -> Result<&[u8]> {
        let start = self.pos;
        match self.data[start..].iter().position(|&b| b == 0) {
            Some(n) => {
                self.pos = start + n + 1;
                Ok(&self.data[start..start + n])
            }
            None => Err(ArchiveError::TruncatedInput),
        }
    }

    pub fn read_fixed_slice(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(short_read());
        }
        let start = self.pos;
        self.pos = start + n;
        Ok(&self.data[start..start + n])
    }
}

fn short_read() -> ArchiveError {
    ArchiveError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "record buffer exhausted mid-field",
    ))
}

/// Growable write buffer with geometric growth (via `Vec`).
#[derive(Debug, Default)]
pub struct OutputBuffer {
    data: Vec<u8>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        OutputBuffer::default()
    }

    pub fn append_byte(&mut self, b: u8) {
        self.data.push(b);
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append `bytes` followed by a zero terminator.
    pub fn append_string(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.data.push(0);
    }

    pub fn append_i32_le(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn append_u32_le(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn append_i64_le(&mut self, v: i64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn append_u64_le(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn append_u16_be(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    /// Reset the cursor/length to zero without deallocating.
    pub fn rewind(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}
