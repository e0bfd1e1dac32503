//! Bounds-checked primitive reads over one chunk of a recording.
//!
//! All multi-byte fixed-width integers are big-endian. Variable-length
//! integers use little-endian 7-bit groups with the high bit of each byte as
//! the continuation flag.

use crate::{ParseError, Result};

/// String encoding tags.
const STRING_NULL: i8 = 0;
const STRING_EMPTY: i8 = 1;
pub(crate) const STRING_UTF8: i8 = 3;
const STRING_CHARS: i8 = 4;
const STRING_LATIN1: i8 = 5;

/// A position-tracked reader over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns true while the position is before the end of the buffer.
    pub fn has_remaining(&self) -> bool {
        self.pos < self.buf.len()
    }

    /// Number of bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Move to an absolute offset. Seeking to the end of the buffer is allowed.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.buf.len() {
            return Err(ParseError::InvalidOffset {
                offset: offset as i64,
                len: self.buf.len(),
            });
        }
        self.pos = offset;
        Ok(())
    }

    /// Advance the position by `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|&end| end <= self.buf.len())
            .ok_or(ParseError::TruncatedInput {
                offset: self.pos,
                needed: count,
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian i64 at `offset` without moving the cursor.
    pub fn read_i64_at(&self, offset: usize) -> Result<i64> {
        let mut peek = self.clone();
        peek.seek(offset)?;
        peek.read_i64()
    }

    /// Read a variable-length 32-bit integer (at most five groups).
    pub fn read_varint32(&mut self) -> Result<i32> {
        let mut result: u32 = 0;
        for shift in (0..35).step_by(7) {
            let b = self.read_i8()?;
            result |= ((b as u32) & 0x7f) << shift;
            if b >= 0 {
                break;
            }
        }
        Ok(result as i32)
    }

    /// Read a variable-length 64-bit integer.
    ///
    /// Eight 7-bit groups cover bits 0..56. When the eighth group still has
    /// its continuation bit set, a ninth byte supplies bits 56..64 whole.
    pub fn read_varint64(&mut self) -> Result<i64> {
        let mut result: u64 = 0;
        for shift in (0..56).step_by(7) {
            let b = self.read_i8()?;
            result |= ((b as u64) & 0x7f) << shift;
            if b >= 0 {
                return Ok(result as i64);
            }
        }
        let last = self.read_u8()? as u64;
        Ok((result | (last << 56)) as i64)
    }

    /// Read a varint32 used as a count or length.
    ///
    /// Every counted element occupies at least one byte, so a value larger
    /// than what is left in the buffer can only come from corrupt input.
    pub fn read_len(&mut self) -> Result<usize> {
        let offset = self.pos;
        let len = self.read_varint32()? as u32 as usize;
        if len > self.remaining() {
            return Err(ParseError::TruncatedInput {
                offset,
                needed: len,
            });
        }
        Ok(len)
    }

    /// Read a varint32 length prefix followed by that many bytes.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.take(len)
    }

    /// Read an encoded string. `None` means the string was absent.
    pub fn read_string(&mut self) -> Result<Option<String>> {
        let offset = self.pos;
        match self.read_i8()? {
            STRING_NULL => Ok(None),
            STRING_EMPTY => Ok(Some(String::new())),
            STRING_UTF8 => Ok(Some(String::from_utf8_lossy(self.read_bytes()?).into_owned())),
            STRING_CHARS => {
                let len = self.read_len()?;
                let mut s = String::with_capacity(len);
                for _ in 0..len {
                    let code = self.read_varint32()? as u32;
                    s.push(char::from_u32(code).ok_or(ParseError::InvalidChar(code))?);
                }
                Ok(Some(s))
            }
            STRING_LATIN1 => Ok(Some(self.read_bytes()?.iter().map(|&b| b as char).collect())),
            tag => Err(ParseError::InvalidStringEncoding { tag, offset }),
        }
    }
}
