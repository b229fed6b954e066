//! Bounded byte reader used by value decoding.
//!
//! Reads never panic: running off the end of the buffer yields
//! [`DecodeError::Incomplete`], the retryable "need more bytes" signal.
//! Structural inconsistencies (length fields over the configured limits,
//! invalid UTF-8) yield [`DecodeError::Malformed`], which is fatal for the
//! connection.

use std::fmt;

/// Maximum length accepted for any string field.
pub const MAX_TEXT_LEN: usize = 1 << 20;

/// Maximum element count accepted for any list/field-count prefix.
pub const MAX_COUNT: usize = 1 << 16;

/// Maximum length accepted for raw byte payloads and structural blobs.
pub const MAX_BLOB_LEN: usize = 16 << 20;

/// Outcome of a failed decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer does not yet contain enough bytes. Retryable: the caller
    /// keeps its checkpoint and re-invokes once more data arrives. Never a
    /// protocol error.
    Incomplete,
    /// The bytes are structurally inconsistent with the expected shape.
    /// Fatal for the connection.
    Malformed(String),
}

impl DecodeError {
    /// Shorthand for a malformed-bytes error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        DecodeError::Malformed(msg.into())
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Incomplete => f.write_str("need more bytes"),
            DecodeError::Malformed(msg) => write!(f, "malformed bytes: {msg}"),
        }
    }
}

/// Result alias for decode steps.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Cursor over a byte slice with bounds-checked big-endian reads.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Wrap a buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take `n` raw bytes.
    pub fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(DecodeError::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one byte.
    pub fn u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian u16.
    pub fn u16_be(&mut self) -> DecodeResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian u32.
    pub fn u32_be(&mut self) -> DecodeResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a big-endian i32.
    pub fn i32_be(&mut self) -> DecodeResult<i32> {
        Ok(self.u32_be()? as i32)
    }

    /// Read a big-endian i64.
    pub fn i64_be(&mut self) -> DecodeResult<i64> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Read a big-endian f64 (IEEE-754 bits).
    pub fn f64_be(&mut self) -> DecodeResult<f64> {
        let b = self.take(8)?;
        Ok(f64::from_bits(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])))
    }

    /// Read a length-prefixed UTF-8 string field.
    pub fn str_field(&mut self) -> DecodeResult<String> {
        let len = self.u32_be()? as usize;
        if len > MAX_TEXT_LEN {
            return Err(DecodeError::malformed(format!(
                "string length {len} exceeds limit {MAX_TEXT_LEN}"
            )));
        }
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(|s| s.to_string())
            .map_err(|_| DecodeError::malformed("invalid UTF-8 in string field"))
    }

    /// Read a count prefix, bounded by [`MAX_COUNT`].
    pub fn count_field(&mut self) -> DecodeResult<usize> {
        let count = self.u32_be()? as usize;
        if count > MAX_COUNT {
            return Err(DecodeError::malformed(format!(
                "element count {count} exceeds limit {MAX_COUNT}"
            )));
        }
        Ok(count)
    }

    /// Read a length-prefixed raw byte field, bounded by [`MAX_BLOB_LEN`].
    pub fn blob_field(&mut self) -> DecodeResult<&'a [u8]> {
        let len = self.u32_be()? as usize;
        if len > MAX_BLOB_LEN {
            return Err(DecodeError::malformed(format!(
                "blob length {len} exceeds limit {MAX_BLOB_LEN}"
            )));
        }
        self.take(len)
    }
}

/// Write a length-prefixed UTF-8 string field.
pub fn put_str(out: &mut bytes::BytesMut, s: &str) {
    use bytes::BufMut;
    out.put_u32(s.len() as u32);
    out.put_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_and_consumed() {
        let buf = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03];
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(r.u16_be().unwrap(), 2);
        assert_eq!(r.u32_be().unwrap(), 3);
        assert_eq!(r.consumed(), 7);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_short_buffer_is_incomplete() {
        let mut r = ByteReader::new(&[0x00]);
        assert_eq!(r.u32_be().unwrap_err(), DecodeError::Incomplete);
        // Failed read consumes nothing.
        assert_eq!(r.consumed(), 0);
    }

    #[test]
    fn test_str_field_roundtrip() {
        let mut out = bytes::BytesMut::new();
        put_str(&mut out, "hello");
        let mut r = ByteReader::new(&out);
        assert_eq!(r.str_field().unwrap(), "hello");
    }

    #[test]
    fn test_str_field_truncated_is_incomplete() {
        let mut out = bytes::BytesMut::new();
        put_str(&mut out, "hello");
        let mut r = ByteReader::new(&out[..6]);
        assert_eq!(r.str_field().unwrap_err(), DecodeError::Incomplete);
    }

    #[test]
    fn test_oversized_length_is_malformed() {
        let buf = u32::MAX.to_be_bytes();
        let mut r = ByteReader::new(&buf);
        assert!(matches!(r.str_field().unwrap_err(), DecodeError::Malformed(_)));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut out = bytes::BytesMut::new();
        use bytes::BufMut;
        out.put_u32(2);
        out.put_slice(&[0xFF, 0xFE]);
        let mut r = ByteReader::new(&out);
        assert!(matches!(r.str_field().unwrap_err(), DecodeError::Malformed(_)));
    }

    #[test]
    fn test_f64_bits_roundtrip() {
        let mut out = bytes::BytesMut::new();
        use bytes::BufMut;
        out.put_u64(3.25f64.to_bits());
        let mut r = ByteReader::new(&out);
        assert_eq!(r.f64_be().unwrap(), 3.25);
    }
}
