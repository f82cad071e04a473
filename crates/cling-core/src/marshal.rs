//! Little-endian binary codec with a sticky error slot.
//!
//! All integers are fixed-width little-endian. Strings and
//! variable-length byte slices are length-prefixed with a `u16`. Both
//! the writer and the reader carry a sticky error: once an operation
//! fails, every subsequent operation is a no-op and the first error is
//! surfaced at the end. This keeps long marshalling chains free of
//! per-field error plumbing without ever letting a partial record pass
//! as a success.

use thiserror::Error;

/// Largest value accepted by a `u16` length prefix.
pub const MAX_PREFIXED_LEN: usize = u16::MAX as usize;

/// Errors produced by the binary codec and by record unmarshalling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// The input ended before a fixed-width field could be read.
    #[error("short read: needed {needed} bytes, {remaining} remaining")]
    ShortRead {
        /// Bytes the failing read required.
        needed: usize,
        /// Bytes that were left in the input.
        remaining: usize,
    },
    /// A length-prefixed value exceeded the `u16` prefix range.
    #[error("value too long for u16 length prefix: {0} bytes")]
    ValueTooLong(usize),
    /// A string field did not contain valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    /// A record version tag did not match the supported version.
    #[error("unsupported version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Version found in the input.
        found: u16,
        /// Version this build understands.
        expected: u16,
    },
    /// A magic prefix did not match the expected record type.
    #[error("bad magic")]
    BadMagic,
    /// The record failed a structural check.
    #[error("corrupt record: {0}")]
    Corrupt(&'static str),
}

/// Buffer-backed writer for the codec. Collect fields with the `put_*`
/// methods, then call [`MarshalWriter::finish`] to obtain the bytes or
/// the first error.
#[derive(Debug, Default)]
pub struct MarshalWriter {
    buf: Vec<u8>,
    err: Option<MarshalError>,
}

impl MarshalWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with a pre-allocated buffer.
    pub fn with_capacity(n: usize) -> Self {
        Self { buf: Vec::with_capacity(n), err: None }
    }

    /// Force the sticky error. Subsequent writes are no-ops.
    pub fn fail(&mut self, err: MarshalError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// The first error encountered, if any.
    pub fn error(&self) -> Option<&MarshalError> {
        self.err.as_ref()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append a `u8`.
    pub fn put_u8(&mut self, v: u8) {
        if self.err.is_none() {
            self.buf.push(v);
        }
    }

    /// Append a little-endian `u16`.
    pub fn put_u16(&mut self, v: u16) {
        if self.err.is_none() {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Append a little-endian `u32`.
    pub fn put_u32(&mut self, v: u32) {
        if self.err.is_none() {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Append a little-endian `u64`.
    pub fn put_u64(&mut self, v: u64) {
        if self.err.is_none() {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Append a little-endian `i32`.
    pub fn put_i32(&mut self, v: i32) {
        if self.err.is_none() {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Append a little-endian `i64`.
    pub fn put_i64(&mut self, v: i64) {
        if self.err.is_none() {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Append raw bytes without a length prefix (fixed-width fields).
    pub fn put_raw(&mut self, v: &[u8]) {
        if self.err.is_none() {
            self.buf.extend_from_slice(v);
        }
    }

    /// Append a `u16`-length-prefixed byte slice.
    pub fn put_bytes(&mut self, v: &[u8]) {
        if self.err.is_some() {
            return;
        }
        if v.len() > MAX_PREFIXED_LEN {
            self.fail(MarshalError::ValueTooLong(v.len()));
            return;
        }
        self.buf.extend_from_slice(&(v.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(v);
    }

    /// Append a `u16`-length-prefixed UTF-8 string.
    pub fn put_string(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    /// Return the collected bytes, or the first error if one occurred.
    pub fn finish(self) -> Result<Vec<u8>, MarshalError> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(self.buf),
        }
    }
}

/// Slice-backed reader for the codec. Reads return zero values once
/// the sticky error is set; check [`MarshalReader::status`] after a
/// chain of reads.
#[derive(Debug)]
pub struct MarshalReader<'a> {
    buf: &'a [u8],
    pos: usize,
    err: Option<MarshalError>,
}

impl<'a> MarshalReader<'a> {
    /// Create a reader over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, err: None }
    }

    /// Bytes not yet consumed. Zero once the sticky error is set.
    pub fn remaining(&self) -> usize {
        if self.err.is_some() {
            0
        } else {
            self.buf.len() - self.pos
        }
    }

    /// The sticky error, if set.
    pub fn error(&self) -> Option<&MarshalError> {
        self.err.as_ref()
    }

    /// `Ok(())` while no error is sticky, the first error otherwise.
    pub fn status(&self) -> Result<(), MarshalError> {
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Force the sticky error. Subsequent reads return zero values.
    pub fn fail(&mut self, err: MarshalError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.err.is_some() {
            return None;
        }
        if self.buf.len() - self.pos < n {
            self.fail(MarshalError::ShortRead { needed: n, remaining: self.buf.len() - self.pos });
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    /// Read a `u8`; 0 when the error is sticky.
    pub fn u8(&mut self) -> u8 {
        self.take(1).map_or(0, |b| b[0])
    }

    /// Read a little-endian `u16`; 0 when the error is sticky.
    pub fn u16(&mut self) -> u16 {
        self.take(2).map_or(0, |b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian `u32`; 0 when the error is sticky.
    pub fn u32(&mut self) -> u32 {
        self.take(4).map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian `u64`; 0 when the error is sticky.
    pub fn u64(&mut self) -> u64 {
        self.take(8).map_or(0, |b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    /// Read a little-endian `i32`; 0 when the error is sticky.
    pub fn i32(&mut self) -> i32 {
        self.take(4).map_or(0, |b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian `i64`; 0 when the error is sticky.
    pub fn i64(&mut self) -> i64 {
        self.take(8).map_or(0, |b| {
            i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    /// Read a `u16` length prefix; 0 when the error is sticky.
    pub fn read_len(&mut self) -> usize {
        self.u16() as usize
    }

    /// Read `n` raw bytes (fixed-width field); empty when sticky.
    pub fn raw(&mut self, n: usize) -> &'a [u8] {
        self.take(n).unwrap_or(&[])
    }

    /// Read a fixed-size array; zeroed when the error is sticky.
    pub fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(b) = self.take(N) {
            out.copy_from_slice(b);
        }
        out
    }

    /// Read a `u16`-length-prefixed byte slice; empty when sticky.
    pub fn bytes(&mut self) -> Vec<u8> {
        let n = self.read_len();
        self.take(n).map_or_else(Vec::new, <[u8]>::to_vec)
    }

    /// Read a `u16`-length-prefixed UTF-8 string; empty when sticky.
    pub fn string(&mut self) -> String {
        let raw = self.bytes();
        match String::from_utf8(raw) {
            Ok(s) => s,
            Err(_) => {
                self.fail(MarshalError::InvalidUtf8);
                String::new()
            }
        }
    }

    /// Consume the reader, requiring that no error is sticky.
    pub fn finish(self) -> Result<(), MarshalError> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip() {
        let mut w = MarshalWriter::new();
        w.put_u8(0xAB);
        w.put_u16(0x1234);
        w.put_u32(0xDEAD_BEEF);
        w.put_u64(0x0102_0304_0506_0708);
        w.put_i64(-42);
        w.put_i32(-7);
        let buf = w.finish().unwrap();

        let mut r = MarshalReader::new(&buf);
        assert_eq!(r.u8(), 0xAB);
        assert_eq!(r.u16(), 0x1234);
        assert_eq!(r.u32(), 0xDEAD_BEEF);
        assert_eq!(r.u64(), 0x0102_0304_0506_0708);
        assert_eq!(r.i64(), -42);
        assert_eq!(r.i32(), -7);
        assert_eq!(r.remaining(), 0);
        r.finish().unwrap();
    }

    #[test]
    fn little_endian_layout() {
        let mut w = MarshalWriter::new();
        w.put_u16(0x0102);
        assert_eq!(w.finish().unwrap(), vec![0x02, 0x01]);
    }

    #[test]
    fn prefixed_string_round_trip() {
        let mut w = MarshalWriter::new();
        w.put_string("héllo");
        w.put_bytes(b"");
        let buf = w.finish().unwrap();

        let mut r = MarshalReader::new(&buf);
        assert_eq!(r.string(), "héllo");
        assert_eq!(r.bytes(), Vec::<u8>::new());
        r.finish().unwrap();
    }

    #[test]
    fn sticky_error_on_short_read() {
        let buf = [0x01u8, 0x02];
        let mut r = MarshalReader::new(&buf);
        assert_eq!(r.u32(), 0);
        // Error is sticky: further reads yield zero values.
        assert_eq!(r.u8(), 0);
        assert_eq!(r.read_len(), 0);
        assert_eq!(r.remaining(), 0);
        assert!(matches!(r.error(), Some(MarshalError::ShortRead { needed: 4, remaining: 2 })));
    }

    #[test]
    fn read_len_zero_when_sticky() {
        let mut r = MarshalReader::new(&[]);
        r.fail(MarshalError::BadMagic);
        assert_eq!(r.read_len(), 0);
        assert_eq!(r.finish().unwrap_err(), MarshalError::BadMagic);
    }

    #[test]
    fn writer_rejects_oversized_slice() {
        let big = vec![0u8; MAX_PREFIXED_LEN + 1];
        let mut w = MarshalWriter::new();
        w.put_bytes(&big);
        w.put_u8(1); // ignored after the sticky error
        assert_eq!(w.finish().unwrap_err(), MarshalError::ValueTooLong(MAX_PREFIXED_LEN + 1));
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let mut w = MarshalWriter::new();
        w.put_bytes(&[0xFF, 0xFE]);
        let buf = w.finish().unwrap();
        let mut r = MarshalReader::new(&buf);
        assert_eq!(r.string(), "");
        assert_eq!(r.finish().unwrap_err(), MarshalError::InvalidUtf8);
    }

    #[test]
    fn first_error_wins() {
        let mut r = MarshalReader::new(&[0x01]);
        assert_eq!(r.u32(), 0);
        r.fail(MarshalError::BadMagic);
        assert!(matches!(r.error(), Some(MarshalError::ShortRead { .. })));
    }
}
