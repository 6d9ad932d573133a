//! Big-endian byte codec shared by the control telegrams and the streamed scan frames.
//!
//! [`ByteReader`] walks a borrowed slice with a tracked position; every read checks the
//! remaining length first and fails with [`CodecError::OutOfRange`] instead of truncating.
//! [`ByteWriter`] only ever appends to a caller-owned `Vec<u8>`.
//!
//! Flag groups are packed most-significant-bit first: flag `i` of a group lives in byte
//! `i / 8`, bit `7 - (i % 8)`. The last byte is zero-padded.

use byteorder::{BigEndian, ByteOrder};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("read of {requested} bytes at offset {offset} exceeds buffer length {len}")]
    OutOfRange {
        offset: usize,
        requested: usize,
        len: usize,
    },
    #[error("invalid string: {0}")]
    InvalidString(String),
    /// A length or offset does not fit its wire field.
    #[error("{what} of {len} does not fit a field limited to {max}")]
    TooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },
}

/// `len` as a u16 wire field, or [`CodecError::TooLarge`].
pub fn u16_len(what: &'static str, len: usize) -> Result<u16, CodecError> {
    u16::try_from(len).map_err(|_| CodecError::TooLarge {
        what,
        len,
        max: u16::MAX as usize,
    })
}

/// Number of bytes needed to hold `bits` packed flags.
pub fn flag_bytes(bits: usize) -> usize {
    (bits + 7) / 8
}

/// Read-only cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Move to an absolute offset. Seeking to `len()` is allowed (nothing left to read).
    pub fn seek(&mut self, pos: usize) -> Result<(), CodecError> {
        if pos > self.data.len() {
            return Err(CodecError::OutOfRange {
                offset: pos,
                requested: 0,
                len: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.take(n).map(|_| ())
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::OutOfRange {
                offset: self.pos,
                requested: n,
                len: self.data.len(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(BigEndian::read_i16(self.take(2)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(BigEndian::read_f32(self.take(4)?))
    }

    /// Unpack `count` flags (MSB first), consuming `flag_bytes(count)` bytes.
    pub fn read_flags(&mut self, count: usize) -> Result<Vec<bool>, CodecError> {
        let bytes = self.take(flag_bytes(count))?;
        Ok((0..count)
            .map(|i| bytes[i / 8] & (0x80 >> (i % 8)) != 0)
            .collect())
    }

    /// `u32` length followed by that many ASCII bytes.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        let raw = self.take(len)?;
        if !raw.is_ascii() {
            return Err(CodecError::InvalidString(format!(
                "non-ASCII bytes in {}-byte string",
                len
            )));
        }
        // ASCII is valid UTF-8
        Ok(raw.iter().map(|&b| b as char).collect())
    }
}

/// Append-only big-endian writer over a caller-owned buffer.
#[derive(Debug)]
pub struct ByteWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        ByteWriter { buf }
    }

    /// Current length of the underlying buffer.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        let mut b = [0u8; 2];
        BigEndian::write_u16(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_u32(&mut self, v: u32) {
        let mut b = [0u8; 4];
        BigEndian::write_u32(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_i16(&mut self, v: i16) {
        let mut b = [0u8; 2];
        BigEndian::write_i16(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_i32(&mut self, v: i32) {
        let mut b = [0u8; 4];
        BigEndian::write_i32(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_f32(&mut self, v: f32) {
        let mut b = [0u8; 4];
        BigEndian::write_f32(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    /// Pack flags MSB first; the final byte is zero-padded.
    pub fn write_flags(&mut self, flags: &[bool]) {
        let start = self.buf.len();
        self.write_zeros(flag_bytes(flags.len()));
        for (i, &flag) in flags.iter().enumerate() {
            if flag {
                self.buf[start + i / 8] |= 0x80 >> (i % 8);
            }
        }
    }

    /// Pack exactly `count` flags: missing entries are written as `false`, extras are dropped.
    pub fn write_flags_fixed(&mut self, flags: &[bool], count: usize) {
        let mut fixed = flags.to_vec();
        fixed.resize(count, false);
        self.write_flags(&fixed);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut buf = Vec::new();
        let mut w = ByteWriter::new(&mut buf);
        w.write_u16(0x1234);
        w.write_u32(0xDEAD_BEEF);
        w.write_i16(-2);
        assert_eq!(buf, vec![0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0xFE]);

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u16().expect("u16"), 0x1234);
        assert_eq!(r.read_u32().expect("u32"), 0xDEAD_BEEF);
        assert_eq!(r.read_i16().expect("i16"), -2);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn float_uses_ieee_bits() {
        let mut buf = Vec::new();
        ByteWriter::new(&mut buf).write_f32(1.0);
        assert_eq!(buf, vec![0x3F, 0x80, 0x00, 0x00]);
        assert_eq!(ByteReader::new(&buf).read_f32().expect("f32"), 1.0);
    }

    #[test]
    fn flags_are_msb_first_and_zero_padded() {
        let mut buf = Vec::new();
        let flags = [true, false, false, false, false, false, false, true, true, false];
        ByteWriter::new(&mut buf).write_flags(&flags);
        assert_eq!(buf, vec![0x81, 0x80]);

        let decoded = ByteReader::new(&buf).read_flags(10).expect("flags");
        assert_eq!(decoded, flags.to_vec());
    }

    #[test]
    fn fixed_flags_pad_with_false() {
        let mut buf = Vec::new();
        ByteWriter::new(&mut buf).write_flags_fixed(&[true], 20);
        assert_eq!(buf, vec![0x80, 0x00, 0x00]);
    }

    #[test]
    fn read_past_end_is_out_of_range() {
        let buf = [0x01, 0x02, 0x03];
        let mut r = ByteReader::new(&buf);
        r.read_u16().expect("u16");
        let err = r.read_u16().unwrap_err();
        assert_eq!(
            err,
            CodecError::OutOfRange {
                offset: 2,
                requested: 2,
                len: 3
            }
        );
        // position is unchanged by the failed read
        assert_eq!(r.position(), 2);
        assert_eq!(r.read_u8().expect("u8"), 0x03);
    }

    #[test]
    fn writer_appends_to_existing_buffer() {
        let mut buf = vec![0xAA];
        let mut w = ByteWriter::new(&mut buf);
        w.write_u8(0xBB);
        assert_eq!(w.position(), 2);
        assert_eq!(buf, vec![0xAA, 0xBB]);
    }

    #[test]
    fn string_is_length_prefixed() {
        let mut buf = Vec::new();
        ByteWriter::new(&mut buf).write_string("MS3");
        assert_eq!(buf, vec![0, 0, 0, 3, b'M', b'S', b'3']);
        assert_eq!(ByteReader::new(&buf).read_string().expect("string"), "MS3");

        let truncated = [0, 0, 0, 9, b'M'];
        assert!(ByteReader::new(&truncated).read_string().is_err());
    }
}
