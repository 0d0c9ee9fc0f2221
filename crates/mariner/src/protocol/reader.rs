//! Packet reading utilities.
//!
//! `PacketReader` is a bounds-checked cursor over an immutable payload
//! slice. Every read returns a typed `CodecError` on underrun instead
//! of panicking, so malformed server data surfaces as a protocol error
//! the connection can act on.

#![allow(clippy::cast_possible_truncation)]

use std::fmt;

use crate::protocol::{EofPacket, ErrPacket, OkPacket, PacketHeader};

/// Error raised by cursor reads over a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// A read needed more bytes than the payload still holds.
    Underrun { needed: usize, available: usize },
    /// A length-encoded integer prefix that introduces no value
    /// (0xFB is the NULL sentinel, 0xFF is reserved).
    InvalidLenenc(u8),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Underrun { needed, available } => write!(
                f,
                "payload underrun: needed {needed} byte(s), {available} available"
            ),
            CodecError::InvalidLenenc(byte) => {
                write!(f, "invalid length-encoded integer prefix 0x{byte:02X}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for mariner_core::Error {
    fn from(err: CodecError) -> Self {
        mariner_core::Error::Protocol(mariner_core::ProtocolError {
            message: err.to_string(),
            raw_data: None,
            source: Some(Box::new(err)),
        })
    }
}

/// A cursor over protocol payload bytes.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a new reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Get remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if the cursor has reached the end of the data.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn underrun(&self, needed: usize) -> CodecError {
        CodecError::Underrun {
            needed,
            available: self.remaining(),
        }
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.underrun(1))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a u16 (little-endian).
    pub fn read_u16_le(&mut self) -> Result<u16, CodecError> {
        if self.remaining() < 2 {
            return Err(self.underrun(2));
        }
        let value = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24_le(&mut self) -> Result<u32, CodecError> {
        if self.remaining() < 3 {
            return Err(self.underrun(3));
        }
        let value = u32::from(self.data[self.pos])
            | (u32::from(self.data[self.pos + 1]) << 8)
            | (u32::from(self.data[self.pos + 2]) << 16);
        self.pos += 3;
        Ok(value)
    }

    /// Read a u32 (little-endian).
    pub fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        if self.remaining() < 4 {
            return Err(self.underrun(4));
        }
        let value = u32::from_le_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(value)
    }

    /// Read a u64 (little-endian).
    pub fn read_u64_le(&mut self) -> Result<u64, CodecError> {
        if self.remaining() < 8 {
            return Err(self.underrun(8));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Read an i64 (little-endian).
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_i64_le(&mut self) -> Result<i64, CodecError> {
        self.read_u64_le().map(|v| v as i64)
    }

    /// Read a length-encoded integer.
    ///
    /// Variable-length encoding:
    /// - 0x00-0xFA: the value itself
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    ///
    /// The NULL sentinel (0xFB) and the reserved prefix (0xFF) are
    /// rejected; use `read_opt_lenenc_int` where NULL is legal.
    pub fn read_lenenc_int(&mut self) -> Result<u64, CodecError> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Ok(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            other => Err(CodecError::InvalidLenenc(other)),
        }
    }

    /// Read a length-encoded integer where 0xFB means NULL.
    pub fn read_opt_lenenc_int(&mut self) -> Result<Option<u64>, CodecError> {
        if self.peek() == Some(0xFB) {
            self.pos += 1;
            return Ok(None);
        }
        self.read_lenenc_int().map(Some)
    }

    /// Read a length-encoded string.
    pub fn read_lenenc_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_lenenc_int()? as usize;
        self.read_string(len)
    }

    /// Read a length-encoded byte slice.
    pub fn read_lenenc_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_lenenc_int()? as usize;
        self.read_bytes(len)
    }

    /// Read a length-encoded byte slice where the NULL sentinel decodes
    /// to `None`, never to an empty slice.
    pub fn read_opt_lenenc_bytes(&mut self) -> Result<Option<&'a [u8]>, CodecError> {
        match self.read_opt_lenenc_int()? {
            None => Ok(None),
            Some(len) => self.read_bytes(len as usize).map(Some),
        }
    }

    /// Read a null-terminated string.
    pub fn read_null_string(&mut self) -> Result<String, CodecError> {
        let start = self.pos;
        let mut end = start;
        while end < self.data.len() && self.data[end] != 0 {
            end += 1;
        }
        if end >= self.data.len() {
            // Cursor stays put on failure, like the fixed-width reads
            return Err(self.underrun(end - start + 1));
        }
        let s = String::from_utf8_lossy(&self.data[start..end]).into_owned();
        self.pos = end + 1;
        Ok(s)
    }

    /// Read a null-terminated string with doubled-NUL escaping.
    ///
    /// A doubled NUL is a literal NUL in the content; a lone NUL is the
    /// terminator. The two are told apart by peeking the byte after
    /// each NUL.
    pub fn read_escaped_null_string(&mut self) -> Result<String, CodecError> {
        let start = self.pos;
        let mut out = Vec::new();
        let mut i = start;
        loop {
            let Some(&byte) = self.data.get(i) else {
                // Cursor stays put on failure
                return Err(self.underrun(i - start + 1));
            };
            i += 1;
            if byte != 0 {
                out.push(byte);
                continue;
            }
            if self.data.get(i) == Some(&0) {
                i += 1;
                out.push(0);
            } else {
                self.pos = i;
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
        }
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize) -> Result<String, CodecError> {
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read remaining data as a string.
    pub fn read_rest_string(&mut self) -> String {
        let s = String::from_utf8_lossy(&self.data[self.pos..]).into_owned();
        self.pos = self.data.len();
        s
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(self.underrun(len));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Skip a number of bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            return Err(self.underrun(n));
        }
        self.pos += n;
        Ok(())
    }

    /// Read a packet header from raw bytes.
    pub fn read_packet_header(&mut self) -> Result<PacketHeader, CodecError> {
        let bytes = self.read_bytes(PacketHeader::SIZE)?;
        let mut header_bytes = [0u8; 4];
        header_bytes.copy_from_slice(bytes);
        Ok(PacketHeader::from_bytes(&header_bytes))
    }

    /// Read a binary-protocol time value as signed microseconds.
    ///
    /// Layout: length tag 0 (zero duration), 8 (sign, days, h/m/s) or
    /// 12 (adds microseconds).
    pub fn read_binary_time(&mut self) -> Result<i64, CodecError> {
        let tag = self.read_u8()?;
        if tag == 0 {
            return Ok(0);
        }
        let negative = self.read_u8()? != 0;
        let days = i64::from(self.read_u32_le()?);
        let hours = i64::from(self.read_u8()?);
        let minutes = i64::from(self.read_u8()?);
        let seconds = i64::from(self.read_u8()?);
        let micros = if tag >= 12 {
            i64::from(self.read_u32_le()?)
        } else {
            0
        };
        let total =
            ((days * 24 + hours) * 3600 + minutes * 60 + seconds) * 1_000_000 + micros;
        Ok(if negative { -total } else { total })
    }

    /// Read a binary-protocol date/datetime value.
    ///
    /// Layout: length tag 0 (all zero), 4 (date), 7 (adds h/m/s) or 11
    /// (adds microseconds). Returns the components in calendar form.
    pub fn read_binary_datetime(
        &mut self,
    ) -> Result<(u16, u8, u8, u8, u8, u8, u32), CodecError> {
        let tag = self.read_u8()?;
        if tag == 0 {
            return Ok((0, 0, 0, 0, 0, 0, 0));
        }
        let year = self.read_u16_le()?;
        let month = self.read_u8()?;
        let day = self.read_u8()?;
        let (hour, minute, second) = if tag >= 7 {
            (self.read_u8()?, self.read_u8()?, self.read_u8()?)
        } else {
            (0, 0, 0)
        };
        let micros = if tag >= 11 { self.read_u32_le()? } else { 0 };
        Ok((year, month, day, hour, minute, second, micros))
    }

    /// Parse an OK packet from the current position.
    ///
    /// OK packet format (protocol 4.1+):
    /// - 0x00 header (skipped if present)
    /// - affected_rows: lenenc int
    /// - last_insert_id: lenenc int
    /// - status_flags: 2 bytes
    /// - warnings: 2 bytes
    /// - info: rest of packet (optional)
    pub fn parse_ok_packet(&mut self) -> Result<OkPacket, CodecError> {
        if self.peek() == Some(0x00) {
            self.skip(1)?;
        }

        let affected_rows = self.read_lenenc_int()?;
        let last_insert_id = self.read_lenenc_int()?;
        let status_flags = self.read_u16_le()?;
        let warnings = self.read_u16_le()?;
        let info = if self.remaining() > 0 {
            self.read_rest_string()
        } else {
            String::new()
        };

        Ok(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    /// Parse an Error packet from the current position.
    ///
    /// ERR packet format (protocol 4.1+):
    /// - 0xFF header (skipped if present)
    /// - error_code: 2 bytes
    /// - optional '#' marker + 5-byte SQLSTATE
    /// - error_message: rest of packet
    pub fn parse_err_packet(&mut self) -> Result<ErrPacket, CodecError> {
        if self.peek() == Some(0xFF) {
            self.skip(1)?;
        }

        let error_code = self.read_u16_le()?;

        let sql_state = if self.peek() == Some(b'#') {
            self.skip(1)?;
            self.read_string(5)?
        } else {
            String::new()
        };

        let error_message = self.read_rest_string();

        Ok(ErrPacket {
            error_code,
            sql_state,
            error_message,
        })
    }

    /// Parse an EOF packet from the current position.
    ///
    /// EOF packet format:
    /// - 0xFE header (skipped if present)
    /// - warnings: 2 bytes
    /// - status_flags: 2 bytes
    pub fn parse_eof_packet(&mut self) -> Result<EofPacket, CodecError> {
        if self.peek() == Some(0xFE) {
            self.skip(1)?;
        }

        let warnings = self.read_u16_le()?;
        let status_flags = self.read_u16_le()?;

        Ok(EofPacket {
            warnings,
            status_flags,
        })
    }
}

/// Return the sorted NULL positions set in a bitmap covering `count`
/// values, skipping `reserved` leading bits. Bits beyond `count` are
/// ignored.
pub fn null_bit_positions(bitmap: &[u8], count: usize, reserved: usize) -> Vec<usize> {
    let mut positions = Vec::new();
    for i in 0..count {
        let bit = i + reserved;
        let byte = bit / 8;
        if byte >= bitmap.len() {
            break;
        }
        if bitmap[byte] & (1 << (bit % 8)) != 0 {
            positions.push(i);
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u8() {
        let mut reader = PacketReader::new(&[0x42, 0x43]);
        assert_eq!(reader.read_u8(), Ok(0x42));
        assert_eq!(reader.read_u8(), Ok(0x43));
        assert_eq!(
            reader.read_u8(),
            Err(CodecError::Underrun {
                needed: 1,
                available: 0
            })
        );
    }

    #[test]
    fn test_fixed_width_reads() {
        let mut reader = PacketReader::new(&[0x34, 0x12]);
        assert_eq!(reader.read_u16_le(), Ok(0x1234));

        let mut reader = PacketReader::new(&[0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u24_le(), Ok(0x0012_3456));

        let mut reader = PacketReader::new(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u32_le(), Ok(0x1234_5678));

        let mut reader = PacketReader::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_u64_le(), Ok(0x0807_0605_0403_0201));
    }

    #[test]
    fn test_underrun_carries_counts() {
        let mut reader = PacketReader::new(&[0x01, 0x02]);
        assert_eq!(
            reader.read_u32_le(),
            Err(CodecError::Underrun {
                needed: 4,
                available: 2
            })
        );
        // A failed read does not advance the cursor
        assert_eq!(reader.read_u16_le(), Ok(0x0201));
    }

    #[test]
    fn test_read_lenenc_int() {
        let mut reader = PacketReader::new(&[0x42]);
        assert_eq!(reader.read_lenenc_int(), Ok(0x42));

        let mut reader = PacketReader::new(&[0xFC, 0x34, 0x12]);
        assert_eq!(reader.read_lenenc_int(), Ok(0x1234));

        let mut reader = PacketReader::new(&[0xFD, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_lenenc_int(), Ok(0x0012_3456));

        let mut reader =
            PacketReader::new(&[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_lenenc_int(), Ok(0x0807_0605_0403_0201));

        let mut reader = PacketReader::new(&[0xFB]);
        assert_eq!(reader.read_lenenc_int(), Err(CodecError::InvalidLenenc(0xFB)));

        let mut reader = PacketReader::new(&[0xFF]);
        assert_eq!(reader.read_lenenc_int(), Err(CodecError::InvalidLenenc(0xFF)));
    }

    #[test]
    fn test_opt_lenenc_null_sentinel() {
        let mut reader = PacketReader::new(&[0xFB, 0x02, b'h', b'i']);
        assert_eq!(reader.read_opt_lenenc_bytes(), Ok(None));
        assert_eq!(reader.read_opt_lenenc_bytes(), Ok(Some(&b"hi"[..])));
    }

    #[test]
    fn test_opt_lenenc_empty_is_not_null() {
        let mut reader = PacketReader::new(&[0x00]);
        assert_eq!(reader.read_opt_lenenc_bytes(), Ok(Some(&b""[..])));
    }

    #[test]
    fn test_read_null_string() {
        let mut reader = PacketReader::new(b"hello\0world\0");
        assert_eq!(reader.read_null_string(), Ok("hello".to_string()));
        assert_eq!(reader.read_null_string(), Ok("world".to_string()));
    }

    #[test]
    fn test_read_null_string_missing_terminator() {
        let mut reader = PacketReader::new(b"hello");
        assert!(reader.read_null_string().is_err());
        // The failed scan leaves the cursor where it started
        assert_eq!(reader.read_bytes(5), Ok(&b"hello"[..]));
    }

    #[test]
    fn test_escaped_null_string_missing_terminator_does_not_advance() {
        // Trailing doubled NUL is content, so the string never terminates
        let mut reader = PacketReader::new(&[b'a', 0, 0, b'b']);
        assert_eq!(
            reader.read_escaped_null_string(),
            Err(CodecError::Underrun {
                needed: 5,
                available: 4
            })
        );
        assert_eq!(reader.read_u8(), Ok(b'a'));
    }

    #[test]
    fn test_read_escaped_null_string() {
        // "a\0b" encodes its literal NUL as a doubled NUL
        let mut reader = PacketReader::new(&[b'a', 0, 0, b'b', 0, b'x']);
        assert_eq!(reader.read_escaped_null_string(), Ok("a\0b".to_string()));
        assert_eq!(reader.peek(), Some(b'x'));
    }

    #[test]
    fn test_read_lenenc_string() {
        let mut reader = PacketReader::new(&[0x05, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(reader.read_lenenc_string(), Ok("hello".to_string()));
    }

    #[test]
    fn test_binary_time_decoding() {
        // Zero-length tag
        let mut reader = PacketReader::new(&[0x00]);
        assert_eq!(reader.read_binary_time(), Ok(0));

        // 8-byte form: -2 days 10:20:30
        let mut reader =
            PacketReader::new(&[8, 1, 2, 0, 0, 0, 10, 20, 30]);
        let expected = -(((2 * 24 + 10) * 3600 + 20 * 60 + 30) * 1_000_000);
        assert_eq!(reader.read_binary_time(), Ok(expected));

        // 12-byte form adds microseconds (500000 = 0x07A120)
        let mut reader =
            PacketReader::new(&[12, 0, 0, 0, 0, 0, 1, 2, 3, 0x20, 0xA1, 0x07, 0x00]);
        let expected = (3600 + 2 * 60 + 3) * 1_000_000 + 500_000;
        assert_eq!(reader.read_binary_time(), Ok(expected));
    }

    #[test]
    fn test_binary_datetime_decoding() {
        // Date-only form
        let mut reader = PacketReader::new(&[4, 0xE7, 0x07, 3, 15]);
        assert_eq!(
            reader.read_binary_datetime(),
            Ok((2023, 3, 15, 0, 0, 0, 0))
        );

        // Full form with microseconds (500000 = 0x07A120)
        let mut reader = PacketReader::new(&[
            11, 0xE7, 0x07, 3, 15, 10, 20, 30, 0x20, 0xA1, 0x07, 0x00,
        ]);
        assert_eq!(
            reader.read_binary_datetime(),
            Ok((2023, 3, 15, 10, 20, 30, 500_000))
        );
    }

    #[test]
    fn test_parse_ok_packet() {
        let data = [0x00, 0x01, 0x2A, 0x02, 0x00, 0x00, 0x00];
        let mut reader = PacketReader::new(&data);
        let ok = reader.parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 42);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 0);
    }

    #[test]
    fn test_parse_err_packet() {
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000");
        data.extend_from_slice(b"Access denied");
        let mut reader = PacketReader::new(&data);
        let err = reader.parse_err_packet().unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state, "28000");
        assert_eq!(err.error_message, "Access denied");
    }

    #[test]
    fn test_parse_eof_packet() {
        let data = [0xFE, 0x00, 0x00, 0x02, 0x00];
        let mut reader = PacketReader::new(&data);
        let eof = reader.parse_eof_packet().unwrap();
        assert_eq!(eof.warnings, 0);
        assert_eq!(eof.status_flags, 2);
    }

    #[test]
    fn test_null_bit_positions() {
        // [value, NULL, NULL] -> 0b00000110
        assert_eq!(null_bit_positions(&[0b0000_0110], 3, 0), vec![1, 2]);

        // Bits past the field count are ignored
        assert_eq!(null_bit_positions(&[0b1111_1000], 3, 0), Vec::<usize>::new());

        // Reserved offset of 2 (binary result rows)
        assert_eq!(null_bit_positions(&[0b0001_0100], 3, 2), vec![0, 2]);

        // Multi-byte bitmap
        assert_eq!(
            null_bit_positions(&[0b0000_0000, 0b0000_0011], 10, 0),
            vec![8, 9]
        );
    }
}
