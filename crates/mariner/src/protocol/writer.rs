//! Packet writing utilities.
//!
//! `PacketWriter` builds protocol payloads; `build_packet_from_payload`
//! frames them, splitting anything over 16MB - 1 into chained packets.

#![allow(clippy::cast_possible_truncation)]

use mariner_core::Value;

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

/// TIME columns are bounded at 838:59:59 in either direction.
pub const MAX_TIME_SECONDS: i64 = 838 * 3600 + 59 * 60 + 59;
const MAX_TIME_MICROS: i64 = MAX_TIME_SECONDS * 1_000_000;

/// A writer for protocol payload data.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new writer with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the buffer as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write a u16 (little-endian).
    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u24 (little-endian, 3 bytes).
    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.push((value & 0xFF) as u8);
        self.buffer.push(((value >> 8) & 0xFF) as u8);
        self.buffer.push(((value >> 16) & 0xFF) as u8);
    }

    /// Write a u32 (little-endian).
    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u64 (little-endian).
    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write an i64 (little-endian, two's complement).
    #[allow(clippy::cast_sign_loss)]
    pub fn write_i64_le(&mut self, value: i64) {
        self.write_u64_le(value as u64);
    }

    /// Write a length-encoded integer in its smallest applicable form.
    ///
    /// - values below 251: 1 byte
    /// - 0xFC + 2 bytes: up to 2^16 - 1
    /// - 0xFD + 3 bytes: up to 2^24 - 1
    /// - 0xFE + 8 bytes: everything else
    pub fn write_lenenc_int(&mut self, value: u64) {
        if value < 251 {
            self.write_u8(value as u8);
        } else if value < 0x10000 {
            self.write_u8(0xFC);
            self.write_u16_le(value as u16);
        } else if value < 0x0100_0000 {
            self.write_u8(0xFD);
            self.write_u24_le(value as u32);
        } else {
            self.write_u8(0xFE);
            self.write_u64_le(value);
        }
    }

    /// Write the lenenc NULL sentinel.
    pub fn write_lenenc_null(&mut self) {
        self.write_u8(0xFB);
    }

    /// Write a length-encoded string.
    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_int(s.len() as u64);
        self.buffer.extend_from_slice(s.as_bytes());
    }

    /// Write a length-encoded byte slice.
    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    /// Write a null-terminated string.
    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    /// Write a null-terminated string with doubled-NUL escaping:
    /// embedded NUL bytes are doubled, the terminator is a lone NUL.
    pub fn write_escaped_null_string(&mut self, s: &str) {
        for &byte in s.as_bytes() {
            self.buffer.push(byte);
            if byte == 0 {
                self.buffer.push(0);
            }
        }
        self.buffer.push(0);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write zeros (padding).
    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }

    /// Write a binary-protocol TIME value from signed microseconds.
    ///
    /// Values outside the TIME range are clamped to ±838:59:59. The
    /// smallest length tag is chosen: 0 for a zero duration, 8 without
    /// microseconds, 12 with.
    pub fn write_binary_time(&mut self, micros: i64) {
        let clamped = micros.clamp(-MAX_TIME_MICROS, MAX_TIME_MICROS);
        if clamped == 0 {
            self.write_u8(0);
            return;
        }
        let negative = clamped < 0;
        let magnitude = clamped.unsigned_abs();
        let micros = (magnitude % 1_000_000) as u32;
        let total_seconds = magnitude / 1_000_000;
        let days = (total_seconds / 86_400) as u32;
        let hours = ((total_seconds / 3_600) % 24) as u8;
        let minutes = ((total_seconds / 60) % 60) as u8;
        let seconds = (total_seconds % 60) as u8;

        self.write_u8(if micros == 0 { 8 } else { 12 });
        self.write_u8(u8::from(negative));
        self.write_u32_le(days);
        self.write_u8(hours);
        self.write_u8(minutes);
        self.write_u8(seconds);
        if micros != 0 {
            self.write_u32_le(micros);
        }
    }

    /// Write a binary-protocol DATE/DATETIME value.
    ///
    /// Length tag: 0 when every component is zero, 4 for a bare date,
    /// 7 with a time of day, 11 with microseconds.
    #[allow(clippy::too_many_arguments)]
    pub fn write_binary_datetime(
        &mut self,
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        micros: u32,
    ) {
        let tag = if micros != 0 {
            11
        } else if hour != 0 || minute != 0 || second != 0 {
            7
        } else if year != 0 || month != 0 || day != 0 {
            4
        } else {
            0
        };
        self.write_u8(tag);
        if tag == 0 {
            return;
        }
        self.write_u16_le(year);
        self.write_u8(month);
        self.write_u8(day);
        if tag >= 7 {
            self.write_u8(hour);
            self.write_u8(minute);
            self.write_u8(second);
        }
        if tag >= 11 {
            self.write_u32_le(micros);
        }
    }

    /// Build a complete packet with header and payload.
    pub fn build_packet(&self, sequence_id: u8) -> Vec<u8> {
        build_packet_from_payload(&self.buffer, sequence_id)
    }
}

/// Frame a payload, splitting anything over 16MB - 1 into consecutive
/// packets with increasing sequence numbers. A split landing exactly on
/// the boundary is closed with an explicit zero-length packet.
pub fn build_packet_from_payload(payload: &[u8], mut sequence_id: u8) -> Vec<u8> {
    let mut result = Vec::with_capacity(payload.len() + PacketHeader::SIZE);

    if payload.len() <= MAX_PACKET_SIZE {
        let header = PacketHeader {
            payload_length: payload.len() as u32,
            sequence_id,
        };
        result.extend_from_slice(&header.to_bytes());
        result.extend_from_slice(payload);
        return result;
    }

    let mut offset = 0;
    while offset < payload.len() {
        let chunk_len = (payload.len() - offset).min(MAX_PACKET_SIZE);
        let header = PacketHeader {
            payload_length: chunk_len as u32,
            sequence_id,
        };
        result.extend_from_slice(&header.to_bytes());
        result.extend_from_slice(&payload[offset..offset + chunk_len]);
        offset += chunk_len;
        sequence_id = sequence_id.wrapping_add(1);

        // A final chunk of exactly MAX_PACKET_SIZE needs an empty
        // packet to mark the end of the payload
        if chunk_len == MAX_PACKET_SIZE && offset == payload.len() {
            let header = PacketHeader {
                payload_length: 0,
                sequence_id,
            };
            result.extend_from_slice(&header.to_bytes());
        }
    }

    result
}

/// Helper to build a command packet (command byte + payload, sequence 0).
pub fn build_command_packet(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(1 + payload.len());
    writer.write_u8(command);
    writer.write_bytes(payload);
    writer.build_packet(0)
}

/// Build a null bitmap covering `values`, with `reserved` leading bits
/// kept clear. Bit `i + reserved` is set when `values[i]` is NULL.
pub fn encode_null_bitmap(values: &[Value], reserved: usize) -> Vec<u8> {
    let mut bitmap = vec![0u8; (values.len() + reserved + 7) / 8];
    for (i, value) in values.iter().enumerate() {
        if value.is_null() {
            let bit = i + reserved;
            bitmap[bit / 8] |= 1 << (bit % 8);
        }
    }
    bitmap
}
