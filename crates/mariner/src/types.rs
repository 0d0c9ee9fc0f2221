//! MariaDB field types and value decoding.
//!
//! Maps the server's field-type codes to host [`Value`]s, for both the
//! text protocol (values arrive as strings) and the binary protocol
//! (values arrive in type-driven fixed or length-prefixed layouts).

use mariner_core::{Error, ProtocolError, Result, Value};

use crate::protocol::reader::PacketReader;

/// MariaDB field type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    Varchar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Map a wire type code to a field type. Unknown codes yield None
    /// and decode as NULL.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(FieldType::Decimal),
            0x01 => Some(FieldType::Tiny),
            0x02 => Some(FieldType::Short),
            0x03 => Some(FieldType::Long),
            0x04 => Some(FieldType::Float),
            0x05 => Some(FieldType::Double),
            0x06 => Some(FieldType::Null),
            0x07 => Some(FieldType::Timestamp),
            0x08 => Some(FieldType::LongLong),
            0x09 => Some(FieldType::Int24),
            0x0A => Some(FieldType::Date),
            0x0B => Some(FieldType::Time),
            0x0C => Some(FieldType::DateTime),
            0x0D => Some(FieldType::Year),
            0x0F => Some(FieldType::Varchar),
            0x10 => Some(FieldType::Bit),
            0xF5 => Some(FieldType::Json),
            0xF6 => Some(FieldType::NewDecimal),
            0xF7 => Some(FieldType::Enum),
            0xF8 => Some(FieldType::Set),
            0xF9 => Some(FieldType::TinyBlob),
            0xFA => Some(FieldType::MediumBlob),
            0xFB => Some(FieldType::LongBlob),
            0xFC => Some(FieldType::Blob),
            0xFD => Some(FieldType::VarString),
            0xFE => Some(FieldType::String),
            0xFF => Some(FieldType::Geometry),
            _ => None,
        }
    }
}

/// Column definition flags.
#[allow(dead_code)]
pub mod field_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 1 << 1;
    pub const UNIQUE_KEY: u16 = 1 << 2;
    pub const MULTIPLE_KEY: u16 = 1 << 3;
    pub const BLOB: u16 = 1 << 4;
    pub const UNSIGNED: u16 = 1 << 5;
    pub const ZEROFILL: u16 = 1 << 6;
    pub const BINARY: u16 = 1 << 7;
    pub const ENUM: u16 = 1 << 8;
    pub const AUTO_INCREMENT: u16 = 1 << 9;
    pub const TIMESTAMP: u16 = 1 << 10;
    pub const SET: u16 = 1 << 11;
    pub const NO_DEFAULT_VALUE: u16 = 1 << 12;
    pub const ON_UPDATE_NOW: u16 = 1 << 13;
}

/// Binary collation id; string types carrying it decode as bytes.
const BINARY_COLLATION: u16 = 63;

/// Extended-metadata tags on MariaDB column definitions.
const EXT_META_UUID: u8 = 0;
const EXT_META_JSON: u8 = 1;

/// A column definition from a result set or prepare response.
#[derive(Debug, Clone)]
pub struct Field {
    /// Column name (alias if the query used one)
    pub name: String,
    /// Collation id
    pub collation: u16,
    /// Display length
    pub length: u32,
    /// Wire type code; None for codes this driver does not know
    pub field_type: Option<FieldType>,
    /// Column flags
    pub flags: u16,
    /// Decimal digits (or 31 for dynamic)
    pub decimals: u8,
    /// Extended metadata marked this column as JSON
    pub json: bool,
    /// Extended metadata marked this column as UUID
    pub uuid: bool,
}

impl Field {
    /// Parse a column definition payload.
    ///
    /// Layout: catalog, database, table alias, table, column alias,
    /// column (all lenenc strings), then with `ext_metadata` a lenenc
    /// block of type-tagged pairs, then fixed-length-block length (12),
    /// collation u16, length u32, type u8, flags u16, decimals u8.
    pub fn parse(reader: &mut PacketReader<'_>, ext_metadata: bool) -> Result<Self> {
        reader.read_lenenc_bytes()?; // catalog
        reader.read_lenenc_bytes()?; // database
        reader.read_lenenc_bytes()?; // table alias
        reader.read_lenenc_bytes()?; // table
        let name = reader.read_lenenc_string()?;
        reader.read_lenenc_bytes()?; // column original name

        let mut json = false;
        let mut uuid = false;
        if ext_metadata {
            let block = reader.read_lenenc_bytes()?;
            let mut meta = PacketReader::new(block);
            while !meta.is_empty() {
                let tag = meta.read_u8()?;
                let value = meta.read_lenenc_string()?;
                match (tag, value.as_str()) {
                    (EXT_META_UUID, "uuid") => uuid = true,
                    (EXT_META_JSON, "json") => json = true,
                    _ => {}
                }
            }
        }

        reader.read_lenenc_int()?; // fixed-length block, always 12
        let collation = reader.read_u16_le()?;
        let length = reader.read_u32_le()?;
        let field_type = FieldType::from_u8(reader.read_u8()?);
        let flags = reader.read_u16_le()?;
        let decimals = reader.read_u8()?;
        reader.skip(2)?; // filler

        Ok(Self {
            name,
            collation,
            length,
            field_type,
            flags,
            decimals,
            json,
            uuid,
        })
    }

    /// Is the UNSIGNED flag set?
    pub fn is_unsigned(&self) -> bool {
        self.flags & field_flags::UNSIGNED != 0
    }

    /// Does this column carry binary (not text) string data?
    pub fn is_binary(&self) -> bool {
        self.collation == BINARY_COLLATION
    }
}

/// Days from civil date to the 1970-01-01 epoch (proleptic Gregorian).
pub fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = i64::from(year) - i64::from(month <= 2);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = i64::from((month + 9) % 12);
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date from days since the 1970-01-01 epoch.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (
        (y + i64::from(month <= 2)) as i32,
        month,
        day,
    )
}

/// Epoch microseconds from calendar components.
fn timestamp_micros(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    micros: u32,
) -> i64 {
    let days = days_from_civil(i32::from(year), u32::from(month), u32::from(day));
    (days * 86_400
        + i64::from(hour) * 3_600
        + i64::from(minute) * 60
        + i64::from(second))
        * 1_000_000
        + i64::from(micros)
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError::new(message))
}

/// Apply the YEAR display-width rule: a 2-digit YEAR below 70 lands in
/// the 2000s, everything else in the 1900s.
fn year_value(raw: i64, field: &Field) -> Value {
    if field.length == 2 {
        let adjusted = if raw < 70 { 2000 + raw } else { 1900 + raw };
        Value::SmallInt(adjusted as i16)
    } else {
        #[allow(clippy::cast_possible_truncation)]
        Value::SmallInt(raw as i16)
    }
}

/// Map an integer column to the host variant of its declared width.
/// Unsigned columns step up one width so the full range fits.
fn integer_value(field: &Field, field_type: FieldType, v: i64) -> Value {
    #[allow(clippy::cast_possible_truncation)]
    match (field_type, field.is_unsigned()) {
        (FieldType::Tiny, false) => Value::TinyInt(v as i8),
        (FieldType::Tiny, true) | (FieldType::Short, false) => Value::SmallInt(v as i16),
        (FieldType::Short, true) | (FieldType::Int24, _) | (FieldType::Long, false) => {
            Value::Int(v as i32)
        }
        _ => Value::BigInt(v),
    }
}

fn string_value(field: &Field, bytes: &[u8]) -> Result<Value> {
    if field.json || field.field_type == Some(FieldType::Json) {
        let parsed: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
            Error::Protocol(ProtocolError {
                message: format!("invalid JSON in column `{}`", field.name),
                raw_data: Some(bytes.to_vec()),
                source: Some(Box::new(e)),
            })
        })?;
        return Ok(Value::Json(parsed));
    }
    if field.is_binary() && !field.uuid {
        return Ok(Value::Bytes(bytes.to_vec()));
    }
    let text = String::from_utf8(bytes.to_vec())
        .map_err(|_| protocol_error(format!("invalid UTF-8 in column `{}`", field.name)))?;
    Ok(Value::Text(text))
}

fn set_value(field: &Field, bytes: &[u8]) -> Result<Value> {
    let text = String::from_utf8(bytes.to_vec())
        .map_err(|_| protocol_error(format!("invalid UTF-8 in column `{}`", field.name)))?;
    if text.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    Ok(Value::Array(
        text.split(',').map(|s| Value::Text(s.to_string())).collect(),
    ))
}

fn parse_text<T: std::str::FromStr>(field: &Field, raw: &[u8]) -> Result<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| protocol_error(format!("malformed value in column `{}`", field.name)))
}

/// Parse a text-protocol date as days since epoch.
fn parse_text_date(field: &Field, s: &str) -> Result<i64> {
    let mut parts = s.splitn(3, '-');
    let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(protocol_error(format!(
            "malformed DATE in column `{}`",
            field.name
        )));
    };
    let err = || protocol_error(format!("malformed DATE in column `{}`", field.name));
    let year: i32 = y.parse().map_err(|_| err())?;
    let month: u32 = m.parse().map_err(|_| err())?;
    let day: u32 = d.parse().map_err(|_| err())?;
    Ok(days_from_civil(year, month, day))
}

/// Parse a text-protocol time (possibly negative, hours unbounded by a
/// day) as signed microseconds.
fn parse_text_time(field: &Field, s: &str) -> Result<i64> {
    let err = || protocol_error(format!("malformed TIME in column `{}`", field.name));
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (clock, frac) = match body.split_once('.') {
        Some((c, f)) => (c, Some(f)),
        None => (body, None),
    };
    let mut parts = clock.splitn(3, ':');
    let (Some(h), Some(m), Some(sec)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(err());
    };
    let hours: i64 = h.parse().map_err(|_| err())?;
    let minutes: i64 = m.parse().map_err(|_| err())?;
    let seconds: i64 = sec.parse().map_err(|_| err())?;
    let micros: i64 = match frac {
        Some(f) => {
            let padded = format!("{f:0<6}");
            padded[..6].parse().map_err(|_| err())?
        }
        None => 0,
    };
    let total = (hours * 3_600 + minutes * 60 + seconds) * 1_000_000 + micros;
    Ok(if negative { -total } else { total })
}

/// Parse a text-protocol datetime as epoch microseconds.
fn parse_text_datetime(field: &Field, s: &str) -> Result<i64> {
    let err = || {
        protocol_error(format!(
            "malformed DATETIME in column `{}`",
            field.name
        ))
    };
    let (date, time) = s.split_once(' ').ok_or_else(err)?;
    let days = parse_text_date(field, date)?;
    let time_micros = parse_text_time(field, time)?;
    Ok(days * 86_400 * 1_000_000 + time_micros)
}

/// Decode a text-protocol value per the column's declared type.
pub fn decode_text_value(field: &Field, raw: &[u8]) -> Result<Value> {
    let Some(field_type) = field.field_type else {
        return Ok(Value::Null);
    };
    match field_type {
        FieldType::Null => Ok(Value::Null),
        FieldType::Tiny
        | FieldType::Short
        | FieldType::Int24
        | FieldType::Long => {
            let v: i64 = parse_text(field, raw)?;
            Ok(integer_value(field, field_type, v))
        }
        FieldType::LongLong => {
            if field.is_unsigned() {
                let v: u64 = parse_text(field, raw)?;
                Ok(Value::from_u64(v))
            } else {
                Ok(Value::BigInt(parse_text(field, raw)?))
            }
        }
        FieldType::Year => {
            let v: i64 = parse_text(field, raw)?;
            Ok(year_value(v, field))
        }
        FieldType::Float => Ok(Value::Float(parse_text(field, raw)?)),
        FieldType::Double => Ok(Value::Double(parse_text(field, raw)?)),
        FieldType::Decimal | FieldType::NewDecimal => {
            let text = String::from_utf8(raw.to_vec()).map_err(|_| {
                protocol_error(format!("malformed DECIMAL in column `{}`", field.name))
            })?;
            Ok(Value::Decimal(text))
        }
        FieldType::Date => {
            let s = std::str::from_utf8(raw).map_err(|_| {
                protocol_error(format!("malformed DATE in column `{}`", field.name))
            })?;
            #[allow(clippy::cast_possible_truncation)]
            Ok(Value::Date(parse_text_date(field, s)? as i32))
        }
        FieldType::Time => {
            let s = std::str::from_utf8(raw).map_err(|_| {
                protocol_error(format!("malformed TIME in column `{}`", field.name))
            })?;
            Ok(Value::Time(parse_text_time(field, s)?))
        }
        FieldType::DateTime | FieldType::Timestamp => {
            let s = std::str::from_utf8(raw).map_err(|_| {
                protocol_error(format!("malformed DATETIME in column `{}`", field.name))
            })?;
            Ok(Value::Timestamp(parse_text_datetime(field, s)?))
        }
        FieldType::Bit => {
            if field.length == 1 {
                Ok(Value::Bool(raw.first().copied().unwrap_or(0) != 0))
            } else {
                Ok(Value::Bytes(raw.to_vec()))
            }
        }
        FieldType::Set => set_value(field, raw),
        FieldType::Enum => string_value(field, raw),
        FieldType::Json
        | FieldType::Varchar
        | FieldType::VarString
        | FieldType::String
        | FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob => string_value(field, raw),
        FieldType::Geometry => Ok(Value::Bytes(raw.to_vec())),
    }
}

/// Decode a binary-protocol value per the column's declared type,
/// advancing the reader by exactly the value's width.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub fn decode_binary_value(field: &Field, reader: &mut PacketReader<'_>) -> Result<Value> {
    let Some(field_type) = field.field_type else {
        return Ok(Value::Null);
    };
    match field_type {
        FieldType::Null => Ok(Value::Null),
        FieldType::Tiny => {
            let byte = reader.read_u8()?;
            let v = if field.is_unsigned() {
                i64::from(byte)
            } else {
                i64::from(byte as i8)
            };
            Ok(integer_value(field, field_type, v))
        }
        FieldType::Short => {
            let raw = reader.read_u16_le()?;
            let v = if field.is_unsigned() {
                i64::from(raw)
            } else {
                i64::from(raw as i16)
            };
            Ok(integer_value(field, field_type, v))
        }
        FieldType::Year => {
            let v = reader.read_u16_le()?;
            Ok(year_value(i64::from(v), field))
        }
        FieldType::Int24 | FieldType::Long => {
            let raw = reader.read_u32_le()?;
            let v = if field.is_unsigned() {
                i64::from(raw)
            } else {
                i64::from(raw as i32)
            };
            Ok(integer_value(field, field_type, v))
        }
        FieldType::LongLong => {
            let v = reader.read_u64_le()?;
            if field.is_unsigned() {
                Ok(Value::from_u64(v))
            } else {
                Ok(Value::BigInt(v as i64))
            }
        }
        FieldType::Float => {
            let bits = reader.read_u32_le()?;
            Ok(Value::Float(f32::from_bits(bits)))
        }
        FieldType::Double => {
            let bits = reader.read_u64_le()?;
            Ok(Value::Double(f64::from_bits(bits)))
        }
        FieldType::Decimal | FieldType::NewDecimal => {
            Ok(Value::Decimal(reader.read_lenenc_string()?))
        }
        FieldType::Date => {
            let (year, month, day, ..) = reader.read_binary_datetime()?;
            if year == 0 && month == 0 && day == 0 {
                return Ok(Value::Date(0));
            }
            let days =
                days_from_civil(i32::from(year), u32::from(month), u32::from(day));
            Ok(Value::Date(days as i32))
        }
        FieldType::DateTime | FieldType::Timestamp => {
            let (year, month, day, hour, minute, second, micros) =
                reader.read_binary_datetime()?;
            if year == 0 && month == 0 && day == 0 {
                return Ok(Value::Timestamp(0));
            }
            Ok(Value::Timestamp(timestamp_micros(
                year, month, day, hour, minute, second, micros,
            )))
        }
        FieldType::Time => Ok(Value::Time(reader.read_binary_time()?)),
        FieldType::Bit => {
            let bytes = reader.read_lenenc_bytes()?;
            if field.length == 1 {
                Ok(Value::Bool(bytes.first().copied().unwrap_or(0) != 0))
            } else {
                Ok(Value::Bytes(bytes.to_vec()))
            }
        }
        FieldType::Set => {
            let bytes = reader.read_lenenc_bytes()?;
            set_value(field, bytes)
        }
        FieldType::Enum => {
            let bytes = reader.read_lenenc_bytes()?;
            string_value(field, bytes)
        }
        FieldType::Json
        | FieldType::Varchar
        | FieldType::VarString
        | FieldType::String
        | FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob => {
            let bytes = reader.read_lenenc_bytes()?;
            string_value(field, bytes)
        }
        FieldType::Geometry => {
            let bytes = reader.read_lenenc_bytes()?;
            Ok(Value::Bytes(bytes.to_vec()))
        }
    }
}
