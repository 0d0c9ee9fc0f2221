//! Prepared statement packets.
//!
//! COM_STMT_PREPARE / COM_STMT_EXECUTE / COM_STMT_CLOSE encoding and
//! the prepare-response header. Parameter values are serialized in the
//! binary protocol with types inferred from the host value, narrowing
//! integers to the smallest wire width that fits and sending
//! non-integral numbers as NEWDECIMAL text.

use mariner_core::{ClientError, Error, Result, Value};

use crate::protocol::writer::{PacketWriter, build_command_packet, encode_null_bitmap};
use crate::protocol::{Command, PacketReader};
use crate::types::{FieldType, civil_from_days};

/// The binary protocol describes parameter count as a u16.
pub const MAX_STMT_ARGUMENTS: usize = u16::MAX as usize;

/// UNSIGNED marker in an EXECUTE parameter-type entry.
const PARAM_UNSIGNED_FLAG: u8 = 0x80;

/// Parsed COM_STMT_PREPARE OK response header.
#[derive(Debug, Clone, Copy)]
pub struct StmtPrepareOk {
    /// Server-assigned statement id
    pub statement_id: u32,
    /// Number of result columns
    pub num_columns: u16,
    /// Number of parameter placeholders
    pub num_params: u16,
    /// Number of warnings
    pub warnings: u16,
}

impl StmtPrepareOk {
    /// Wire size of the prepare OK header.
    pub const SIZE: usize = 12;

    /// Does a payload look like a prepare OK header? Distinguished
    /// from a plain OK packet by its exact 12-byte length.
    pub fn matches(payload: &[u8]) -> bool {
        payload.len() == Self::SIZE && payload[0] == 0x00
    }
}

/// Parse a COM_STMT_PREPARE OK header.
///
/// Layout: 0x00 marker, statement id u32, column count u16, parameter
/// count u16, one filler byte, warning count u16.
pub fn parse_stmt_prepare_ok(payload: &[u8]) -> Result<StmtPrepareOk> {
    if !StmtPrepareOk::matches(payload) {
        return Err(mariner_core::ProtocolError {
            message: format!(
                "prepare response header of {} bytes, expected {}",
                payload.len(),
                StmtPrepareOk::SIZE
            ),
            raw_data: Some(payload.to_vec()),
            source: None,
        }
        .into());
    }
    let mut reader = PacketReader::new(payload);
    reader.skip(1)?;
    let statement_id = reader.read_u32_le()?;
    let num_columns = reader.read_u16_le()?;
    let num_params = reader.read_u16_le()?;
    reader.skip(1)?;
    let warnings = reader.read_u16_le()?;
    Ok(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings,
    })
}

/// Build a COM_STMT_PREPARE packet.
pub fn build_stmt_prepare_packet(sql: &str) -> Vec<u8> {
    build_command_packet(Command::StmtPrepare as u8, sql.as_bytes())
}

/// Build a COM_STMT_CLOSE packet. The server sends no reply.
pub fn build_stmt_close_packet(statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtClose as u8);
    writer.write_u32_le(statement_id);
    writer.build_packet(0)
}

/// Wire type and representation chosen for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ParamType {
    field_type: FieldType,
    unsigned: bool,
}

impl ParamType {
    fn signed(field_type: FieldType) -> Self {
        Self {
            field_type,
            unsigned: false,
        }
    }

    fn unsigned(field_type: FieldType) -> Self {
        Self {
            field_type,
            unsigned: true,
        }
    }
}

/// Narrow an integer to the smallest wire type that holds it. Signed
/// ranges are preferred; the unsigned variant of the same width covers
/// the positive values just past the signed maximum.
fn integer_param_type(v: i64) -> ParamType {
    if i8::try_from(v).is_ok() {
        ParamType::signed(FieldType::Tiny)
    } else if u8::try_from(v).is_ok() {
        ParamType::unsigned(FieldType::Tiny)
    } else if i16::try_from(v).is_ok() {
        ParamType::signed(FieldType::Short)
    } else if u16::try_from(v).is_ok() {
        ParamType::unsigned(FieldType::Short)
    } else if i32::try_from(v).is_ok() {
        ParamType::signed(FieldType::Long)
    } else if u32::try_from(v).is_ok() {
        ParamType::unsigned(FieldType::Long)
    } else {
        ParamType::signed(FieldType::LongLong)
    }
}

fn param_type(value: &Value) -> Result<ParamType> {
    Ok(match value {
        Value::Null => ParamType::signed(FieldType::Null),
        Value::Bool(_) => ParamType::signed(FieldType::Tiny),
        Value::TinyInt(v) => integer_param_type(i64::from(*v)),
        Value::SmallInt(v) => integer_param_type(i64::from(*v)),
        Value::Int(v) => integer_param_type(i64::from(*v)),
        Value::BigInt(v) => integer_param_type(*v),
        // Non-integral numbers travel as NEWDECIMAL text so the server
        // coerces them per column type instead of receiving raw IEEE bits
        Value::Float(_) | Value::Double(_) | Value::Decimal(_) => {
            ParamType::signed(FieldType::NewDecimal)
        }
        Value::Text(_) | Value::Uuid(_) => ParamType::signed(FieldType::VarString),
        Value::Bytes(_) => ParamType::signed(FieldType::Blob),
        Value::Date(_) => ParamType::signed(FieldType::Date),
        Value::Time(_) => ParamType::signed(FieldType::Time),
        Value::Timestamp(_) => ParamType::signed(FieldType::DateTime),
        Value::Json(_) => ParamType::signed(FieldType::Json),
        Value::Array(_) => {
            return Err(Error::Type(mariner_core::TypeError {
                expected: "a scalar parameter",
                actual: value.type_name().to_string(),
                column: None,
            }));
        }
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn write_integer_param(writer: &mut PacketWriter, ty: ParamType, v: i64) {
    match ty.field_type {
        FieldType::Tiny => writer.write_u8(v as u8),
        FieldType::Short => writer.write_u16_le(v as u16),
        FieldType::Long => writer.write_u32_le(v as u32),
        _ => writer.write_i64_le(v),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn write_param_value(writer: &mut PacketWriter, ty: ParamType, value: &Value) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(v) => writer.write_u8(u8::from(*v)),
        Value::TinyInt(v) => write_integer_param(writer, ty, i64::from(*v)),
        Value::SmallInt(v) => write_integer_param(writer, ty, i64::from(*v)),
        Value::Int(v) => write_integer_param(writer, ty, i64::from(*v)),
        Value::BigInt(v) => write_integer_param(writer, ty, *v),
        Value::Float(v) => writer.write_lenenc_string(&v.to_string()),
        Value::Double(v) => writer.write_lenenc_string(&v.to_string()),
        Value::Decimal(s) => writer.write_lenenc_string(s),
        Value::Text(s) => writer.write_lenenc_string(s),
        Value::Bytes(b) => writer.write_lenenc_bytes(b),
        Value::Uuid(bytes) => {
            writer.write_lenenc_string(&format_uuid(bytes));
        }
        Value::Date(days) => {
            let (year, month, day) = civil_from_days(i64::from(*days));
            writer.write_binary_datetime(year as u16, month as u8, day as u8, 0, 0, 0, 0);
        }
        Value::Time(micros) => writer.write_binary_time(*micros),
        Value::Timestamp(micros) => {
            let days = micros.div_euclid(86_400 * 1_000_000);
            let rem = micros.rem_euclid(86_400 * 1_000_000);
            let (year, month, day) = civil_from_days(days);
            let second_of_day = rem / 1_000_000;
            writer.write_binary_datetime(
                year as u16,
                month as u8,
                day as u8,
                (second_of_day / 3_600) as u8,
                ((second_of_day / 60) % 60) as u8,
                (second_of_day % 60) as u8,
                (rem % 1_000_000) as u32,
            );
        }
        Value::Json(v) => {
            let text = serde_json::to_string(v).map_err(|e| {
                Error::Protocol(mariner_core::ProtocolError {
                    message: "unserializable JSON parameter".to_string(),
                    raw_data: None,
                    source: Some(Box::new(e)),
                })
            })?;
            writer.write_lenenc_string(&text);
        }
        Value::Array(_) => unreachable!("rejected by param_type"),
    }
    Ok(())
}

fn format_uuid(bytes: &[u8; 16]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

/// Build a COM_STMT_EXECUTE packet.
///
/// Argument-count problems are rejected here, before anything touches
/// the wire: more than 65535 arguments cannot be described by the
/// protocol, and fewer arguments than the statement has placeholders
/// would fail server-side anyway. Extra arguments beyond the
/// placeholder count are ignored.
pub fn build_stmt_execute_packet(stmt: &StmtPrepareOk, args: &[Value]) -> Result<Vec<u8>> {
    if args.len() > MAX_STMT_ARGUMENTS {
        return Err(ClientError::too_many_arguments(args.len()).into());
    }
    let param_count = usize::from(stmt.num_params);
    if args.len() < param_count {
        return Err(ClientError::missing_arguments(param_count, args.len()).into());
    }
    let params = &args[..param_count];

    let mut writer = PacketWriter::with_capacity(32 + params.len() * 8);
    writer.write_u8(Command::StmtExecute as u8);
    writer.write_u32_le(stmt.statement_id);
    writer.write_u8(0); // no cursor
    writer.write_u32_le(1); // iteration count

    if param_count > 0 {
        writer.write_bytes(&encode_null_bitmap(params, 0));
        writer.write_u8(1); // new params bound

        let mut types = Vec::with_capacity(param_count);
        for value in params {
            types.push(param_type(value)?);
        }
        for ty in &types {
            writer.write_u8(ty.field_type as u8);
            writer.write_u8(if ty.unsigned { PARAM_UNSIGNED_FLAG } else { 0 });
        }
        for (ty, value) in types.iter().zip(params) {
            write_param_value(&mut writer, *ty, value)?;
        }
    }

    Ok(writer.build_packet(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(statement_id: u32, num_params: u16) -> StmtPrepareOk {
        StmtPrepareOk {
            statement_id,
            num_columns: 0,
            num_params,
            warnings: 0,
        }
    }

    #[test]
    fn test_parse_prepare_ok() {
        let payload = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x01, 0x00,
        ];
        let parsed = parse_stmt_prepare_ok(&payload).unwrap();
        assert_eq!(parsed.statement_id, 1);
        assert_eq!(parsed.num_columns, 2);
        assert_eq!(parsed.num_params, 3);
        assert_eq!(parsed.warnings, 1);
    }

    #[test]
    fn test_prepare_ok_length_discriminates_from_plain_ok() {
        // A plain OK payload (7 bytes) must not parse as prepare OK
        let ok = [0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
        assert!(!StmtPrepareOk::matches(&ok));
        assert!(parse_stmt_prepare_ok(&ok).is_err());
        assert!(StmtPrepareOk::matches(&[0x00; 12]));
    }

    #[test]
    fn test_prepare_packet() {
        let packet = build_stmt_prepare_packet("SELECT ?");
        assert_eq!(&packet[..4], &[0x09, 0x00, 0x00, 0x00]);
        assert_eq!(packet[4], 0x16);
        assert_eq!(&packet[5..], b"SELECT ?");
    }

    #[test]
    fn test_close_packet() {
        let packet = build_stmt_close_packet(7);
        assert_eq!(packet, &[0x05, 0x00, 0x00, 0x00, 0x19, 0x07, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_execute_no_params() {
        let packet = build_stmt_execute_packet(&stmt(5, 0), &[]).unwrap();
        assert_eq!(
            &packet[4..],
            &[0x17, 0x05, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_execute_with_null_and_int() {
        let packet =
            build_stmt_execute_packet(&stmt(1, 2), &[Value::Int(3), Value::Null]).unwrap();
        let body = &packet[4..];
        // command + id + cursor + iterations
        assert_eq!(&body[..10], &[0x17, 1, 0, 0, 0, 0, 1, 0, 0, 0]);
        // bitmap: second param null
        assert_eq!(body[10], 0b0000_0010);
        // new params bound
        assert_eq!(body[11], 1);
        // types: TINYINT signed (narrowed from 3), NULL
        assert_eq!(&body[12..16], &[0x01, 0x00, 0x06, 0x00]);
        // value: just the 3
        assert_eq!(&body[16..], &[0x03]);
    }

    #[test]
    fn test_integer_narrowing_sign_aware() {
        assert_eq!(integer_param_type(-1), ParamType::signed(FieldType::Tiny));
        assert_eq!(integer_param_type(127), ParamType::signed(FieldType::Tiny));
        assert_eq!(integer_param_type(200), ParamType::unsigned(FieldType::Tiny));
        assert_eq!(integer_param_type(256), ParamType::signed(FieldType::Short));
        assert_eq!(
            integer_param_type(40_000),
            ParamType::unsigned(FieldType::Short)
        );
        assert_eq!(
            integer_param_type(-40_000),
            ParamType::signed(FieldType::Long)
        );
        assert_eq!(
            integer_param_type(3_000_000_000),
            ParamType::unsigned(FieldType::Long)
        );
        assert_eq!(
            integer_param_type(5_000_000_000),
            ParamType::signed(FieldType::LongLong)
        );
    }

    #[test]
    fn test_non_integral_numbers_sent_as_decimal_text() {
        let packet = build_stmt_execute_packet(&stmt(1, 1), &[Value::Double(1.5)]).unwrap();
        let body = &packet[4..];
        // type entry: NEWDECIMAL signed, value as lenenc text
        assert_eq!(&body[12..14], &[0xF6, 0x00]);
        assert_eq!(&body[14..], &[0x03, b'1', b'.', b'5']);

        let packet = build_stmt_execute_packet(&stmt(1, 1), &[Value::Float(-0.25)]).unwrap();
        let body = &packet[4..];
        assert_eq!(&body[12..14], &[0xF6, 0x00]);
        assert_eq!(&body[14..], &[0x05, b'-', b'0', b'.', b'2', b'5']);
    }

    #[test]
    fn test_text_params_sent_as_var_string() {
        let packet =
            build_stmt_execute_packet(&stmt(1, 1), &[Value::Text("hi".to_string())]).unwrap();
        let body = &packet[4..];
        assert_eq!(&body[12..14], &[0xFD, 0x00]);
        assert_eq!(&body[14..], &[0x02, b'h', b'i']);
    }

    #[test]
    fn test_too_many_arguments_rejected() {
        let args = vec![Value::Null; MAX_STMT_ARGUMENTS + 1];
        let err = build_stmt_execute_packet(&stmt(1, 1), &args).unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }

    #[test]
    fn test_missing_arguments_rejected() {
        let err = build_stmt_execute_packet(&stmt(1, 3), &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }

    #[test]
    fn test_array_parameter_rejected() {
        let err =
            build_stmt_execute_packet(&stmt(1, 1), &[Value::Array(vec![])]).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }

    #[test]
    fn test_temporal_parameters() {
        let packet = build_stmt_execute_packet(
            &stmt(1, 1),
            &[Value::Date(1)], // 1970-01-02
        )
        .unwrap();
        let body = &packet[4..];
        // type entry: DATE signed
        assert_eq!(&body[12..14], &[0x0A, 0x00]);
        // tag 4, year 1970, month 1, day 2
        assert_eq!(&body[14..], &[4, 0xB2, 0x07, 1, 2]);

        let packet =
            build_stmt_execute_packet(&stmt(1, 1), &[Value::Time(-61_000_000)]).unwrap();
        let body = &packet[4..];
        assert_eq!(&body[12..14], &[0x0B, 0x00]);
        assert_eq!(&body[14..], &[8, 1, 0, 0, 0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_extra_arguments_ignored() {
        let exact = build_stmt_execute_packet(&stmt(1, 1), &[Value::Int(3)]).unwrap();
        let extra =
            build_stmt_execute_packet(&stmt(1, 1), &[Value::Int(3), Value::Int(9)]).unwrap();
        assert_eq!(exact, extra);
    }
}
