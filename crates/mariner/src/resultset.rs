//! Result set decoders.
//!
//! The reassembler hands over the merged payloads of one result set:
//! column count, column definitions, then row packets (EOF separators
//! already stripped). The decoders here keep row payloads raw until
//! the caller asks for typed values, so iterating cheaply over raw
//! byte slices stays possible.

use std::sync::Arc;

use mariner_core::{ColumnInfo, Result, Row, Value};

use crate::protocol::reader::{PacketReader, null_bit_positions};
use crate::types::{Field, decode_binary_value, decode_text_value};

fn parse_fields(payloads: &[Vec<u8>], ext_metadata: bool) -> Result<(Vec<Field>, usize)> {
    let first = payloads
        .first()
        .ok_or_else(|| mariner_core::ProtocolError::new("empty result set response"))?;
    let mut reader = PacketReader::new(first);
    let column_count = usize::try_from(reader.read_lenenc_int()?).unwrap_or(0);

    let mut fields = Vec::with_capacity(column_count);
    for payload in payloads.iter().skip(1).take(column_count) {
        let mut reader = PacketReader::new(payload);
        fields.push(Field::parse(&mut reader, ext_metadata)?);
    }
    if fields.len() != column_count {
        return Err(mariner_core::ProtocolError::new(format!(
            "result set declared {column_count} columns but carried {}",
            fields.len()
        ))
        .into());
    }
    Ok((fields, 1 + column_count))
}

fn column_info(fields: &[Field]) -> Arc<ColumnInfo> {
    Arc::new(ColumnInfo::new(
        fields.iter().map(|f| f.name.clone()).collect(),
    ))
}

/// A text-protocol result set.
#[derive(Debug)]
pub struct TextResultSet {
    fields: Vec<Field>,
    columns: Arc<ColumnInfo>,
    row_payloads: Vec<Vec<u8>>,
}

impl TextResultSet {
    /// Decode the field descriptors of a text result set and retain
    /// the row packets undecoded.
    pub fn parse(mut payloads: Vec<Vec<u8>>, ext_metadata: bool) -> Result<Self> {
        let (fields, consumed) = parse_fields(&payloads, ext_metadata)?;
        let row_payloads = payloads.split_off(consumed);
        let columns = column_info(&fields);
        Ok(Self {
            fields,
            columns,
            row_payloads,
        })
    }

    /// Column definitions, in select order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Shared column-name table for rows of this result set.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.row_payloads.len()
    }

    /// True when the result set has no rows.
    pub fn is_empty(&self) -> bool {
        self.row_payloads.is_empty()
    }

    /// Iterate rows as raw byte slices, positionally aligned with
    /// [`fields`](Self::fields). NULLs come through as `None`. No type
    /// transformation happens here.
    pub fn raw_rows(
        &self,
    ) -> impl Iterator<Item = Result<Vec<Option<&[u8]>>>> + '_ {
        let count = self.fields.len();
        self.row_payloads.iter().map(move |payload| {
            let mut reader = PacketReader::new(payload);
            let mut row = Vec::with_capacity(count);
            for _ in 0..count {
                row.push(reader.read_opt_lenenc_bytes()?);
            }
            Ok(row)
        })
    }

    /// Decode every row into typed, named values.
    pub fn rows(&self) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(self.row_payloads.len());
        for raw in self.raw_rows() {
            let raw = raw?;
            let mut values = Vec::with_capacity(self.fields.len());
            for (field, cell) in self.fields.iter().zip(raw) {
                values.push(match cell {
                    Some(bytes) => decode_text_value(field, bytes)?,
                    None => Value::Null,
                });
            }
            rows.push(Row::with_columns(Arc::clone(&self.columns), values));
        }
        Ok(rows)
    }
}

/// A binary-protocol result set, as produced by executing a prepared
/// statement.
#[derive(Debug)]
pub struct BinaryResultSet {
    fields: Vec<Field>,
    columns: Arc<ColumnInfo>,
    row_payloads: Vec<Vec<u8>>,
}

impl BinaryResultSet {
    /// Decode the field descriptors of a binary result set and retain
    /// the row packets undecoded.
    pub fn parse(mut payloads: Vec<Vec<u8>>, ext_metadata: bool) -> Result<Self> {
        let (fields, consumed) = parse_fields(&payloads, ext_metadata)?;
        let row_payloads = payloads.split_off(consumed);
        let columns = column_info(&fields);
        Ok(Self {
            fields,
            columns,
            row_payloads,
        })
    }

    /// Column definitions, in select order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Shared column-name table for rows of this result set.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.row_payloads.len()
    }

    /// True when the result set has no rows.
    pub fn is_empty(&self) -> bool {
        self.row_payloads.is_empty()
    }

    /// Decode every row. Binary rows are type-driven: a 0x00 marker,
    /// a null bitmap with 2 reserved bits, then one fixed- or
    /// length-prefixed value per non-null column.
    pub fn rows(&self) -> Result<Vec<Row>> {
        let count = self.fields.len();
        let bitmap_len = (count + 2 + 7) / 8;
        let mut rows = Vec::with_capacity(self.row_payloads.len());
        for payload in &self.row_payloads {
            let mut reader = PacketReader::new(payload);
            let marker = reader.read_u8()?;
            if marker != 0x00 {
                return Err(mariner_core::ProtocolError::new(format!(
                    "binary row marker {marker:#04x}, expected 0x00"
                ))
                .into());
            }
            let bitmap = reader.read_bytes(bitmap_len)?;
            let nulls = null_bit_positions(bitmap, count, 2);
            let mut null_iter = nulls.iter().peekable();

            let mut values = Vec::with_capacity(count);
            for (i, field) in self.fields.iter().enumerate() {
                if null_iter.peek() == Some(&&i) {
                    null_iter.next();
                    values.push(Value::Null);
                } else {
                    values.push(decode_binary_value(field, &mut reader)?);
                }
            }
            rows.push(Row::with_columns(Arc::clone(&self.columns), values));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketWriter;
    use crate::types::FieldType;

    fn field_payload(name: &str, field_type: FieldType, length: u32, flags: u16) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_lenenc_string("def");
        writer.write_lenenc_string("testdb");
        writer.write_lenenc_string("t");
        writer.write_lenenc_string("t");
        writer.write_lenenc_string(name);
        writer.write_lenenc_string(name);
        writer.write_lenenc_int(12);
        writer.write_u16_le(45);
        writer.write_u32_le(length);
        writer.write_u8(field_type as u8);
        writer.write_u16_le(flags);
        writer.write_u8(0);
        writer.write_u16_le(0);
        writer.into_bytes()
    }

    fn text_row(cells: &[Option<&str>]) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        for cell in cells {
            match cell {
                Some(s) => writer.write_lenenc_string(s),
                None => writer.write_lenenc_null(),
            }
        }
        writer.into_bytes()
    }

    fn two_column_payloads() -> Vec<Vec<u8>> {
        vec![
            vec![2], // column count
            field_payload("id", FieldType::Long, 11, 0),
            field_payload("name", FieldType::VarString, 255, 0),
            text_row(&[Some("1"), Some("alice")]),
            text_row(&[Some("2"), None]),
        ]
    }

    #[test]
    fn test_text_resultset_fields() {
        let rs = TextResultSet::parse(two_column_payloads(), false).unwrap();
        assert_eq!(rs.fields().len(), 2);
        assert_eq!(rs.fields()[0].name, "id");
        assert_eq!(rs.fields()[1].name, "name");
        assert_eq!(rs.len(), 2);
    }

    #[test]
    fn test_text_resultset_raw_rows() {
        let rs = TextResultSet::parse(two_column_payloads(), false).unwrap();
        let raw: Vec<_> = rs
            .raw_rows()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(raw[0], vec![Some(b"1".as_slice()), Some(b"alice".as_slice())]);
        assert_eq!(raw[1], vec![Some(b"2".as_slice()), None]);
    }

    #[test]
    fn test_text_resultset_typed_rows() {
        let rs = TextResultSet::parse(two_column_payloads(), false).unwrap();
        let rows = rs.rows().unwrap();
        assert_eq!(rows[0].get_by_name("id"), Some(&Value::Int(1)));
        assert_eq!(
            rows[0].get_by_name("name"),
            Some(&Value::Text("alice".to_string()))
        );
        assert_eq!(rows[1].get_by_name("name"), Some(&Value::Null));
    }

    #[test]
    fn test_text_resultset_column_count_mismatch() {
        let payloads = vec![vec![3], field_payload("id", FieldType::Long, 11, 0)];
        assert!(TextResultSet::parse(payloads, false).is_err());
    }

    #[test]
    fn test_binary_resultset_rows() {
        // SELECT id, score: INT NOT NULL, DOUBLE NULLABLE
        let mut row1 = PacketWriter::new();
        row1.write_u8(0x00);
        row1.write_u8(0b0000_0000); // no nulls, 2 reserved bits
        row1.write_u32_le(7);
        row1.write_u64_le(2.5f64.to_bits());

        let mut row2 = PacketWriter::new();
        row2.write_u8(0x00);
        row2.write_u8(0b0000_1000); // column 1 (bit 1 + 2 reserved) null
        row2.write_u32_le(8);

        let payloads = vec![
            vec![2],
            field_payload("id", FieldType::Long, 11, 0),
            field_payload("score", FieldType::Double, 22, 0),
            row1.into_bytes(),
            row2.into_bytes(),
        ];
        let rs = BinaryResultSet::parse(payloads, false).unwrap();
        let rows = rs.rows().unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::Int(7)));
        assert_eq!(rows[0].get(1), Some(&Value::Double(2.5)));
        assert_eq!(rows[1].get(0), Some(&Value::Int(8)));
        assert_eq!(rows[1].get(1), Some(&Value::Null));
    }

    #[test]
    fn test_binary_resultset_bad_marker() {
        let payloads = vec![
            vec![1],
            field_payload("id", FieldType::Long, 11, 0),
            vec![0x01, 0x00, 0x07, 0x00, 0x00, 0x00],
        ];
        let rs = BinaryResultSet::parse(payloads, false).unwrap();
        assert!(rs.rows().is_err());
    }

    #[test]
    fn test_empty_resultset() {
        let payloads = vec![vec![1], field_payload("id", FieldType::Long, 11, 0)];
        let rs = TextResultSet::parse(payloads, false).unwrap();
        assert!(rs.is_empty());
        assert!(rs.rows().unwrap().is_empty());
    }
}
