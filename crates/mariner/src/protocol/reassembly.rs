//! Response reassembly.
//!
//! One command produces one logical exchange: a sequence of OK packets
//! and result sets, optionally terminated by an error. The server
//! streams these as framed packets; [`ResponseReassembler`] consumes
//! payloads one at a time, classifies the first payload of each
//! logical response, and accumulates the rest until the exchange is
//! complete. Multi-statement batches chain responses through the
//! MORE_RESULTS status bit.

use mariner_core::{ProtocolError, Result};

use crate::protocol::prepared::{StmtPrepareOk, parse_stmt_prepare_ok};
use crate::protocol::{
    EofPacket, ErrPacket, MAX_PACKET_SIZE, OkPacket, PacketReader, PacketType,
};
use crate::resultset::{BinaryResultSet, TextResultSet};
use crate::types::Field;

/// What a strategy reports after consuming one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// The current logical response needs more payloads
    Incomplete,
    /// The current logical response is complete, exchange over
    Done,
    /// Complete, but the status flags announce another response
    MoreResults,
}

/// One logical response within an exchange.
#[derive(Debug)]
pub enum Response {
    /// Non-tabular success
    Ok(OkPacket),
    /// Text-protocol result set
    ResultSet(TextResultSet),
    /// Binary-protocol result set
    BinaryResultSet(BinaryResultSet),
    /// Prepare response: header plus parameter and column definitions
    Prepared(PreparedResponse),
}

/// Parsed COM_STMT_PREPARE response.
#[derive(Debug)]
pub struct PreparedResponse {
    pub header: StmtPrepareOk,
    pub params: Vec<Field>,
    pub columns: Vec<Field>,
}

/// A completed exchange: everything the server sent for one command.
#[derive(Debug)]
pub struct Exchange {
    /// Responses in server order; present even when the exchange ends
    /// in an error (a batch can succeed partially)
    pub responses: Vec<Response>,
    /// The error that terminated the exchange, if any
    pub error: Option<ErrPacket>,
}

impl Exchange {
    /// Did the exchange complete without a server error?
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The response shape a command expects, which decides the strategy
/// probed for non-OK payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// OK or Error only (ping, reset, init db)
    Ok,
    /// Text result sets possible (COM_QUERY)
    Query,
    /// Binary result sets possible (COM_STMT_EXECUTE)
    Execute,
    /// Prepare response (COM_STMT_PREPARE)
    Prepare,
}

/// Merges continuation packets: a payload of exactly 16MB - 1 bytes is
/// continued by the next packet, recursively, until a shorter one
/// (possibly empty) closes the sequence.
#[derive(Debug, Default)]
pub struct PacketAccumulator {
    pending: Vec<u8>,
}

impl PacketAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame's payload. Returns the merged logical payload
    /// once complete, or None while a continuation is outstanding.
    pub fn push(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.len() == MAX_PACKET_SIZE {
            self.pending.extend_from_slice(payload);
            return None;
        }
        if self.pending.is_empty() {
            return Some(payload.to_vec());
        }
        let mut merged = std::mem::take(&mut self.pending);
        merged.extend_from_slice(payload);
        Some(merged)
    }
}

/// Text or binary row format for a result-set strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowFormat {
    Text,
    Binary,
}

/// Accumulates one result set: column count, column definitions, an
/// intermediate EOF, rows, and a terminating EOF. The two EOFs look
/// identical on the wire, so a seen-flag tells them apart.
#[derive(Debug)]
struct ResultSetAssembler {
    format: RowFormat,
    payloads: Vec<Vec<u8>>,
    intermediate_eof_seen: bool,
    more_results: bool,
}

impl ResultSetAssembler {
    fn new(format: RowFormat) -> Self {
        Self {
            format,
            payloads: Vec::new(),
            intermediate_eof_seen: false,
            more_results: false,
        }
    }

    fn matches(payload: &[u8]) -> bool {
        PacketType::classify(payload) == PacketType::Data
    }

    fn push(&mut self, payload: &[u8]) -> Result<Push> {
        if PacketType::classify(payload) == PacketType::Eof {
            if self.intermediate_eof_seen {
                let mut reader = PacketReader::new(payload);
                let eof = reader.parse_eof_packet()?;
                self.more_results = eof.has_more_results();
                return Ok(if self.more_results {
                    Push::MoreResults
                } else {
                    Push::Done
                });
            }
            self.intermediate_eof_seen = true;
            return Ok(Push::Incomplete);
        }
        self.payloads.push(payload.to_vec());
        Ok(Push::Incomplete)
    }

    fn finish(self, ext_metadata: bool) -> Result<Response> {
        Ok(match self.format {
            RowFormat::Text => Response::ResultSet(TextResultSet::parse(
                self.payloads,
                ext_metadata,
            )?),
            RowFormat::Binary => Response::BinaryResultSet(BinaryResultSet::parse(
                self.payloads,
                ext_metadata,
            )?),
        })
    }
}

/// Accumulates a prepare response: the 12-byte header, `num_params`
/// parameter definitions with a trailing EOF, then `num_columns`
/// column definitions with a trailing EOF.
#[derive(Debug)]
struct PreparedAssembler {
    ext_metadata: bool,
    header: Option<StmtPrepareOk>,
    params: Vec<Field>,
    columns: Vec<Field>,
}

impl PreparedAssembler {
    fn new(ext_metadata: bool) -> Self {
        Self {
            ext_metadata,
            header: None,
            params: Vec::new(),
            columns: Vec::new(),
        }
    }

    fn matches(payload: &[u8]) -> bool {
        StmtPrepareOk::matches(payload)
    }

    fn is_complete(&self, header: &StmtPrepareOk) -> bool {
        self.params.len() == usize::from(header.num_params)
            && self.columns.len() == usize::from(header.num_columns)
    }

    fn push(&mut self, payload: &[u8]) -> Result<Push> {
        let Some(header) = self.header else {
            let header = parse_stmt_prepare_ok(payload)?;
            let done = header.num_params == 0 && header.num_columns == 0;
            self.header = Some(header);
            return Ok(if done { Push::Done } else { Push::Incomplete });
        };

        // EOFs separate the parameter block from the column block and
        // terminate the whole response; they carry no definition data
        if PacketType::classify(payload) == PacketType::Eof {
            return Ok(if self.is_complete(&header) {
                Push::Done
            } else {
                Push::Incomplete
            });
        }

        let mut reader = PacketReader::new(payload);
        let field = Field::parse(&mut reader, self.ext_metadata)?;
        if self.params.len() < usize::from(header.num_params) {
            self.params.push(field);
        } else {
            self.columns.push(field);
        }
        Ok(Push::Incomplete)
    }

    fn finish(self) -> Result<Response> {
        let header = self.header.ok_or_else(|| {
            ProtocolError::new("prepare response finished without a header")
        })?;
        Ok(Response::Prepared(PreparedResponse {
            header,
            params: self.params,
            columns: self.columns,
        }))
    }
}

/// The closed set of reassembly strategies.
#[derive(Debug)]
enum Assembler {
    ResultSet(ResultSetAssembler),
    Prepared(PreparedAssembler),
}

impl Assembler {
    fn push(&mut self, payload: &[u8]) -> Result<Push> {
        match self {
            Assembler::ResultSet(a) => a.push(payload),
            Assembler::Prepared(a) => a.push(payload),
        }
    }

    fn finish(self, ext_metadata: bool) -> Result<Response> {
        match self {
            Assembler::ResultSet(a) => a.finish(ext_metadata),
            Assembler::Prepared(a) => a.finish(),
        }
    }
}

/// Reassembles the framed payloads of one exchange into logical
/// responses. Feed payloads with [`push`](Self::push); a returned
/// `Exchange` means the server is done talking for this command.
#[derive(Debug)]
pub struct ResponseReassembler {
    kind: ExchangeKind,
    ext_metadata: bool,
    accumulator: PacketAccumulator,
    active: Option<Assembler>,
    responses: Vec<Response>,
    finished: bool,
}

impl ResponseReassembler {
    pub fn new(kind: ExchangeKind, ext_metadata: bool) -> Self {
        Self {
            kind,
            ext_metadata,
            accumulator: PacketAccumulator::new(),
            active: None,
            responses: Vec::new(),
            finished: false,
        }
    }

    fn new_assembler(&self, payload: &[u8]) -> Option<Assembler> {
        match self.kind {
            ExchangeKind::Ok => None,
            ExchangeKind::Query => ResultSetAssembler::matches(payload)
                .then(|| Assembler::ResultSet(ResultSetAssembler::new(RowFormat::Text))),
            ExchangeKind::Execute => ResultSetAssembler::matches(payload)
                .then(|| Assembler::ResultSet(ResultSetAssembler::new(RowFormat::Binary))),
            ExchangeKind::Prepare => PreparedAssembler::matches(payload)
                .then(|| Assembler::Prepared(PreparedAssembler::new(self.ext_metadata))),
        }
    }

    /// Feed one frame's payload. Returns the completed exchange once
    /// the server's response is over.
    pub fn push(&mut self, payload: &[u8]) -> Result<Option<Exchange>> {
        if self.finished {
            return Err(ProtocolError::new(
                "packet received after the exchange completed",
            )
            .into());
        }
        let Some(payload) = self.accumulator.push(payload) else {
            return Ok(None);
        };
        self.dispatch(&payload)
    }

    fn dispatch(&mut self, payload: &[u8]) -> Result<Option<Exchange>> {
        // An error payload terminates the exchange wherever it lands:
        // column counts, field definitions and rows never start 0xFF
        if payload.first() == Some(&0xFF) {
            let mut reader = PacketReader::new(payload);
            let err = reader.parse_err_packet()?;
            self.finished = true;
            self.active = None;
            return Ok(Some(Exchange {
                responses: std::mem::take(&mut self.responses),
                error: Some(err),
            }));
        }

        if let Some(assembler) = self.active.as_mut() {
            return match assembler.push(payload)? {
                Push::Incomplete => Ok(None),
                Push::Done => {
                    self.finalize_active()?;
                    Ok(Some(self.complete()))
                }
                Push::MoreResults => {
                    self.finalize_active()?;
                    Ok(None)
                }
            };
        }

        // The strategy probe runs before OK classification: a prepare
        // header also starts with 0x00
        if let Some(mut assembler) = self.new_assembler(payload) {
            return match assembler.push(payload)? {
                Push::Incomplete => {
                    self.active = Some(assembler);
                    Ok(None)
                }
                Push::Done => {
                    self.active = Some(assembler);
                    self.finalize_active()?;
                    Ok(Some(self.complete()))
                }
                Push::MoreResults => {
                    self.active = Some(assembler);
                    self.finalize_active()?;
                    Ok(None)
                }
            };
        }

        let ok = self.parse_ok(payload)?;
        let more = ok.has_more_results();
        self.responses.push(Response::Ok(ok));
        if more {
            Ok(None)
        } else {
            Ok(Some(self.complete()))
        }
    }

    fn parse_ok(&self, payload: &[u8]) -> Result<OkPacket> {
        if OkPacket::is_eof_form(payload) {
            let mut reader = PacketReader::new(payload);
            let EofPacket {
                warnings,
                status_flags,
            } = reader.parse_eof_packet()?;
            return Ok(OkPacket {
                affected_rows: 0,
                last_insert_id: 0,
                status_flags,
                warnings,
                info: String::new(),
            });
        }
        if PacketType::classify(payload) == PacketType::Ok {
            let mut reader = PacketReader::new(payload);
            return Ok(reader.parse_ok_packet()?);
        }
        Err(mariner_core::Error::Protocol(ProtocolError {
            message: format!(
                "unclassifiable response payload starting {:#04x}",
                payload.first().copied().unwrap_or(0)
            ),
            raw_data: Some(payload.to_vec()),
            source: None,
        }))
    }

    fn finalize_active(&mut self) -> Result<()> {
        if let Some(assembler) = self.active.take() {
            self.responses.push(assembler.finish(self.ext_metadata)?);
        }
        Ok(())
    }

    fn complete(&mut self) -> Exchange {
        self.finished = true;
        Exchange {
            responses: std::mem::take(&mut self.responses),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketWriter;
    use crate::types::FieldType;
    use mariner_core::{Row, Value};

    fn ok_payload(affected: u64, status: u16) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(0x00);
        writer.write_lenenc_int(affected);
        writer.write_lenenc_int(0);
        writer.write_u16_le(status);
        writer.write_u16_le(0);
        writer.into_bytes()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn eof_payload(status: u16) -> Vec<u8> {
        vec![0xFE, 0x00, 0x00, (status & 0xFF) as u8, (status >> 8) as u8]
    }

    fn err_payload(code: u16, message: &str) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(0xFF);
        writer.write_u16_le(code);
        writer.write_u8(b'#');
        writer.write_bytes(b"42000");
        writer.write_bytes(message.as_bytes());
        writer.into_bytes()
    }

    fn field_payload(name: &str, field_type: FieldType) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        for s in ["def", "testdb", "t", "t", name, name] {
            writer.write_lenenc_string(s);
        }
        writer.write_lenenc_int(12);
        writer.write_u16_le(45);
        writer.write_u32_le(11);
        writer.write_u8(field_type as u8);
        writer.write_u16_le(0);
        writer.write_u8(0);
        writer.write_u16_le(0);
        writer.into_bytes()
    }

    fn text_row(cells: &[&str]) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        for cell in cells {
            writer.write_lenenc_string(cell);
        }
        writer.into_bytes()
    }

    const MORE: u16 = crate::protocol::server_status::SERVER_MORE_RESULTS_EXISTS;

    #[test]
    fn test_plain_ok_exchange() {
        let mut r = ResponseReassembler::new(ExchangeKind::Ok, false);
        let exchange = r.push(&ok_payload(3, 0)).unwrap().unwrap();
        assert!(exchange.is_ok());
        assert_eq!(exchange.responses.len(), 1);
        let Response::Ok(ok) = &exchange.responses[0] else {
            panic!("expected OK response");
        };
        assert_eq!(ok.affected_rows, 3);
    }

    #[test]
    fn test_error_exchange() {
        let mut r = ResponseReassembler::new(ExchangeKind::Query, false);
        let exchange = r.push(&err_payload(1064, "syntax")).unwrap().unwrap();
        let err = exchange.error.unwrap();
        assert_eq!(err.error_code, 1064);
        assert_eq!(err.sql_state, "42000");
        assert_eq!(err.error_message, "syntax");
    }

    #[test]
    fn test_eof_as_ok() {
        let mut r = ResponseReassembler::new(ExchangeKind::Ok, false);
        let exchange = r.push(&eof_payload(0)).unwrap().unwrap();
        let Response::Ok(ok) = &exchange.responses[0] else {
            panic!("expected OK response");
        };
        assert_eq!(ok.affected_rows, 0);
        assert_eq!(ok.last_insert_id, 0);
    }

    #[test]
    fn test_text_result_set_exchange() {
        let mut r = ResponseReassembler::new(ExchangeKind::Query, false);
        assert!(r.push(&[1]).unwrap().is_none()); // column count
        assert!(r.push(&field_payload("id", FieldType::Long)).unwrap().is_none());
        assert!(r.push(&eof_payload(0)).unwrap().is_none()); // intermediate
        assert!(r.push(&text_row(&["1"])).unwrap().is_none());
        assert!(r.push(&text_row(&["2"])).unwrap().is_none());
        let exchange = r.push(&eof_payload(0)).unwrap().unwrap();
        assert!(exchange.is_ok());
        let Response::ResultSet(rs) = &exchange.responses[0] else {
            panic!("expected a result set");
        };
        assert_eq!(rs.len(), 2);
        let rows = rs.rows().unwrap();
        assert_eq!(rows[1].get(0), Some(&Value::Int(2)));
    }

    #[test]
    fn test_multi_result_chain() {
        // SELECT 1; DO NULL; SELECT 3 → [ResultSet, OK, ResultSet]
        let mut r = ResponseReassembler::new(ExchangeKind::Query, false);
        assert!(r.push(&[1]).unwrap().is_none());
        assert!(r.push(&field_payload("a", FieldType::Long)).unwrap().is_none());
        assert!(r.push(&eof_payload(0)).unwrap().is_none());
        assert!(r.push(&text_row(&["1"])).unwrap().is_none());
        assert!(r.push(&eof_payload(MORE)).unwrap().is_none());

        assert!(r.push(&ok_payload(0, MORE)).unwrap().is_none());

        assert!(r.push(&[1]).unwrap().is_none());
        assert!(r.push(&field_payload("b", FieldType::Long)).unwrap().is_none());
        assert!(r.push(&eof_payload(0)).unwrap().is_none());
        assert!(r.push(&text_row(&["3"])).unwrap().is_none());
        let exchange = r.push(&eof_payload(0)).unwrap().unwrap();

        assert_eq!(exchange.responses.len(), 3);
        assert!(matches!(exchange.responses[0], Response::ResultSet(_)));
        assert!(matches!(exchange.responses[1], Response::Ok(_)));
        assert!(matches!(exchange.responses[2], Response::ResultSet(_)));
    }

    #[test]
    fn test_error_mid_result_set() {
        let mut r = ResponseReassembler::new(ExchangeKind::Query, false);
        assert!(r.push(&[1]).unwrap().is_none());
        assert!(r.push(&field_payload("id", FieldType::Long)).unwrap().is_none());
        assert!(r.push(&eof_payload(0)).unwrap().is_none());
        let exchange = r.push(&err_payload(1317, "interrupted")).unwrap().unwrap();
        assert!(exchange.error.is_some());
        assert!(exchange.responses.is_empty());
    }

    #[test]
    fn test_prepare_exchange() {
        let mut r = ResponseReassembler::new(ExchangeKind::Prepare, false);
        // header: id 1, 1 column, 2 params
        let header = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(r.push(&header).unwrap().is_none());
        assert!(r.push(&field_payload("?", FieldType::Varchar)).unwrap().is_none());
        assert!(r.push(&field_payload("?", FieldType::Varchar)).unwrap().is_none());
        assert!(r.push(&eof_payload(0)).unwrap().is_none());
        assert!(r.push(&field_payload("id", FieldType::Long)).unwrap().is_none());
        let exchange = r.push(&eof_payload(0)).unwrap().unwrap();

        let Response::Prepared(prepared) = &exchange.responses[0] else {
            panic!("expected a prepare response");
        };
        assert_eq!(prepared.header.statement_id, 1);
        assert_eq!(prepared.params.len(), 2);
        assert_eq!(prepared.columns.len(), 1);
    }

    #[test]
    fn test_prepare_without_params_or_columns() {
        let mut r = ResponseReassembler::new(ExchangeKind::Prepare, false);
        let header = [0x00, 0x07, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0x00, 0, 0];
        let exchange = r.push(&header).unwrap().unwrap();
        let Response::Prepared(prepared) = &exchange.responses[0] else {
            panic!("expected a prepare response");
        };
        assert_eq!(prepared.header.statement_id, 7);
        assert!(prepared.params.is_empty());
        assert!(prepared.columns.is_empty());
    }

    #[test]
    fn test_prepare_header_beats_ok_classification() {
        // A 12-byte 0x00 payload in a Prepare exchange is a prepare
        // header; the same bytes in an Ok exchange parse as plain OK
        let payload = [0x00, 0x05, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0x00, 0, 0];
        let mut r = ResponseReassembler::new(ExchangeKind::Prepare, false);
        let exchange = r.push(&payload).unwrap().unwrap();
        assert!(matches!(exchange.responses[0], Response::Prepared(_)));

        let mut r = ResponseReassembler::new(ExchangeKind::Ok, false);
        let exchange = r.push(&payload).unwrap().unwrap();
        assert!(matches!(exchange.responses[0], Response::Ok(_)));
    }

    #[test]
    fn test_execute_returning_ok() {
        // An UPDATE through the binary protocol: OK, no result set
        let mut r = ResponseReassembler::new(ExchangeKind::Execute, false);
        let exchange = r.push(&ok_payload(1, 0)).unwrap().unwrap();
        assert!(matches!(exchange.responses[0], Response::Ok(_)));
    }

    #[test]
    fn test_push_after_completion_is_protocol_error() {
        let mut r = ResponseReassembler::new(ExchangeKind::Ok, false);
        r.push(&ok_payload(0, 0)).unwrap().unwrap();
        assert!(r.push(&ok_payload(0, 0)).is_err());
    }

    #[test]
    fn test_malformed_first_payload() {
        // In an Ok exchange, a data payload has no valid classification
        let mut r = ResponseReassembler::new(ExchangeKind::Ok, false);
        assert!(r.push(&[0x05, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_chunk_partition_invariance() {
        use crate::protocol::{PacketHeader, build_packet_from_payload};

        // The same framed byte stream, cut at arbitrary positions,
        // must reassemble into the same exchange
        let payloads = [
            vec![1u8],
            field_payload("id", FieldType::Long),
            eof_payload(0),
            text_row(&["7"]),
            eof_payload(0),
        ];
        let mut stream = Vec::new();
        #[allow(clippy::cast_possible_truncation)]
        for (seq, payload) in payloads.iter().enumerate() {
            stream.extend_from_slice(&build_packet_from_payload(payload, seq as u8 + 1));
        }

        // A minimal byte-at-a-time frame extractor
        let reassemble = |chunks: &[&[u8]]| -> Exchange {
            let mut buffer: Vec<u8> = Vec::new();
            let mut r = ResponseReassembler::new(ExchangeKind::Query, false);
            let mut done = None;
            for chunk in chunks {
                buffer.extend_from_slice(chunk);
                while buffer.len() >= PacketHeader::SIZE {
                    let header = PacketHeader::from_bytes(&[
                        buffer[0], buffer[1], buffer[2], buffer[3],
                    ]);
                    let total = PacketHeader::SIZE + header.payload_length as usize;
                    if buffer.len() < total {
                        break;
                    }
                    let payload: Vec<u8> = buffer.drain(..total).skip(4).collect();
                    if let Some(exchange) = r.push(&payload).unwrap() {
                        done = Some(exchange);
                    }
                }
            }
            done.expect("exchange completed")
        };

        let whole = reassemble(&[&stream]);
        for cut in 1..stream.len() {
            let (head, tail) = stream.split_at(cut);
            let split = reassemble(&[head, tail]);
            assert_eq!(split.responses.len(), whole.responses.len());
            let (Response::ResultSet(a), Response::ResultSet(b)) =
                (&whole.responses[0], &split.responses[0])
            else {
                panic!("expected result sets");
            };
            let a_values: Vec<_> =
                a.rows().unwrap().into_iter().map(Row::into_values).collect();
            let b_values: Vec<_> =
                b.rows().unwrap().into_iter().map(Row::into_values).collect();
            assert_eq!(a_values, b_values);
        }
    }

    #[test]
    fn test_accumulator_passthrough() {
        let mut acc = PacketAccumulator::new();
        assert_eq!(acc.push(&[1, 2, 3]), Some(vec![1, 2, 3]));
        assert_eq!(acc.push(&[]), Some(vec![]));
    }

    #[test]
    fn test_accumulator_merges_max_size_chunks() {
        let mut acc = PacketAccumulator::new();
        let full = vec![0xAA; MAX_PACKET_SIZE];
        assert_eq!(acc.push(&full), None);
        let merged = acc.push(&[0xBB, 0xCC]).unwrap();
        assert_eq!(merged.len(), MAX_PACKET_SIZE + 2);
        assert_eq!(&merged[MAX_PACKET_SIZE..], &[0xBB, 0xCC]);

        // An exact-boundary payload is closed by an empty continuation
        let mut acc = PacketAccumulator::new();
        assert_eq!(acc.push(&full), None);
        let merged = acc.push(&[]).unwrap();
        assert_eq!(merged.len(), MAX_PACKET_SIZE);
    }
}
