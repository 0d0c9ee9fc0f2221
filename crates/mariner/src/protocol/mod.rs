//! MariaDB wire protocol implementation.
//!
//! Packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum packet payload is 2^24 - 1 (16MB - 1). Larger payloads are
//! split into consecutive packets; a split landing exactly on the
//! boundary is closed with an explicit zero-length packet.

pub mod prepared;
pub mod reader;
pub mod reassembly;
pub mod writer;

pub use prepared::{
    StmtPrepareOk, build_stmt_close_packet, build_stmt_execute_packet, build_stmt_prepare_packet,
    parse_stmt_prepare_ok,
};
pub use reader::{CodecError, PacketReader, null_bit_positions};
pub use reassembly::{
    Exchange, ExchangeKind, PacketAccumulator, PreparedResponse, Push, Response,
    ResponseReassembler,
};
pub use writer::{PacketWriter, build_command_packet, build_packet_from_payload, encode_null_bitmap};

/// Maximum payload size for a single packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// Client/server capability flags (low 32 bits, shared with MySQL).
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Default client capabilities.
    ///
    /// CLIENT_DEPRECATE_EOF is intentionally absent: result sets keep
    /// their intermediate and terminating EOF packets, which is what
    /// the response reassembler is built around.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_STATEMENTS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
}

/// MariaDB extended capability flags (the u32 field replacing part of
/// the reserved block in handshake packets).
#[allow(dead_code)]
pub mod mariadb_capabilities {
    pub const MARIADB_CLIENT_PROGRESS: u32 = 1;
    pub const MARIADB_CLIENT_COM_MULTI: u32 = 1 << 1;
    pub const MARIADB_CLIENT_STMT_BULK_OPERATIONS: u32 = 1 << 2;
    /// Extended field metadata on column definitions (json/uuid tags).
    pub const MARIADB_CLIENT_EXTENDED_TYPE_INFO: u32 = 1 << 3;
    pub const MARIADB_CLIENT_CACHE_METADATA: u32 = 1 << 4;

    pub const DEFAULT_MARIADB_FLAGS: u32 = MARIADB_CLIENT_EXTENDED_TYPE_INFO;
}

/// Command codes (COM_xxx) used by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Quit connection
    Quit = 0x01,
    /// Switch database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    /// Ping server
    Ping = 0x0E,
    /// Prepare statement
    StmtPrepare = 0x16,
    /// Execute prepared statement
    StmtExecute = 0x17,
    /// Close prepared statement
    StmtClose = 0x19,
    /// Reset session state
    ResetConnection = 0x1F,
}

/// Server status flags carried by OK and EOF packets.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 0x4000;
}

/// Collation codes.
#[allow(dead_code)]
pub mod collation {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const BINARY: u8 = 63;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const UTF8MB4_UNICODE_CI: u8 = 224;

    /// Default collation for new connections (utf8mb4).
    pub const DEFAULT_COLLATION: u8 = UTF8MB4_GENERAL_CI;
}

/// A packet header.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    /// Parse a packet header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        let sequence_id = bytes[3];
        Self {
            payload_length,
            sequence_id,
        }
    }

    /// Encode the header to 4 bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            ((self.payload_length >> 8) & 0xFF) as u8,
            ((self.payload_length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// First-byte classification of a response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00, payload length >= 7)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// EOF packet (0xFE, payload shorter than 9 bytes)
    Eof,
    /// Anything else (result set data, column count, etc.)
    Data,
}

impl PacketType {
    /// Classify a payload by its first byte and length.
    pub fn classify(payload: &[u8]) -> Self {
        match payload.first() {
            Some(0x00) if payload.len() >= 7 => PacketType::Ok,
            Some(0xFF) => PacketType::Error,
            Some(0xFE) if payload.len() < 9 => PacketType::Eof,
            _ => PacketType::Data,
        }
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone)]
pub struct OkPacket {
    /// Number of affected rows
    pub affected_rows: u64,
    /// Last insert ID
    pub last_insert_id: u64,
    /// Server status flags
    pub status_flags: u16,
    /// Number of warnings
    pub warnings: u16,
    /// Info string (if any)
    pub info: String,
}

impl OkPacket {
    /// Is a bare EOF payload standing in for OK? First byte 0xFE with
    /// a payload of exactly 5 bytes.
    pub fn is_eof_form(payload: &[u8]) -> bool {
        payload.len() == 5 && payload[0] == 0xFE
    }

    /// Does the status word announce further results in this exchange?
    pub fn has_more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

/// Parsed Error packet.
#[derive(Debug, Clone)]
pub struct ErrPacket {
    /// Server error code
    pub error_code: u16,
    /// SQL state (5 characters, may be empty pre-4.1)
    pub sql_state: String,
    /// Error message
    pub error_message: String,
}

impl ErrPacket {
    /// Check if this is a unique constraint violation (ER_DUP_ENTRY).
    pub fn is_duplicate_key(&self) -> bool {
        self.error_code == 1062
    }

    /// Check if this is a foreign key constraint violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        self.error_code == 1451 || self.error_code == 1452
    }
}

/// Parsed EOF packet.
#[derive(Debug, Clone, Copy)]
pub struct EofPacket {
    /// Number of warnings
    pub warnings: u16,
    /// Server status flags
    pub status_flags: u16,
}

impl EofPacket {
    /// Does the status word announce further results in this exchange?
    pub fn has_more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_header_roundtrip() {
        let header = PacketHeader {
            payload_length: 0x0012_3456,
            sequence_id: 7,
        };
        let bytes = header.to_bytes();
        let parsed = PacketHeader::from_bytes(&bytes);
        assert_eq!(header.payload_length, parsed.payload_length);
        assert_eq!(header.sequence_id, parsed.sequence_id);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn test_packet_header_max_size() {
        let header = PacketHeader {
            payload_length: MAX_PACKET_SIZE as u32,
            sequence_id: 255,
        };
        assert_eq!(header.to_bytes(), [0xFF, 0xFF, 0xFF, 255]);
    }

    #[test]
    fn test_payload_classification() {
        assert_eq!(
            PacketType::classify(&[0x00, 0, 0, 2, 0, 0, 0]),
            PacketType::Ok
        );
        // 0x00 with fewer than 7 bytes is not a valid OK
        assert_eq!(PacketType::classify(&[0x00, 0, 0]), PacketType::Data);
        assert_eq!(PacketType::classify(&[0xFF, 0x15, 0x04]), PacketType::Error);
        assert_eq!(
            PacketType::classify(&[0xFE, 0, 0, 2, 0]),
            PacketType::Eof
        );
        // 0xFE with 9+ bytes is data (lenenc 8-byte integer prefix)
        assert_eq!(
            PacketType::classify(&[0xFE, 1, 2, 3, 4, 5, 6, 7, 8, 9]),
            PacketType::Data
        );
        assert_eq!(PacketType::classify(&[0x05]), PacketType::Data);
    }

    #[test]
    fn test_eof_as_ok_form() {
        assert!(OkPacket::is_eof_form(&[0xFE, 0x00, 0x00, 0x02, 0x00]));
        assert!(!OkPacket::is_eof_form(&[0xFE, 0x00, 0x00, 0x02]));
        assert!(!OkPacket::is_eof_form(&[0xFE, 0, 0, 0, 0, 0]));
        assert!(!OkPacket::is_eof_form(&[0x00, 0x00, 0x00, 0x02, 0x00]));
    }

    #[test]
    fn test_more_results_flag() {
        let ok = OkPacket {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: server_status::SERVER_MORE_RESULTS_EXISTS,
            warnings: 0,
            info: String::new(),
        };
        assert!(ok.has_more_results());

        let eof = EofPacket {
            warnings: 0,
            status_flags: server_status::SERVER_STATUS_AUTOCOMMIT,
        };
        assert!(!eof.has_more_results());
    }

    #[test]
    fn test_err_packet_error_types() {
        let dup = ErrPacket {
            error_code: 1062,
            sql_state: "23000".to_string(),
            error_message: "Duplicate entry".to_string(),
        };
        assert!(dup.is_duplicate_key());
        assert!(!dup.is_foreign_key_violation());

        let fk = ErrPacket {
            error_code: 1451,
            sql_state: "23000".to_string(),
            error_message: "Cannot delete".to_string(),
        };
        assert!(!fk.is_duplicate_key());
        assert!(fk.is_foreign_key_violation());
    }
}
