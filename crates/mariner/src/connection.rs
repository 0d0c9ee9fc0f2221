//! MariaDB connection management.
//!
//! [`Connection`] owns one TCP socket and drives the protocol state
//! machine: handshake, authentication, then one command/response
//! exchange at a time. Exclusive `&mut self` access enforces the
//! one-in-flight-command rule; the pool layers multiplexing on top.

use std::io::{Read, Write};
use std::net::TcpStream;

use tracing::{debug, trace, warn};

use mariner_core::{
    ConnectionError, ConnectionErrorKind, Error, MismatchError, ProtocolError, QueryError, Result,
    Row, Value,
};

use crate::auth;
use crate::config::Config;
use crate::protocol::prepared::{
    build_stmt_close_packet, build_stmt_execute_packet, build_stmt_prepare_packet,
};
use crate::protocol::{
    Command, ErrPacket, Exchange, ExchangeKind, OkPacket, PacketHeader, PacketReader, PacketWriter,
    PreparedResponse, Response, ResponseReassembler, build_command_packet, capabilities,
    mariadb_capabilities,
};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// TCP established, waiting for the server handshake
    #[default]
    Connecting,
    /// Handshake response sent, waiting for the auth verdict
    Authenticating,
    /// Idle, ready for a command
    Ready,
    /// A command exchange is in flight
    Executing,
    /// A fatal error poisoned the connection
    Error,
    /// Closed, by request or after QUIT
    Closed,
}

/// Parsed initial handshake packet.
#[derive(Debug, Clone)]
pub struct ServerHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Capability bits assembled from the three non-contiguous fields
    pub capabilities: u32,
    /// MariaDB extended capability bits from the reserved block
    pub mariadb_capabilities: u32,
    pub collation: u8,
    pub status_flags: u16,
    /// Auth seed, concatenated from its two fragments
    pub auth_seed: Vec<u8>,
    pub auth_plugin: String,
}

/// Parse the server's initial handshake payload.
pub fn parse_handshake(payload: &[u8]) -> Result<ServerHandshake> {
    let mut reader = PacketReader::new(payload);

    let protocol_version = reader.read_u8()?;
    if protocol_version != 10 {
        return Err(ProtocolError::new(format!(
            "unsupported protocol version {protocol_version}"
        ))
        .into());
    }

    let server_version = reader.read_null_string()?;
    let connection_id = reader.read_u32_le()?;
    let seed_head = reader.read_bytes(8)?.to_vec();
    reader.skip(1)?; // filler

    let caps_lower = reader.read_u16_le()?;
    let collation = reader.read_u8()?;
    let status_flags = reader.read_u16_le()?;
    let caps_upper = reader.read_u16_le()?;
    let mut caps = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

    let seed_total_len = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        usize::from(reader.read_u8()?)
    } else {
        reader.skip(1)?;
        0
    };

    // Reserved block: 6 filler bytes, then the MariaDB extended
    // capability word
    reader.skip(6)?;
    let mariadb_caps = reader.read_u32_le()?;

    let mut auth_seed = seed_head;
    if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        let tail_len = seed_total_len.saturating_sub(8).max(13);
        let tail = reader.read_bytes(tail_len.min(reader.remaining()))?;
        // The seed tail carries a trailing NUL
        let tail = match tail {
            [head @ .., 0] => head,
            other => other,
        };
        auth_seed.extend_from_slice(tail);
    }

    let auth_plugin = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        reader.read_null_string()?
    } else {
        auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
    };

    // The protocol-41 bit is implied by everything this driver sends
    caps |= capabilities::CLIENT_PROTOCOL_41;

    Ok(ServerHandshake {
        protocol_version,
        server_version,
        connection_id,
        capabilities: caps,
        mariadb_capabilities: mariadb_caps,
        collation,
        status_flags,
        auth_seed,
        auth_plugin,
    })
}

/// Outcome of a non-tabular command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteResult {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub warnings: u16,
}

impl From<&OkPacket> for ExecuteResult {
    fn from(ok: &OkPacket) -> Self {
        Self {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            warnings: ok.warnings,
        }
    }
}

/// One logical response within a multi-statement batch.
#[derive(Debug)]
pub enum QueryResult {
    /// Non-tabular statement
    Ok(ExecuteResult),
    /// Tabular statement
    Rows(Vec<Row>),
}

/// A live MariaDB connection.
pub struct Connection {
    stream: TcpStream,
    state: ConnectionState,
    config: Config,
    handshake: Option<ServerHandshake>,
    /// Extended type info (json/uuid field tags) negotiated
    ext_metadata: bool,
    sequence_id: u8,
    status_flags: u16,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("connection_id", &self.connection_id())
            .field("server_version", &self.server_version())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Establish a connection: TCP dial, server handshake, handshake
    /// response, auth verdict.
    pub fn connect(config: Config) -> Result<Self> {
        let addr = config.socket_addr();
        debug!(addr = %addr, "connecting");
        let stream = resolve_and_dial(&config)?;
        stream.set_nodelay(true).ok();

        let mut conn = Self {
            stream,
            state: ConnectionState::Connecting,
            config,
            handshake: None,
            ext_metadata: false,
            sequence_id: 0,
            status_flags: 0,
        };

        let payload = conn.read_frame()?;
        let handshake = parse_handshake(&payload)?;
        debug!(
            server_version = %handshake.server_version,
            connection_id = handshake.connection_id,
            plugin = %handshake.auth_plugin,
            "handshake received"
        );
        conn.ext_metadata = handshake.mariadb_capabilities
            & conn.config.mariadb_capability_flags()
            & mariadb_capabilities::MARIADB_CLIENT_EXTENDED_TYPE_INFO
            != 0;
        conn.handshake = Some(handshake);
        conn.state = ConnectionState::Authenticating;

        conn.send_handshake_response()?;
        conn.finish_authentication()?;

        conn.state = ConnectionState::Ready;
        debug!(connection_id = conn.connection_id(), "connection ready");
        Ok(conn)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Is the connection idle and usable?
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Server-assigned connection id.
    pub fn connection_id(&self) -> u32 {
        self.handshake.as_ref().map_or(0, |h| h.connection_id)
    }

    /// Server version string from the handshake.
    pub fn server_version(&self) -> Option<&str> {
        self.handshake.as_ref().map(|h| h.server_version.as_str())
    }

    /// Status flags from the most recent OK/EOF packet.
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    fn send_handshake_response(&mut self) -> Result<()> {
        let handshake = self
            .handshake
            .as_ref()
            .ok_or_else(|| ProtocolError::new("no server handshake received"))?;

        let client_caps = self.config.capability_flags() & handshake.capabilities;
        let scramble = compute_scramble(
            &handshake.auth_plugin,
            self.config.effective_password(),
            &handshake.auth_seed,
        );

        let mut writer = PacketWriter::new();
        writer.write_u32_le(client_caps);
        writer.write_u32_le(self.config.max_packet_size);
        writer.write_u8(self.config.collation);
        writer.write_zeros(19);
        writer.write_u32_le(self.config.mariadb_capability_flags());
        writer.write_null_string(&self.config.user);

        if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            // An empty scramble lands as a single zero byte
            writer.write_lenenc_bytes(&scramble);
        } else {
            // Scrambles are 20 or 32 bytes, always below 256
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u8(scramble.len() as u8);
            writer.write_bytes(&scramble);
        }

        if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            match &self.config.database {
                Some(db) => writer.write_null_string(db),
                None => writer.write_u8(0),
            }
        }
        if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(&handshake.auth_plugin);
        }

        self.write_frame(writer.as_bytes())
    }

    fn finish_authentication(&mut self) -> Result<()> {
        loop {
            let payload = self.read_frame()?;
            match payload.first() {
                Some(0x00) => {
                    let mut reader = PacketReader::new(&payload);
                    let ok = reader.parse_ok_packet()?;
                    self.status_flags = ok.status_flags;
                    return Ok(());
                }
                Some(0xFF) => {
                    let mut reader = PacketReader::new(&payload);
                    let err = reader.parse_err_packet()?;
                    self.state = ConnectionState::Error;
                    return Err(Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Authentication,
                        message: format!(
                            "authentication failed: {} ({})",
                            err.error_message, err.error_code
                        ),
                        source: None,
                    }));
                }
                Some(0xFE) => {
                    // Auth switch: new plugin, new seed
                    let mut reader = PacketReader::new(&payload[1..]);
                    let plugin = reader.read_null_string()?;
                    let seed = reader.read_rest().to_vec();
                    debug!(plugin = %plugin, "auth switch requested");
                    let scramble =
                        compute_scramble(&plugin, self.config.effective_password(), &seed);
                    self.write_frame(&scramble)?;
                }
                Some(0x01) => {
                    // caching_sha2 extra round
                    match payload.get(1) {
                        Some(&auth::caching_sha2::FAST_AUTH_SUCCESS) => {
                            trace!("fast auth accepted, awaiting OK");
                        }
                        Some(&auth::caching_sha2::PERFORM_FULL_AUTH) => {
                            self.state = ConnectionState::Error;
                            return Err(Error::Connection(ConnectionError {
                                kind: ConnectionErrorKind::Authentication,
                                message:
                                    "server requires full caching_sha2 authentication, \
                                     which needs an encrypted channel"
                                        .to_string(),
                                source: None,
                            }));
                        }
                        other => {
                            self.state = ConnectionState::Error;
                            return Err(ProtocolError::new(format!(
                                "unexpected auth continuation byte {other:?}"
                            ))
                            .into());
                        }
                    }
                }
                other => {
                    self.state = ConnectionState::Error;
                    return Err(ProtocolError::new(format!(
                        "unexpected authentication packet starting {other:?}"
                    ))
                    .into());
                }
            }
        }
    }

    /// Run a text-protocol query expected to return rows.
    pub fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let exchange = self.run_command(
            build_command_packet(Command::Query as u8, sql.as_bytes()),
            ExchangeKind::Query,
            Some(sql),
        )?;
        match single_response(exchange, sql)? {
            Response::ResultSet(rs) => rs.rows(),
            Response::Ok(_) => Err(mismatch("result set", "OK", sql)),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Run a text-protocol statement expected to return OK.
    pub fn execute(&mut self, sql: &str) -> Result<ExecuteResult> {
        let exchange = self.run_command(
            build_command_packet(Command::Query as u8, sql.as_bytes()),
            ExchangeKind::Query,
            Some(sql),
        )?;
        match single_response(exchange, sql)? {
            Response::Ok(ok) => Ok(ExecuteResult::from(&ok)),
            Response::ResultSet(_) => Err(mismatch("OK", "result set", sql)),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Run a multi-statement batch, returning every logical response
    /// in server order.
    pub fn batch_query(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        let exchange = self.run_command(
            build_command_packet(Command::Query as u8, sql.as_bytes()),
            ExchangeKind::Query,
            Some(sql),
        )?;
        exchange
            .responses
            .into_iter()
            .map(|response| match response {
                Response::Ok(ok) => Ok(QueryResult::Ok(ExecuteResult::from(&ok))),
                Response::ResultSet(rs) => Ok(QueryResult::Rows(rs.rows()?)),
                other => Err(unexpected_response(&other)),
            })
            .collect()
    }

    /// Run a multi-statement batch where every statement must return
    /// OK.
    pub fn batch_execute(&mut self, sql: &str) -> Result<Vec<ExecuteResult>> {
        self.batch_query(sql)?
            .into_iter()
            .map(|result| match result {
                QueryResult::Ok(ok) => Ok(ok),
                QueryResult::Rows(_) => Err(mismatch("OK", "result set", sql)),
            })
            .collect()
    }

    /// Prepare a statement for binary-protocol execution.
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedResponse> {
        let exchange = self.run_command(
            build_stmt_prepare_packet(sql),
            ExchangeKind::Prepare,
            Some(sql),
        )?;
        match single_response(exchange, sql)? {
            Response::Prepared(prepared) => Ok(prepared),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Execute a prepared statement expected to return OK.
    pub fn execute_prepared(
        &mut self,
        stmt: &PreparedResponse,
        args: &[Value],
    ) -> Result<ExecuteResult> {
        let packet = build_stmt_execute_packet(&stmt.header, args)?;
        let exchange = self.run_command(packet, ExchangeKind::Execute, None)?;
        match single_response(exchange, "")? {
            Response::Ok(ok) => Ok(ExecuteResult::from(&ok)),
            Response::BinaryResultSet(_) => Err(mismatch("OK", "result set", "")),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Execute a prepared statement expected to return rows.
    pub fn query_prepared(
        &mut self,
        stmt: &PreparedResponse,
        args: &[Value],
    ) -> Result<Vec<Row>> {
        let packet = build_stmt_execute_packet(&stmt.header, args)?;
        let exchange = self.run_command(packet, ExchangeKind::Execute, None)?;
        match single_response(exchange, "")? {
            Response::BinaryResultSet(rs) => rs.rows(),
            Response::Ok(_) => Err(mismatch("result set", "OK", "")),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Deallocate a prepared statement. The server sends no reply.
    pub fn close_prepared(&mut self, stmt: &PreparedResponse) -> Result<()> {
        self.ensure_ready()?;
        self.sequence_id = 0;
        trace!(statement_id = stmt.header.statement_id, "closing statement");
        let packet = build_stmt_close_packet(stmt.header.statement_id);
        self.write_all(&packet)
    }

    /// Switch the default database.
    pub fn select_db(&mut self, database: &str) -> Result<()> {
        let exchange = self.run_command(
            build_command_packet(Command::InitDb as u8, database.as_bytes()),
            ExchangeKind::Ok,
            None,
        )?;
        match single_response(exchange, database)? {
            Response::Ok(_) => Ok(()),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Check the connection is alive.
    pub fn ping(&mut self) -> Result<()> {
        let exchange = self.run_command(
            build_command_packet(Command::Ping as u8, &[]),
            ExchangeKind::Ok,
            None,
        )?;
        match single_response(exchange, "")? {
            Response::Ok(_) => Ok(()),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Reset session state: user variables, temporary tables and
    /// prepared statements are discarded server-side.
    pub fn reset(&mut self) -> Result<()> {
        let exchange = self.run_command(
            build_command_packet(Command::ResetConnection as u8, &[]),
            ExchangeKind::Ok,
            None,
        )?;
        match single_response(exchange, "")? {
            Response::Ok(_) => Ok(()),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Run `f` inside a transaction: COMMIT on success, ROLLBACK on
    /// error (best effort when the connection is already poisoned).
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.execute("BEGIN")?;
        match f(self) {
            Ok(value) => {
                self.execute("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                if self.is_ready() {
                    if let Err(rollback_err) = self.execute("ROLLBACK") {
                        warn!(error = %rollback_err, "rollback failed");
                    }
                }
                Err(err)
            }
        }
    }

    /// Close the connection. COM_QUIT is best effort; closing an
    /// already-closed connection is a no-op.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.state == ConnectionState::Ready {
            self.sequence_id = 0;
            let packet = build_command_packet(Command::Quit as u8, &[]);
            if let Err(err) = self.write_all(&packet) {
                trace!(error = %err, "quit not delivered");
            }
        }
        self.state = ConnectionState::Closed;
        debug!(connection_id = self.connection_id(), "connection closed");
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state == ConnectionState::Ready {
            return Ok(());
        }
        Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: format!("connection not ready (state {:?})", self.state),
            source: None,
        }))
    }

    /// Send one command packet and reassemble the server's response.
    fn run_command(
        &mut self,
        packet: Vec<u8>,
        kind: ExchangeKind,
        sql: Option<&str>,
    ) -> Result<Exchange> {
        self.ensure_ready()?;
        self.state = ConnectionState::Executing;
        self.sequence_id = 0;
        trace!(kind = ?kind, bytes = packet.len(), "command dispatched");

        let outcome = self.drive_exchange(&packet, kind);
        match &outcome {
            Ok(_) => self.state = ConnectionState::Ready,
            Err(err) if err.is_fatal_for_connection() => {
                self.state = ConnectionState::Error;
            }
            // Server-side errors leave the connection usable
            Err(_) => self.state = ConnectionState::Ready,
        }

        let exchange = outcome?;
        if let Some(err) = &exchange.error {
            return Err(query_error(err, sql));
        }
        if let Some(last) = exchange.responses.iter().rev().find_map(|r| match r {
            Response::Ok(ok) => Some(ok.status_flags),
            _ => None,
        }) {
            self.status_flags = last;
        }
        Ok(exchange)
    }

    fn drive_exchange(&mut self, packet: &[u8], kind: ExchangeKind) -> Result<Exchange> {
        self.write_all(packet)?;
        let mut reassembler = ResponseReassembler::new(kind, self.ext_metadata);
        loop {
            let payload = self.read_frame()?;
            if let Some(exchange) = reassembler.push(&payload)? {
                // Exchanges that ended in a server error still count
                // as completed; keep them for the caller
                return Ok(exchange);
            }
        }
    }

    /// Read one frame: header plus exactly `payload_length` bytes.
    /// 16MB continuations are merged downstream by the reassembler.
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut header_buf = [0u8; PacketHeader::SIZE];
        self.stream
            .read_exact(&mut header_buf)
            .map_err(disconnected)?;
        let header = PacketHeader::from_bytes(&header_buf);
        self.sequence_id = header.sequence_id.wrapping_add(1);

        let mut payload = vec![0u8; header.payload_length as usize];
        if !payload.is_empty() {
            self.stream.read_exact(&mut payload).map_err(disconnected)?;
        }
        trace!(
            len = payload.len(),
            seq = header.sequence_id,
            "frame received"
        );
        Ok(payload)
    }

    /// Frame and send one payload at the current sequence number.
    fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let packet = crate::protocol::build_packet_from_payload(payload, self.sequence_id);
        self.sequence_id = self.sequence_id.wrapping_add(1);
        self.write_all(&packet)
    }

    /// Send pre-framed bytes.
    fn write_all(&mut self, packet: &[u8]) -> Result<()> {
        self.stream.write_all(packet).map_err(disconnected)?;
        self.stream.flush().map_err(disconnected)?;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve_and_dial(config: &Config) -> Result<TcpStream> {
    use std::net::ToSocketAddrs;

    let addr = config.socket_addr();
    let mut last_err = None;
    let addrs = addr.to_socket_addrs().map_err(|e| {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Connect,
            message: format!("cannot resolve {addr}: {e}"),
            source: Some(Box::new(e)),
        })
    })?;
    for candidate in addrs {
        match TcpStream::connect_timeout(&candidate, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    let (kind, message) = match last_err {
        Some(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => (
            ConnectionErrorKind::Refused,
            format!("connection to {addr} refused: {e}"),
        ),
        Some(e) => (
            ConnectionErrorKind::Connect,
            format!("failed to connect to {addr}: {e}"),
        ),
        None => (
            ConnectionErrorKind::Connect,
            format!("{addr} resolved to no addresses"),
        ),
    };
    Err(Error::Connection(ConnectionError {
        kind,
        message,
        source: None,
    }))
}

fn compute_scramble(plugin: &str, password: &str, seed: &[u8]) -> Vec<u8> {
    match plugin {
        auth::plugins::CACHING_SHA2_PASSWORD => auth::scramble_caching_sha2(password, seed),
        // mysql_native_password, and the best guess for plugins this
        // driver does not know
        _ => auth::scramble_native_password(password, seed),
    }
}

fn disconnected(e: std::io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: format!("connection lost: {e}"),
        source: Some(Box::new(e)),
    })
}

fn query_error(err: &ErrPacket, sql: Option<&str>) -> Error {
    Error::Query(QueryError {
        code: err.error_code,
        sqlstate: if err.sql_state.is_empty() {
            None
        } else {
            Some(err.sql_state.clone())
        },
        message: err.error_message.clone(),
        sql: sql.map(String::from),
    })
}

fn mismatch(expected: &'static str, received: &'static str, sql: &str) -> Error {
    Error::Mismatch(MismatchError {
        expected,
        received,
        sql: if sql.is_empty() {
            None
        } else {
            Some(sql.to_string())
        },
    })
}

fn unexpected_response(response: &Response) -> Error {
    let shape = match response {
        Response::Ok(_) => "OK",
        Response::ResultSet(_) => "text result set",
        Response::BinaryResultSet(_) => "binary result set",
        Response::Prepared(_) => "prepare response",
    };
    ProtocolError::new(format!("unexpected {shape} response for this command")).into()
}

/// An exchange with multiple responses where one was expected is a
/// caller error (multi-statement SQL through a single-statement API).
fn single_response(mut exchange: Exchange, sql: &str) -> Result<Response> {
    if exchange.responses.len() != 1 {
        return Err(mismatch("a single response", "a multi-response batch", sql));
    }
    Ok(exchange.responses.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::collation;

    fn sample_handshake(plugin: &str, mariadb_caps: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(10);
        writer.write_null_string("11.4.2-MariaDB");
        writer.write_u32_le(42);
        writer.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]); // seed head
        writer.write_u8(0); // filler
        let caps = capabilities::DEFAULT_CLIENT_FLAGS | capabilities::CLIENT_CONNECT_WITH_DB;
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16_le((caps & 0xFFFF) as u16);
        writer.write_u8(collation::UTF8MB4_GENERAL_CI);
        writer.write_u16_le(0x0002); // autocommit
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16_le((caps >> 16) as u16);
        writer.write_u8(21); // seed total length
        writer.write_zeros(6);
        writer.write_u32_le(mariadb_caps);
        writer.write_bytes(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20]);
        writer.write_u8(0); // seed tail terminator
        writer.write_null_string(plugin);
        writer.into_bytes()
    }

    #[test]
    fn test_parse_handshake() {
        let payload = sample_handshake(auth::plugins::MYSQL_NATIVE_PASSWORD, 0x0008);
        let handshake = parse_handshake(&payload).unwrap();
        assert_eq!(handshake.protocol_version, 10);
        assert_eq!(handshake.server_version, "11.4.2-MariaDB");
        assert_eq!(handshake.connection_id, 42);
        assert_eq!(handshake.auth_plugin, "mysql_native_password");
        assert_eq!(
            handshake.auth_seed,
            (1..=20).collect::<Vec<u8>>(),
            "seed is the concatenation of both fragments, NUL stripped"
        );
        assert_eq!(handshake.mariadb_capabilities, 0x0008);
        assert_ne!(
            handshake.capabilities & capabilities::CLIENT_PLUGIN_AUTH,
            0
        );
    }

    #[test]
    fn test_parse_handshake_rejects_old_protocol() {
        let payload = [9, b'5', b'.', b'0', 0];
        assert!(parse_handshake(&payload).is_err());
    }

    #[test]
    fn test_execute_result_from_ok() {
        let ok = OkPacket {
            affected_rows: 2,
            last_insert_id: 10,
            status_flags: 0,
            warnings: 1,
            info: String::new(),
        };
        let result = ExecuteResult::from(&ok);
        assert_eq!(result.affected_rows, 2);
        assert_eq!(result.last_insert_id, 10);
        assert_eq!(result.warnings, 1);
    }

    #[test]
    fn test_query_error_mapping() {
        let err = ErrPacket {
            error_code: 1064,
            sql_state: "42000".to_string(),
            error_message: "syntax error".to_string(),
        };
        let Error::Query(mapped) = query_error(&err, Some("SELEC 1")) else {
            panic!("expected a query error");
        };
        assert_eq!(mapped.code, 1064);
        assert_eq!(mapped.sqlstate.as_deref(), Some("42000"));
        assert_eq!(mapped.sql.as_deref(), Some("SELEC 1"));

        let pre41 = ErrPacket {
            error_code: 1,
            sql_state: String::new(),
            error_message: "old".to_string(),
        };
        let Error::Query(mapped) = query_error(&pre41, None) else {
            panic!("expected a query error");
        };
        assert!(mapped.sqlstate.is_none());
    }

    #[test]
    fn test_mismatch_error_shape() {
        let Error::Mismatch(err) = mismatch("OK", "result set", "SELECT 1") else {
            panic!("expected a mismatch error");
        };
        assert_eq!(err.expected, "OK");
        assert_eq!(err.received, "result set");
    }
}
