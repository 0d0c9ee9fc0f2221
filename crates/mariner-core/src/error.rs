//! Error types for driver operations.

use std::fmt;

/// The primary error type for all driver operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, handshake, disconnect)
    Connection(ConnectionError),
    /// Server-reported errors during command execution
    Query(QueryError),
    /// Wire-level errors; fatal for the connection that raised them
    Protocol(ProtocolError),
    /// Client-side validation errors, raised before any bytes are sent
    Client(ClientError),
    /// The server answered with a response shape the command cannot use
    Mismatch(MismatchError),
    /// Type conversion errors
    Type(TypeError),
    /// Pool errors
    Pool(PoolError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation timed out
    Timeout,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost or unusable
    Disconnected,
    /// Connection refused
    Refused,
}

/// A server Error packet, surfaced with its wire fields intact.
#[derive(Debug, Clone)]
pub struct QueryError {
    /// Server error code (e.g. 1064 for a syntax error)
    pub code: u16,
    /// Five-character SQLSTATE, when the server sent one
    pub sqlstate: Option<String>,
    pub message: String,
    /// The SQL text that produced the error, when known
    pub sql: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone)]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// More parameters than the binary protocol can describe
    TooManyArguments { received: usize },
    /// Fewer arguments than the prepared statement has placeholders
    MissingArguments { required: usize, received: usize },
}

#[derive(Debug, Clone)]
pub struct MismatchError {
    /// What the command expected, e.g. "result set"
    pub expected: &'static str,
    /// What the server sent instead
    pub received: &'static str,
    pub sql: Option<String>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy)]
pub enum PoolErrorKind {
    /// Acquisition timed out while queued
    Timeout,
    /// Pool is closed
    Closed,
    /// Configuration error
    Config,
}

impl ProtocolError {
    /// A protocol violation with no captured wire data.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_data: None,
            source: None,
        }
    }
}

impl Error {
    /// Does this error poison the connection it was raised on?
    pub fn is_fatal_for_connection(&self) -> bool {
        match self {
            Error::Protocol(_) | Error::Io(_) => true,
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Disconnected | ConnectionErrorKind::Refused
            ),
            _ => false,
        }
    }

    /// Get the server error code if this wraps a server error.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Query(q) => Some(q.code),
            _ => None,
        }
    }

    /// Get SQLSTATE if available.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }
}

impl ClientError {
    pub fn too_many_arguments(received: usize) -> Self {
        Self {
            kind: ClientErrorKind::TooManyArguments { received },
            message: format!(
                "Prepared Statements supports only 65535 arguments, received {received}"
            ),
        }
    }

    pub fn missing_arguments(required: usize, received: usize) -> Self {
        Self {
            kind: ClientErrorKind::MissingArguments { required, received },
            message: format!(
                "statement requires {required} argument(s), received {received}"
            ),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error {} (SQLSTATE {}): {}", e.code, sqlstate, e.message)
                } else {
                    write!(f, "Query error {}: {}", e.code, e.message)
                }
            }
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Client(e) => write!(f, "{}", e.message),
            Error::Mismatch(e) => write!(
                f,
                "Response mismatch: expected {}, received {}",
                e.expected, e.received
            ),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Pool(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for MismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, received {}", self.expected, self.received)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        Error::Client(err)
    }
}

impl From<MismatchError> for Error {
    fn from(err: MismatchError) -> Self {
        Error::Mismatch(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_accessors() {
        let err = Error::Query(QueryError {
            code: 1064,
            sqlstate: Some("42000".to_string()),
            message: "You have an error in your SQL syntax".to_string(),
            sql: Some("SELEC 1".to_string()),
        });

        assert_eq!(err.server_code(), Some(1064));
        assert_eq!(err.sqlstate(), Some("42000"));
        assert!(!err.is_fatal_for_connection());
    }

    #[test]
    fn fatal_classification() {
        let proto = Error::Protocol(ProtocolError {
            message: "short packet".to_string(),
            raw_data: Some(vec![0xFF, 0x00]),
            source: None,
        });
        assert!(proto.is_fatal_for_connection());

        let lost = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: "connection lost".to_string(),
            source: None,
        });
        assert!(lost.is_fatal_for_connection());

        let auth = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Authentication,
            message: "access denied".to_string(),
            source: None,
        });
        assert!(!auth.is_fatal_for_connection());
    }

    #[test]
    fn client_argument_errors() {
        let too_many = ClientError::too_many_arguments(70_000);
        assert!(too_many.message.contains("65535"));
        assert_eq!(
            too_many.kind,
            ClientErrorKind::TooManyArguments { received: 70_000 }
        );

        let missing = ClientError::missing_arguments(3, 1);
        assert_eq!(
            missing.kind,
            ClientErrorKind::MissingArguments {
                required: 3,
                received: 1
            }
        );
        assert!(missing.message.contains('3'));
        assert!(missing.message.contains('1'));
    }
}
