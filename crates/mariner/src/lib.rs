//! MariaDB/MySQL wire-protocol client driver.
//!
//! This crate implements the MariaDB client/server protocol from
//! scratch over `std::net::TcpStream`. It provides:
//!
//! - Packet framing with sequence numbers and 16MB continuation
//! - Authentication (mysql_native_password, caching_sha2_password)
//! - Text and binary query protocols, including multi-statement batches
//! - Prepared statement support
//! - Connection management with an explicit state machine
//! - Type conversion between Rust and MariaDB types
//!
//! # Protocol Overview
//!
//! MariaDB uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB - 1 are split, with a zero-length terminator
//!   when the split lands exactly on the boundary
//! - One request/response exchange in flight per connection
//!
//! # Example
//!
//! ```rust,ignore
//! use mariner::{Config, Connection};
//!
//! let config = Config::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = Connection::connect(config)?;
//! let rows = conn.query("SELECT 1")?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod resultset;
pub mod types;

pub use config::Config;
pub use connection::{Connection, ConnectionState, ExecuteResult, QueryResult, ServerHandshake};
pub use mariner_core::{Error, Result, Row, Value};
pub use protocol::PreparedResponse;
pub use resultset::{BinaryResultSet, TextResultSet};
pub use types::{Field, FieldType};
