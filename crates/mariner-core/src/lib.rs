//! Core types for the Mariner MariaDB/MySQL driver.
//!
//! This crate holds the pieces shared between the wire-protocol driver
//! and the connection pool:
//!
//! - `Value`, the dynamically-typed SQL value
//! - `Row` and `ColumnInfo` for result rows
//! - the error taxonomy and `Result` alias

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    ClientError, ClientErrorKind, ConnectionError, ConnectionErrorKind, Error, MismatchError,
    PoolError, PoolErrorKind, ProtocolError, QueryError, Result, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
