//! Connection configuration.

use std::time::Duration;

use crate::protocol::capabilities::{self, DEFAULT_CLIENT_FLAGS};
use crate::protocol::collation::DEFAULT_COLLATION;
use crate::protocol::mariadb_capabilities::DEFAULT_MARIADB_FLAGS;

/// Connection parameters, built up fluently:
///
/// ```rust,ignore
/// let config = Config::new()
///     .host("db.internal")
///     .user("app")
///     .password("s3cret")
///     .database("orders");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password; None and "" both authenticate as passwordless
    pub password: Option<String>,
    /// Database to select at connect time
    pub database: Option<String>,
    /// Collation byte sent in the handshake response (default utf8mb4)
    pub collation: u8,
    /// Socket connect timeout; no timeout is applied to commands
    pub connect_timeout: Duration,
    /// Max packet size announced to the server (default: 64MB)
    pub max_packet_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            collation: DEFAULT_COLLATION,
            connect_timeout: Duration::from_secs(30),
            max_packet_size: 64 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the handshake collation byte.
    pub fn collation(mut self, collation: u8) -> Self {
        self.collation = collation;
        self
    }

    /// Set the socket connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the announced max packet size.
    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// The `host:port` address to dial.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The password to authenticate with; a missing password behaves
    /// like an empty one.
    pub fn effective_password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    /// Client capability flags for the handshake response.
    pub fn capability_flags(&self) -> u32 {
        let mut flags = DEFAULT_CLIENT_FLAGS;
        if self.database.is_some() {
            flags |= capabilities::CLIENT_CONNECT_WITH_DB;
        }
        flags
    }

    /// MariaDB extended capability flags for the handshake response.
    pub fn mariadb_capability_flags(&self) -> u32 {
        DEFAULT_MARIADB_FLAGS
    }

    /// Build a configuration from the `TESTING_*` environment
    /// variables used by the integration tests. Returns None when
    /// `TESTING_HOST` is unset.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("TESTING_HOST").ok()?;
        let mut config = Config::new().host(host);
        if let Ok(port) = std::env::var("TESTING_PORT") {
            if let Ok(port) = port.parse() {
                config = config.port(port);
            }
        }
        if let Ok(user) = std::env::var("TESTING_USER") {
            config = config.user(user);
        }
        if let Ok(password) = std::env::var("TESTING_PASSWORD") {
            config = config.password(password);
        }
        if let Ok(database) = std::env::var("TESTING_DATABASE") {
            config = config.database(database);
        }
        Some(config)
    }
}
