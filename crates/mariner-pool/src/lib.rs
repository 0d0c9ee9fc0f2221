//! Connection pooling for the mariner driver.
//!
//! The pool multiplexes a bounded set of connections among concurrent
//! callers. Idle connections are handed out LIFO (warm sockets first);
//! callers that find the pool exhausted wait FIFO. A connection is
//! owned by at most one caller at a time: [`PooledConnection`] removes
//! it from the idle stack for as long as the guard lives and returns
//! it on drop.
//!
//! ```rust,ignore
//! let pool = Pool::new(PoolConfig::new(8), Config::from_env().unwrap())?;
//! let mut conn = pool.acquire()?;
//! let rows = conn.query("SELECT 1")?;
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use mariner::{Config, Connection, ConnectionState, ExecuteResult, Row};
use mariner_core::{Error, PoolError, PoolErrorKind, Result};

/// Pool sizing and timing configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Soft limit: connections created on demand up to this count
    pub connections: usize,
    /// Optional hard limit for `immediate` acquisitions
    pub max_connections: Option<usize>,
    /// Idle-eviction floor: eviction never drops the idle count below
    /// this
    pub idle_connections: usize,
    /// How long a connection may sit idle before eviction
    pub idle_timeout: Duration,
    /// How long an acquisition waits in the queue before timing out
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connections: 10,
            max_connections: None,
            idle_connections: 0,
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given soft limit.
    pub fn new(connections: usize) -> Self {
        Self {
            connections,
            ..Default::default()
        }
    }

    /// Set the hard limit for `immediate` acquisitions.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = Some(n);
        self
    }

    /// Set the idle-eviction floor.
    pub fn idle_connections(mut self, n: usize) -> Self {
        self.idle_connections = n;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the acquisition timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            return Err(config_error("connections must be at least 1"));
        }
        if let Some(max) = self.max_connections {
            if max < self.connections {
                return Err(config_error(
                    "max_connections must not be below connections",
                ));
            }
        }
        if self.idle_connections > self.connections {
            return Err(config_error(
                "idle_connections must not exceed connections",
            ));
        }
        Ok(())
    }
}

/// Per-acquisition options.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireOptions {
    /// Reset session state before handing out a previously used
    /// connection (session-variable isolation)
    pub renew: bool,
    /// Allow creating connections past the soft limit, up to the hard
    /// limit if one is configured
    pub immediate: bool,
}

/// A point-in-time view of pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections, held and idle combined
    pub connections_count: usize,
    /// Connections currently idle
    pub idle_connections_count: usize,
    /// Acquisitions currently waiting
    pub acquisition_queue_size: usize,
}

/// Connection lifecycle hooks the pool drives. The production
/// implementation dials MariaDB; tests substitute their own.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new connection.
    fn connect(&self) -> Result<Self::Connection>;

    /// Reset session state on a previously used connection.
    fn reset(&self, conn: &mut Self::Connection) -> Result<()>;

    /// Is the connection still usable?
    fn is_healthy(&self, conn: &Self::Connection) -> bool;

    /// Close the connection.
    fn close(&self, conn: &mut Self::Connection);
}

/// The production connector: dials MariaDB with a [`Config`].
#[derive(Debug)]
pub struct MarinerConnector {
    config: Config,
}

impl MarinerConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Connector for MarinerConnector {
    type Connection = Connection;

    fn connect(&self) -> Result<Connection> {
        Connection::connect(self.config.clone())
    }

    fn reset(&self, conn: &mut Connection) -> Result<()> {
        conn.reset()
    }

    fn is_healthy(&self, conn: &Connection) -> bool {
        conn.state() == ConnectionState::Ready
    }

    fn close(&self, conn: &mut Connection) {
        conn.close();
    }
}

struct IdleEntry<T> {
    conn: T,
    since: Instant,
    /// A connection that has served a caller; fresh ones skip the
    /// renew reset
    used: bool,
}

struct State<T> {
    idle: Vec<IdleEntry<T>>,
    live: usize,
    /// Tickets of waiting acquisitions, front is the longest waiting
    queue: VecDeque<u64>,
    next_ticket: u64,
    closed: bool,
}

struct Shared<C: Connector> {
    connector: C,
    config: PoolConfig,
    state: Mutex<State<C::Connection>>,
    available: Condvar,
}

impl<C: Connector> Shared<C> {
    /// Close idle connections past the idle timeout, keeping at least
    /// `idle_connections` of them alive.
    fn evict_expired(&self, state: &mut State<C::Connection>, now: Instant) {
        let floor = self.config.idle_connections;
        let mut i = 0;
        while i < state.idle.len() {
            if state.idle.len() <= floor {
                break;
            }
            if now.duration_since(state.idle[i].since) >= self.config.idle_timeout {
                let mut entry = state.idle.remove(i);
                state.live -= 1;
                trace!("evicting idle connection");
                self.connector.close(&mut entry.conn);
            } else {
                i += 1;
            }
        }
    }
}

/// A thread-safe connection pool. Cloning shares the same pool.
pub struct Pool<C: Connector = MarinerConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Pool<MarinerConnector> {
    /// Create a pool that dials MariaDB with `connect_config`.
    /// Connections are opened lazily, on first acquisition.
    pub fn new(pool_config: PoolConfig, connect_config: Config) -> Result<Self> {
        Self::with_connector(pool_config, MarinerConnector::new(connect_config))
    }

    /// Acquire a connection and run a query on it.
    pub fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.acquire()?.query(sql)
    }

    /// Acquire a connection and run a statement on it.
    pub fn execute(&self, sql: &str) -> Result<ExecuteResult> {
        self.acquire()?.execute(sql)
    }
}

impl<C: Connector> Pool<C> {
    /// Create a pool over a custom connector.
    pub fn with_connector(config: PoolConfig, connector: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                connector,
                config,
                state: Mutex::new(State {
                    idle: Vec::new(),
                    live: 0,
                    queue: VecDeque::new(),
                    next_ticket: 0,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// Acquire a connection with default options.
    pub fn acquire(&self) -> Result<PooledConnection<C>> {
        self.acquire_with(AcquireOptions::default())
    }

    /// Acquire a connection.
    ///
    /// Fast path: an idle connection is handed out at once (reset
    /// first when `renew` is set and it has served a caller before).
    /// Below the soft limit — or the hard limit under `immediate` — a
    /// new connection is dialed. Otherwise the call joins a FIFO queue
    /// until a connection is released or `acquire_timeout` elapses.
    pub fn acquire_with(&self, options: AcquireOptions) -> Result<PooledConnection<C>> {
        let deadline = Instant::now() + self.shared.config.acquire_timeout;
        let mut ticket = None;
        let mut state = lock(&self.shared.state)?;

        loop {
            if state.closed {
                if let Some(t) = ticket {
                    state.queue.retain(|&q| q != t);
                }
                return Err(closed_error());
            }
            self.shared.evict_expired(&mut state, Instant::now());

            // A queued waiter acts only once it reaches the front of
            // the queue; a fresh call acts at once
            let at_front = match ticket {
                None => true,
                Some(t) => state.queue.front() == Some(&t),
            };

            // Idle fast path
            if at_front && !state.idle.is_empty() {
                let entry = state.idle.pop().expect("idle checked non-empty");
                if let Some(t) = ticket {
                    state.queue.retain(|&q| q != t);
                }
                drop(state);
                return self.finish_idle_acquire(entry, options);
            }

            // Dial a new connection when capacity allows; a discarded
            // broken connection frees capacity without refilling idle
            if at_front && self.may_create(&state, options) {
                if let Some(t) = ticket {
                    state.queue.retain(|&q| q != t);
                }
                state.live += 1;
                drop(state);
                return match self.shared.connector.connect() {
                    Ok(conn) => {
                        debug!("pool connection opened");
                        Ok(PooledConnection {
                            shared: Arc::clone(&self.shared),
                            conn: Some(conn),
                        })
                    }
                    Err(err) => {
                        let mut state = lock(&self.shared.state)?;
                        state.live -= 1;
                        self.shared.available.notify_all();
                        Err(err)
                    }
                };
            }

            if ticket.is_none() {
                let t = state.next_ticket;
                state.next_ticket += 1;
                state.queue.push_back(t);
                ticket = Some(t);
                trace!(ticket = t, "acquisition queued");
            }

            let now = Instant::now();
            if now >= deadline {
                if let Some(t) = ticket {
                    state.queue.retain(|&q| q != t);
                }
                return Err(Error::Pool(PoolError {
                    kind: PoolErrorKind::Timeout,
                    message: format!(
                        "no connection became available within {:?}",
                        self.shared.config.acquire_timeout
                    ),
                    source: None,
                }));
            }
            let (next, _) = self
                .shared
                .available
                .wait_timeout(state, deadline - now)
                .map_err(|_| poisoned_error())?;
            state = next;
        }
    }

    fn may_create(&self, state: &State<C::Connection>, options: AcquireOptions) -> bool {
        if state.live < self.shared.config.connections {
            return true;
        }
        options.immediate
            && self
                .shared
                .config
                .max_connections
                .is_none_or(|max| state.live < max)
    }

    fn finish_idle_acquire(
        &self,
        mut entry: IdleEntry<C::Connection>,
        options: AcquireOptions,
    ) -> Result<PooledConnection<C>> {
        if options.renew && entry.used {
            trace!("renewing idle connection");
            if let Err(err) = self.shared.connector.reset(&mut entry.conn) {
                warn!(error = %err, "session reset failed, discarding connection");
                self.shared.connector.close(&mut entry.conn);
                let mut state = lock(&self.shared.state)?;
                state.live -= 1;
                self.shared.available.notify_all();
                drop(state);
                // The stack may hold another usable connection
                return self.acquire_with(options);
            }
        }
        Ok(PooledConnection {
            shared: Arc::clone(&self.shared),
            conn: Some(entry.conn),
        })
    }

    /// Point-in-time counters for monitoring and tests.
    pub fn debug(&self) -> Result<PoolStats> {
        let state = lock(&self.shared.state)?;
        Ok(PoolStats {
            connections_count: state.live,
            idle_connections_count: state.idle.len(),
            acquisition_queue_size: state.queue.len(),
        })
    }

    /// Close the pool: idle connections are closed, queued
    /// acquisitions fail, held connections are closed on release.
    pub fn close(&self) -> Result<()> {
        let mut state = lock(&self.shared.state)?;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.live -= idle.len();
        drop(state);
        for mut entry in idle {
            self.shared.connector.close(&mut entry.conn);
        }
        self.shared.available.notify_all();
        debug!("pool closed");
        Ok(())
    }

    #[cfg(test)]
    fn backdate_idle(&self, age: Duration) {
        let mut state = self.shared.state.lock().unwrap();
        for entry in &mut state.idle {
            entry.since = Instant::now() - age;
        }
    }
}

/// A connection on loan from the pool; derefs to the underlying
/// connection and returns it on drop.
pub struct PooledConnection<C: Connector> {
    shared: Arc<Shared<C>>,
    conn: Option<C::Connection>,
}

impl<C: Connector> PooledConnection<C> {
    /// Detach the connection from the pool permanently.
    pub fn detach(mut self) -> C::Connection {
        let conn = self.conn.take().expect("connection present until drop");
        if let Ok(mut state) = self.shared.state.lock() {
            state.live -= 1;
            self.shared.available.notify_all();
        }
        conn
    }
}

impl<C: Connector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl<C: Connector> std::ops::Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: Connector> std::ops::DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let Ok(mut state) = self.shared.state.lock() else {
            return;
        };
        let discard = state.closed
            || !self.shared.connector.is_healthy(&conn)
            || state.live > self.shared.config.connections;
        if discard {
            state.live -= 1;
            drop(state);
            self.shared.connector.close(&mut conn);
            self.shared.available.notify_all();
            return;
        }
        state.idle.push(IdleEntry {
            conn,
            since: Instant::now(),
            used: true,
        });
        drop(state);
        // Wake the longest-waiting acquirer
        self.shared.available.notify_all();
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| poisoned_error())
}

fn poisoned_error() -> Error {
    Error::Pool(PoolError {
        kind: PoolErrorKind::Closed,
        message: "pool lock poisoned by a panicking holder".to_string(),
        source: None,
    })
}

fn closed_error() -> Error {
    Error::Pool(PoolError {
        kind: PoolErrorKind::Closed,
        message: "pool is closed".to_string(),
        source: None,
    })
}

fn config_error(message: &str) -> Error {
    Error::Pool(PoolError {
        kind: PoolErrorKind::Config,
        message: message.to_string(),
        source: None,
    })
}
