//! FastDFS Connection Management
//!
//! [`Connection`] wraps one TCP stream to a tracker or storage server and
//! applies the network timeout to every read and write.
//!
//! [`ConnectionPool`] bounds and reuses connections to a single endpoint:
//!   - at most `max_conns` connections are checked out at once; further
//!     callers wait (optionally bounded by an acquire timeout)
//!   - idle connections are reused LIFO and expire after `idle_timeout`
//!   - a connection that saw any error is discarded, never returned idle
//!
//! A checked-out connection is a [`PooledConnection`] guard. Releasing it
//! with `healthy = true` puts it back; dropping it without a release (for
//! example when the surrounding future is cancelled) discards it.

use bytes::Bytes;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{error::Elapsed, timeout};

use crate::config::ClientConfig;
use crate::errors::{FdfsError, Result};

/// Chunk size used when streaming file bodies
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Represents a TCP connection to a FastDFS server (tracker or storage)
///
/// Each connection tracks its last usage time for idle timeout management.
pub struct Connection {
    id: u64,
    stream: TcpStream,
    addr: String,
    network_timeout: Duration,
    last_used: Instant,
}

impl Connection {
    /// Wraps an established TCP stream
    pub fn new(id: u64, stream: TcpStream, addr: String, network_timeout: Duration) -> Self {
        Self {
            id,
            stream,
            addr,
            network_timeout,
            last_used: Instant::now(),
        }
    }

    /// Identifier unique within the pool that dialed this connection
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the server address this connection is connected to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Returns the timestamp of the last send or receive operation
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    fn finish_io<T>(
        &mut self,
        operation: &'static str,
        result: std::result::Result<io::Result<T>, Elapsed>,
    ) -> Result<T> {
        match result {
            Ok(Ok(value)) => {
                self.last_used = Instant::now();
                Ok(value)
            }
            Ok(Err(source)) => Err(FdfsError::Network {
                operation,
                addr: self.addr.clone(),
                source,
            }),
            Err(_) => Err(FdfsError::NetworkTimeout {
                operation,
                addr: self.addr.clone(),
            }),
        }
    }

    /// Transmits all of `data` to the server
    ///
    /// Large buffers go out in chunks, each under its own network timeout,
    /// so a slow peer is treated the same as for a streamed body.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(STREAM_CHUNK_SIZE) {
            let result = timeout(self.network_timeout, self.stream.write_all(chunk)).await;
            self.finish_io("write", result)?;
        }
        Ok(())
    }

    /// Fills `buf` completely from the server
    pub async fn receive_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let result = timeout(self.network_timeout, self.stream.read_exact(buf)).await;
        self.finish_io("read", result).map(|_| ())
    }

    /// Reads exactly `size` bytes from the server
    pub async fn receive_full(&mut self, size: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; size];
        self.receive_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Streams exactly `size` bytes from `reader` to the server
    ///
    /// A reader that ends early fails with `UnexpectedEof`; the peer has
    /// then seen a truncated body and the connection must be discarded.
    pub async fn send_from<R>(&mut self, reader: &mut R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; chunk_len(size)];
        let mut remaining = size;

        while remaining > 0 {
            let want = chunk_len(remaining).min(buf.len());
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(FdfsError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "upload source ended after {} of {} bytes",
                        size - remaining,
                        size
                    ),
                )));
            }
            self.send(&buf[..n]).await?;
            remaining -= n as u64;
        }

        Ok(())
    }

    /// Streams exactly `size` bytes from the server into `writer`
    pub async fn receive_to<W>(&mut self, writer: &mut W, size: u64) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; chunk_len(size)];
        let mut remaining = size;

        while remaining > 0 {
            let want = chunk_len(remaining).min(buf.len());
            let result = timeout(self.network_timeout, self.stream.read(&mut buf[..want])).await;
            let n = self.finish_io("read", result)?;
            if n == 0 {
                return Err(FdfsError::Network {
                    operation: "read",
                    addr: self.addr.clone(),
                    source: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-body",
                    ),
                });
            }
            writer.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }

        Ok(())
    }
}

fn chunk_len(size: u64) -> usize {
    usize::try_from(size)
        .unwrap_or(usize::MAX)
        .min(STREAM_CHUNK_SIZE)
}

/// Point-in-time view of a pool's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections waiting in the idle set
    pub idle: usize,
    /// Connections currently checked out
    pub outstanding: usize,
    /// Capacity of the pool
    pub max_conns: usize,
    /// Connections dialed over the pool's lifetime
    pub dialed: u64,
}

struct PoolState {
    idle: Vec<Connection>,
    outstanding: usize,
    closed: bool,
}

/// Pool of reusable connections to one endpoint
pub struct ConnectionPool {
    addr: String,
    max_conns: usize,
    connect_timeout: Duration,
    network_timeout: Duration,
    idle_timeout: Duration,
    acquire_timeout: Option<Duration>,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    dialed: AtomicU64,
}

impl ConnectionPool {
    /// Creates an empty pool; connections are dialed on demand
    pub fn new(addr: String, config: &ClientConfig) -> Self {
        Self {
            addr,
            max_conns: config.max_conns,
            connect_timeout: config.connect_timeout(),
            network_timeout: config.network_timeout(),
            idle_timeout: config.idle_timeout(),
            acquire_timeout: config.acquire_timeout(),
            permits: Arc::new(Semaphore::new(config.max_conns)),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                outstanding: 0,
                closed: false,
            }),
            dialed: AtomicU64::new(0),
        }
    }

    /// Endpoint this pool connects to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Checks out a connection
    ///
    /// Returns an idle connection if one is fresh, dials a new one if
    /// capacity allows, and otherwise waits for a release. A failed dial
    /// does not consume capacity.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(FdfsError::PoolClosed(self.addr.clone()));
        }

        let permit = self.acquire_permit().await?;

        if let Some(conn) = self.take_idle()? {
            tracing::debug!(addr = %self.addr, conn_id = conn.id(), "reusing pooled connection");
            return Ok(self.checkout(conn, permit));
        }

        let conn = self.dial().await?;
        let mut state = self.lock_state();
        if state.closed {
            return Err(FdfsError::PoolClosed(self.addr.clone()));
        }
        state.outstanding += 1;
        drop(state);

        Ok(self.checkout(conn, permit))
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let result = match self.acquire_timeout {
            Some(limit) => timeout(limit, acquire)
                .await
                .map_err(|_| FdfsError::PoolExhausted(self.addr.clone()))?,
            None => acquire.await,
        };
        result.map_err(|_| FdfsError::PoolClosed(self.addr.clone()))
    }

    fn take_idle(&self) -> Result<Option<Connection>> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(FdfsError::PoolClosed(self.addr.clone()));
        }

        while let Some(conn) = state.idle.pop() {
            if conn.last_used().elapsed() < self.idle_timeout {
                state.outstanding += 1;
                return Ok(Some(conn));
            }
            tracing::debug!(addr = %self.addr, conn_id = conn.id(), "dropping stale connection");
        }

        Ok(None)
    }

    fn checkout(self: &Arc<Self>, conn: Connection, permit: OwnedSemaphorePermit) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        }
    }

    async fn dial(&self) -> Result<Connection> {
        let result = timeout(self.connect_timeout, TcpStream::connect(self.addr.as_str())).await;

        let stream = match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(FdfsError::Dial {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => return Err(FdfsError::ConnectTimeout(self.addr.clone())),
        };
        stream.set_nodelay(true).map_err(|source| FdfsError::Dial {
            addr: self.addr.clone(),
            source,
        })?;

        let id = self.dialed.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(addr = %self.addr, conn_id = id, "dialed new connection");
        Ok(Connection::new(id, stream, self.addr.clone(), self.network_timeout))
    }

    /// Returns a checked-out connection
    ///
    /// Healthy connections go back to the idle set; anything else is closed
    /// and its capacity slot freed for a fresh dial.
    pub fn release(&self, mut conn: PooledConnection, healthy: bool) {
        debug_assert!(std::ptr::eq(Arc::as_ptr(&conn.pool), self));
        if let Some(inner) = conn.conn.take() {
            conn.pool.checkin(inner, healthy);
        }
    }

    fn checkin(&self, conn: Connection, healthy: bool) {
        let mut state = self.lock_state();
        state.outstanding = state.outstanding.saturating_sub(1);

        if healthy && !state.closed && state.idle.len() < self.max_conns {
            state.idle.push(conn);
            return;
        }
        drop(state);

        tracing::debug!(addr = %self.addr, conn_id = conn.id(), healthy, "discarding connection");
    }

    /// Closes every idle connection and rejects further checkouts
    ///
    /// Waiters blocked in `get()` fail with `PoolClosed`. Connections that
    /// are checked out are discarded when they come back. Idempotent.
    pub fn destroy(&self) {
        let idle = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.permits.close();
        tracing::debug!(addr = %self.addr, closed = idle.len(), "connection pool destroyed");
    }

    /// Snapshot of the pool's bookkeeping
    pub fn stats(&self) -> PoolStats {
        let state = self.lock_state();
        PoolStats {
            idle: state.idle.len(),
            outstanding: state.outstanding,
            max_conns: self.max_conns,
            dialed: self.dialed.load(Ordering::Relaxed),
        }
    }
}

/// A connection checked out of a [`ConnectionPool`]
///
/// Dereferences to [`Connection`]. Dropping the guard without calling
/// [`ConnectionPool::release`] discards the connection.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection already released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn, false);
        }
    }
}
