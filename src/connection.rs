//! A single connection to a Redis-compatible server.
//!
//! The read loop tries to pull complete frames out of the buffer first,
//! and only touches the socket again when the buffer runs dry.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, instrument, warn};

use crate::cmd::{cmd, Cmd};
use crate::codec::{encode_commands, Decoder};
use crate::config::ConnectionInfo;
use crate::error::{ConnectError, RedisClientError, TransportError};
use crate::pipeline::{Pipeline, PipelineMode};
use crate::value::Value;

/// Blanket marker for anything usable as the Connection's transport: a TCP
/// stream, a Unix socket, or (in tests) an in-memory `tokio::io::duplex`
/// half.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncDuplex for T {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConnState {
    Ready,
    Busy,
    Closed,
}

/// One transport endpoint and its two buffers. Guarantees at most one
/// pipeline in flight.
pub struct Connection {
    stream: Box<dyn AsyncDuplex>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    pub(crate) state: ConnState,
    read_buffer_max: usize,
    pub(crate) raise_on_error: bool,
}

impl Connection {
    /// Wrap an already-established duplex stream, running the optional
    /// AUTH/SELECT handshake against it. Used directly by tests (with
    /// `tokio::io::duplex`) and internally by `connect`.
    #[instrument(skip(stream, info), fields(db = info.db))]
    pub async fn from_stream<S>(stream: S, info: &ConnectionInfo) -> Result<Connection, ConnectError>
    where
        S: AsyncDuplex + 'static,
    {
        info.validate()?;
        let mut conn = Connection {
            stream: Box::new(stream),
            read_buf: BytesMut::with_capacity(info.read_buffer_initial),
            write_buf: BytesMut::with_capacity(info.read_buffer_initial),
            state: ConnState::Ready,
            read_buffer_max: info.read_buffer_max,
            raise_on_error: info.raise_on_error,
        };
        conn.handshake(info).await?;
        Ok(conn)
    }

    /// Connect over TCP, disabling Nagle, then run the handshake.
    pub async fn connect_tcp(info: &ConnectionInfo) -> Result<Connection, ConnectError> {
        info.validate()?;
        let addr = (info.host.as_str(), info.port);
        let stream = TcpStream::connect(addr).await.map_err(ConnectError::Io)?;
        stream.set_nodelay(true).map_err(ConnectError::Io)?;
        Connection::from_stream(stream, info).await
    }

    /// Connect over a Unix domain socket, then run the handshake.
    pub async fn connect_unix(path: &str, info: &ConnectionInfo) -> Result<Connection, ConnectError> {
        info.validate()?;
        let stream = UnixStream::connect(path).await.map_err(ConnectError::Io)?;
        Connection::from_stream(stream, info).await
    }

    /// Dispatches to `connect_unix` when `info.unix_path` is set, else `connect_tcp`.
    pub async fn connect(info: &ConnectionInfo) -> Result<Connection, ConnectError> {
        match &info.unix_path {
            Some(path) => Connection::connect_unix(path, info).await,
            None => Connection::connect_tcp(info).await,
        }
    }

    async fn handshake(&mut self, info: &ConnectionInfo) -> Result<(), ConnectError> {
        if let Some(password) = &info.password {
            let reply = self
                .execute_one_handshake(cmd("AUTH").arg(password.as_slice()))
                .await?;
            if !reply.is_ok() {
                return Err(ConnectError::AuthRejected(format!("{reply:?}")));
            }
        }
        if info.db != 0 {
            let reply = self
                .execute_one_handshake(cmd("SELECT").arg(info.db))
                .await?;
            if !reply.is_ok() {
                return Err(ConnectError::SelectRejected {
                    db: info.db,
                    reason: format!("{reply:?}"),
                });
            }
        }
        Ok(())
    }

    async fn execute_one_handshake(&mut self, c: Cmd) -> Result<Value, ConnectError> {
        self.send(std::slice::from_ref(&c))
            .await
            .map_err(ConnectError::Io)?;
        let mut out = Vec::with_capacity(1);
        self.read_replies_into(1, &mut out)
            .await
            .map_err(|_| ConnectError::Io(std::io::Error::new(std::io::ErrorKind::Other, "handshake read failed")))?;
        Ok(out.pop().expect("read_replies_into(1, ..) fills exactly one reply"))
    }

    /// Encode `commands` into one contiguous write. Partial writes are
    /// looped until complete; any I/O failure poisons the connection.
    #[instrument(skip(self, commands), fields(n = commands.len()))]
    pub async fn send(&mut self, commands: &[Cmd]) -> Result<(), TransportError> {
        if self.state == ConnState::Closed {
            return Err(TransportError::Closed);
        }
        self.write_buf.clear();
        encode_commands(commands, &mut self.write_buf);
        self.write_all().await
    }

    async fn write_all(&mut self) -> Result<(), TransportError> {
        while !self.write_buf.is_empty() {
            let written = match self.stream.write(&self.write_buf).await {
                Ok(0) => {
                    self.state = ConnState::Closed;
                    return Err(TransportError::Eof);
                }
                Ok(n) => n,
                Err(e) => {
                    self.state = ConnState::Closed;
                    return Err(TransportError::Io(e));
                }
            };
            self.write_buf.advance(written);
        }
        self.stream.flush().await.map_err(|e| {
            self.state = ConnState::Closed;
            TransportError::Io(e)
        })
    }

    /// Read until the decoder has produced exactly `n` replies.
    #[instrument(skip(self))]
    pub async fn read_replies(&mut self, n: usize) -> Result<Vec<Value>, RedisClientError> {
        let mut out = Vec::with_capacity(n);
        self.read_replies_into(n, &mut out).await?;
        Ok(out)
    }

    async fn read_replies_into(&mut self, n: usize, out: &mut Vec<Value>) -> Result<(), RedisClientError> {
        if self.state == ConnState::Closed {
            return Err(TransportError::Closed.into());
        }
        while out.len() < n {
            loop {
                match Decoder::try_parse_one(&mut self.read_buf) {
                    Ok(Some(value)) => out.push(value),
                    Ok(None) => break,
                    Err(e) => {
                        self.state = ConnState::Closed;
                        return Err(e.into());
                    }
                }
                if out.len() == n {
                    return Ok(());
                }
            }
            self.ensure_read_capacity();
            let read = self.stream.read_buf(&mut self.read_buf).await.map_err(|e| {
                self.state = ConnState::Closed;
                TransportError::Io(e)
            })?;
            if read == 0 {
                self.state = ConnState::Closed;
                return Err(TransportError::Eof.into());
            }
            debug!(bytes = read, "read from socket");
        }
        Ok(())
    }

    /// Geometric growth up to `read_buffer_max`; a single reply larger than
    /// the ceiling still grows the buffer (never silently truncated) but
    /// logs a warning, since sustained growth past the ceiling usually means
    /// the ceiling is misconfigured for the workload.
    fn ensure_read_capacity(&mut self) {
        if self.read_buf.capacity() > self.read_buf.len() {
            return;
        }
        let current = self.read_buf.capacity().max(1);
        let doubled = current.saturating_mul(2);
        if current >= self.read_buffer_max {
            warn!(ceiling = self.read_buffer_max, "read buffer growing past its configured ceiling");
            self.read_buf.reserve(current);
        } else {
            let target = doubled.min(self.read_buffer_max).max(current + 1);
            self.read_buf.reserve(target - current);
        }
    }

    /// Convenience path equivalent to a single-command pipeline.
    pub async fn execute_one(&mut self, command: Cmd) -> Result<Value, RedisClientError> {
        self.send(std::slice::from_ref(&command)).await?;
        let mut out = self.read_replies(1).await?;
        let value = out.pop().expect("read_replies(1) fills exactly one reply");
        if self.raise_on_error {
            value.raise_if_error()
        } else {
            Ok(value)
        }
    }

    /// Borrow this connection for a plain pipeline. Only one `Pipeline` can
    /// be alive at a time — the borrow checker enforces this structurally
    /// (`Pipeline<'_>` holds `&mut Connection`), and the `busy` state is
    /// additionally checked at runtime for defense in depth.
    pub fn pipeline(&mut self) -> Result<Pipeline<'_>, RedisClientError> {
        self.begin_pipeline(PipelineMode::Plain)
    }

    /// Borrow this connection for a transactional (`MULTI`/`EXEC`) pipeline.
    pub fn transaction(&mut self) -> Result<Pipeline<'_>, RedisClientError> {
        self.begin_pipeline(PipelineMode::Transactional)
    }

    fn begin_pipeline(&mut self, mode: PipelineMode) -> Result<Pipeline<'_>, RedisClientError> {
        if self.state == ConnState::Closed {
            return Err(TransportError::Closed.into());
        }
        if self.state == ConnState::Busy {
            return Err(RedisClientError::Usage("a pipeline is already in flight on this connection"));
        }
        self.state = ConnState::Busy;
        Ok(Pipeline::new(self, mode))
    }

    pub(crate) fn mark_ready(&mut self) {
        if self.state != ConnState::Closed {
            self.state = ConnState::Ready;
        }
    }

    pub(crate) fn poison(&mut self) {
        self.state = ConnState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    /// Idempotent: marks the connection closed and shuts the transport down.
    pub async fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;
        let _ = self.stream.shutdown().await;
    }
}
