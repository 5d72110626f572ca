//! Error kinds surfaced at the crate boundary.
//!
//! A client library needs the caller to be able to match on *why*
//! something failed rather than catch a single opaque `Box<dyn Error>`, so
//! each distinguishable failure mode gets its own variant.

use std::io;

/// Everything that can go wrong talking to a Redis-compatible server.
#[derive(thiserror::Error, Debug)]
pub enum RedisClientError {
    #[error("failed to connect: {0}")]
    Connect(#[from] ConnectError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server returned an error: {kind}: {message}")]
    Redis { kind: String, message: String },

    #[error("transaction aborted: a watched key changed")]
    TransactionAborted,

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("usage error: {0}")]
    Usage(&'static str),
}

/// Transport setup failed: DNS, refused connection, rejected AUTH/SELECT.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("io error during connect: {0}")]
    Io(#[from] io::Error),

    #[error("server rejected AUTH: {0}")]
    AuthRejected(String),

    #[error("server rejected SELECT {db}: {reason}")]
    SelectRejected { db: i64, reason: String },

    #[error("unexpected reply during handshake: {0:?}")]
    UnexpectedHandshakeReply(crate::value::Value),

    #[error("unsupported text encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("invalid connection url: {0}")]
    InvalidUrl(String),
}

/// An established connection was lost mid-operation. Fatal: the connection
/// must be closed, never reused.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed by peer")]
    Eof,

    #[error("operation attempted on a closed connection")]
    Closed,
}

/// The decoder rejected the byte stream, or the transactional framing did not
/// match expectations. Fatal: the connection's byte-stream alignment can no
/// longer be trusted.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("unknown RESP type tag: {0:#x}")]
    UnknownTag(u8),

    #[error("malformed length prefix: {0}")]
    BadLength(String),

    #[error("declared bulk length {declared} does not match terminator position")]
    BulkLengthMismatch { declared: i64 },

    #[error("expected {expected} QUEUED replies inside MULTI/EXEC, got a non-QUEUED reply at index {index}: {reply:?}")]
    NotQueued {
        expected: usize,
        index: usize,
        reply: crate::value::Value,
    },

    #[error("EXEC returned an array of length {got}, expected {expected}")]
    ExecLengthMismatch { expected: usize, got: usize },

    #[error("expected a simple string reply, got {0:?}")]
    ExpectedSimpleString(crate::value::Value),
}
