//! The decoded form of a RESP reply.
//!
//! Named `Value` rather than `Reply` to match the naming the wider
//! `redis`/`valkey-glide` client family uses for this exact concept.

use bytes::Bytes;

/// A single RESP2 reply. Replies nest arbitrarily: an `Array` can hold
/// `Array`s of `BulkString`s, and so on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// A `+...\r\n` line. Never contains CR or LF.
    SimpleString(Bytes),
    /// A `-...\r\n` line. By convention the first space-delimited word is a
    /// status like `ERR`, `WRONGTYPE`, `MOVED`, `NOSCRIPT`.
    Error(Bytes),
    /// A `:...\r\n` signed 64-bit integer.
    Integer(i64),
    /// A `$<n>\r\n<bytes>\r\n` binary-safe string.
    BulkString(Bytes),
    /// The `$-1\r\n` null bulk string sentinel.
    Nil,
    /// A `*<n>\r\n` sequence of replies.
    Array(Vec<Value>),
    /// The `*-1\r\n` null array sentinel.
    NilArray,
}

impl Value {
    pub fn ok() -> Value {
        Value::SimpleString(Bytes::from_static(b"OK"))
    }

    pub fn queued() -> Value {
        Value::SimpleString(Bytes::from_static(b"QUEUED"))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Value::SimpleString(s) if s.as_ref() == b"OK")
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Value::SimpleString(s) if s.as_ref() == b"QUEUED")
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil | Value::NilArray)
    }

    /// Split a RESP error into its status word (`ERR`, `WRONGTYPE`, ...) and
    /// the remaining message, the way the server itself concatenates them.
    pub fn as_error_parts(&self) -> Option<(String, String)> {
        match self {
            Value::Error(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                match text.split_once(' ') {
                    Some((kind, msg)) => Some((kind.to_string(), msg.to_string())),
                    None => Some((text.to_string(), String::new())),
                }
            }
            _ => None,
        }
    }

    /// Convert an `Error` reply into `Err(RedisClientError::Redis { .. })`,
    /// passing everything else through unchanged. Used by callers that opt
    /// into raising on Redis-level errors instead of receiving them as data.
    pub fn raise_if_error(self) -> Result<Value, crate::error::RedisClientError> {
        if let Some((kind, message)) = self.as_error_parts() {
            Err(crate::error::RedisClientError::Redis { kind, message })
        } else {
            Ok(self)
        }
    }

    pub fn as_bulk_string(&self) -> Option<&[u8]> {
        match self {
            Value::BulkString(b) => Some(b.as_ref()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::BulkString(Bytes::from(b))
    }
}
