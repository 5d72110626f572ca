//! RESP2 encoding and decoding.
//!
//! The decoder is called in a loop — try to parse, and on an incomplete
//! frame read more and retry — driven by a hand-written two-pass scanner so
//! a single incomplete frame costs no allocation and bulk payloads are
//! sliced out of the read buffer rather than copied.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::cmd::Cmd;
use crate::error::ProtocolError;
use crate::value::Value;

/// Serialize a sequence of commands into one contiguous buffer. Per the
/// spec, commands of a single pipeline are always coalesced into a single
/// write — never written one at a time.
pub fn encode_commands<'a>(cmds: impl IntoIterator<Item = &'a Cmd>, buf: &mut BytesMut) {
    for cmd in cmds {
        encode_command(cmd, buf);
    }
}

fn encode_command(cmd: &Cmd, buf: &mut BytesMut) {
    buf.put_u8(b'*');
    write_decimal(buf, cmd.args().len() as i64);
    buf.put_slice(b"\r\n");
    for arg in cmd.args() {
        buf.put_u8(b'$');
        write_decimal(buf, arg.len() as i64);
        buf.put_slice(b"\r\n");
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

/// Serialize a `Value` back into RESP2 bytes. Not needed by the client's own
/// request path (the client only ever encodes `Cmd`s), but every
/// `Decoder::try_parse_one` caller in this crate's tests and any in-memory
/// fake server needs the reverse direction too, and it's the natural other
/// half of this module's responsibility.
pub fn encode_value(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::SimpleString(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s);
            buf.put_slice(b"\r\n");
        }
        Value::Error(e) => {
            buf.put_u8(b'-');
            buf.put_slice(e);
            buf.put_slice(b"\r\n");
        }
        Value::Integer(n) => {
            buf.put_u8(b':');
            write_decimal(buf, *n);
            buf.put_slice(b"\r\n");
        }
        Value::BulkString(s) => {
            buf.put_u8(b'$');
            write_decimal(buf, s.len() as i64);
            buf.put_slice(b"\r\n");
            buf.put_slice(s);
            buf.put_slice(b"\r\n");
        }
        Value::Nil => {
            buf.put_slice(b"$-1\r\n");
        }
        Value::NilArray => {
            buf.put_slice(b"*-1\r\n");
        }
        Value::Array(items) => {
            buf.put_u8(b'*');
            write_decimal(buf, items.len() as i64);
            buf.put_slice(b"\r\n");
            for item in items {
                encode_value(item, buf);
            }
        }
    }
}

/// Render a decimal integer into `buf` with a fixed stack scratch buffer —
/// 20 bytes covers `i64::MIN` (`-9223372036854775808`) — instead of going
/// through `format!`/`to_string`, which would allocate on every argument.
pub fn write_decimal(buf: &mut BytesMut, n: i64) {
    let mut scratch = [0u8; 20];
    let mut i = scratch.len();
    let negative = n < 0;
    let mut mag: u64 = if negative {
        (n as i128).unsigned_abs() as u64
    } else {
        n as u64
    };
    if mag == 0 {
        i -= 1;
        scratch[i] = b'0';
    }
    while mag > 0 {
        i -= 1;
        scratch[i] = b'0' + (mag % 10) as u8;
        mag /= 10;
    }
    if negative {
        i -= 1;
        scratch[i] = b'-';
    }
    buf.put_slice(&scratch[i..]);
}

/// Incremental RESP2 decoder. Stateless between calls: all the state it
/// needs — the pending bytes — lives in the caller's `BytesMut`, so a
/// `Decoder` is just a namespace for the parsing functions.
pub struct Decoder;

impl Decoder {
    /// Try to pull one complete `Value` out of `buf`. On success the
    /// consumed bytes are removed from `buf` (`split_to`, an O(1) refcount
    /// operation — no memmove, no copy of bulk payloads). On `Ok(None)` the
    /// buffer is left untouched so the caller can append more bytes and
    /// retry. `Err` is always fatal: the byte stream can no longer be
    /// trusted to be aligned on frame boundaries.
    pub fn try_parse_one(buf: &mut BytesMut) -> Result<Option<Value>, ProtocolError> {
        let needed = match Self::frame_len(buf, 0)? {
            Some(n) => n,
            None => return Ok(None),
        };
        let frame = buf.split_to(needed).freeze();
        let (value, rest) = Self::read_value(frame.clone())?;
        debug_assert!(rest.is_empty(), "frame_len and read_value must agree on frame boundaries");
        Ok(Some(value))
    }

    /// Compute how many bytes, starting at `start`, a complete frame would
    /// occupy — without allocating a `Value`. `Ok(None)` means the frame is
    /// not fully buffered yet. Recurses for array elements.
    fn frame_len(buf: &[u8], start: usize) -> Result<Option<usize>, ProtocolError> {
        if start >= buf.len() {
            return Ok(None);
        }
        let tag = buf[start];
        match tag {
            b'+' | b'-' | b':' => match find_crlf(buf, start + 1) {
                Some(eol) => Ok(Some(eol + 2 - start)),
                None => Ok(None),
            },
            b'$' => {
                let eol = match find_crlf(buf, start + 1) {
                    Some(eol) => eol,
                    None => return Ok(None),
                };
                let len = parse_i64(&buf[start + 1..eol])?;
                if len < 0 {
                    if len != -1 {
                        return Err(ProtocolError::BulkLengthMismatch { declared: len });
                    }
                    return Ok(Some(eol + 2 - start));
                }
                let body_start = eol + 2;
                let body_end = body_start + len as usize;
                let total_end = body_end + 2;
                if buf.len() < total_end {
                    return Ok(None);
                }
                if &buf[body_end..total_end] != b"\r\n" {
                    return Err(ProtocolError::BulkLengthMismatch { declared: len });
                }
                Ok(Some(total_end - start))
            }
            b'*' => {
                let eol = match find_crlf(buf, start + 1) {
                    Some(eol) => eol,
                    None => return Ok(None),
                };
                let count = parse_i64(&buf[start + 1..eol])?;
                if count < 0 {
                    if count != -1 {
                        return Err(ProtocolError::BadLength(format!(
                            "negative array length {count}"
                        )));
                    }
                    return Ok(Some(eol + 2 - start));
                }
                let mut cursor = eol + 2;
                for _ in 0..count {
                    match Self::frame_len(buf, cursor)? {
                        Some(len) => cursor += len,
                        None => return Ok(None),
                    }
                }
                Ok(Some(cursor - start))
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }

    /// Build a `Value` out of a frame already known (by `frame_len`) to be
    /// complete. `frame` always starts at a tag byte; returns the value and
    /// whatever bytes of `frame` it didn't consume (non-empty only during
    /// array recursion).
    fn read_value(frame: Bytes) -> Result<(Value, Bytes), ProtocolError> {
        let tag = frame[0];
        let rest = frame.slice(1..);
        match tag {
            b'+' => {
                let (line, rest) = split_line(rest);
                Ok((Value::SimpleString(line), rest))
            }
            b'-' => {
                let (line, rest) = split_line(rest);
                Ok((Value::Error(line), rest))
            }
            b':' => {
                let (line, rest) = split_line(rest);
                let n = parse_i64(&line)?;
                Ok((Value::Integer(n), rest))
            }
            b'$' => {
                let (line, rest) = split_line(rest);
                let len = parse_i64(&line)?;
                if len < 0 {
                    return Ok((Value::Nil, rest));
                }
                let len = len as usize;
                let body = rest.slice(0..len);
                let after = rest.slice(len + 2..);
                Ok((Value::BulkString(body), after))
            }
            b'*' => {
                let (line, mut rest) = split_line(rest);
                let count = parse_i64(&line)?;
                if count < 0 {
                    return Ok((Value::NilArray, rest));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (value, remainder) = Self::read_value(rest)?;
                    items.push(value);
                    rest = remainder;
                }
                Ok((Value::Array(items), rest))
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

/// Split `buf` at its first CRLF, returning (line-without-terminator,
/// bytes-after-terminator). Only called once `frame_len` has already proven
/// a CRLF exists at or before `buf`'s logical end.
fn split_line(buf: Bytes) -> (Bytes, Bytes) {
    let pos = buf
        .iter()
        .position(|&b| b == b'\r')
        .expect("frame_len guaranteed a CRLF in this frame");
    let line = buf.slice(0..pos);
    let rest = buf.slice(pos + 2..);
    (line, rest)
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    if start >= buf.len() {
        return None;
    }
    buf[start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| p + start)
}

fn parse_i64(bytes: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::BadLength(String::from_utf8_lossy(bytes).into_owned()))
}
