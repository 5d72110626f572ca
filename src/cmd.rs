//! A thin command builder. Ergonomic per-command wrappers (`GET`/`SET`/
//! `HSET`/…) live outside this crate as external collaborators; this module
//! is the minimal surface needed to express common commands, not an attempt
//! at full command coverage.

use bytes::Bytes;

/// An ordered, non-empty sequence of byte-string arguments. Immutable once
/// appended to a [`crate::pipeline::Pipeline`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

/// Anything that can be rendered into a RESP argument's raw bytes.
/// Numeric arguments are rendered to their decimal byte form; text is
/// encoded as UTF-8 (the only caller-selectable encoding currently
/// implemented — see `ConnectionInfo::encoding`).
pub trait ToArg {
    fn to_arg(&self) -> Bytes;
}

impl ToArg for &str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for &[u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

macro_rules! impl_to_arg_for_int {
    ($($t:ty),*) => {
        $(
            impl ToArg for $t {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string().into_bytes())
                }
            }
        )*
    };
}

impl_to_arg_for_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl Cmd {
    pub fn new() -> Cmd {
        Cmd { args: Vec::new() }
    }

    pub fn arg<T: ToArg>(mut self, arg: T) -> Cmd {
        self.args.push(arg.to_arg());
        self
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl Default for Cmd {
    fn default() -> Self {
        Cmd::new()
    }
}

/// Start building a command with the given verb, e.g. `cmd("SET").arg("k").arg("v")`.
pub fn cmd(verb: &str) -> Cmd {
    Cmd::new().arg(verb)
}

// A handful of convenience constructors covering the common commands; not
// an attempt at full command coverage.
pub fn get<K: ToArg>(key: K) -> Cmd {
    cmd("GET").arg(key)
}

pub fn set<K: ToArg, V: ToArg>(key: K, value: V) -> Cmd {
    cmd("SET").arg(key).arg(value)
}

pub fn incr<K: ToArg>(key: K) -> Cmd {
    cmd("INCR").arg(key)
}

pub fn lpush<K: ToArg>(key: K, values: impl IntoIterator<Item = Bytes>) -> Cmd {
    let mut c = cmd("LPUSH").arg(key);
    for v in values {
        c = c.arg(v);
    }
    c
}

pub fn rpush<K: ToArg>(key: K, values: impl IntoIterator<Item = Bytes>) -> Cmd {
    let mut c = cmd("RPUSH").arg(key);
    for v in values {
        c = c.arg(v);
    }
    c
}

pub fn lrange<K: ToArg>(key: K, start: i64, stop: i64) -> Cmd {
    cmd("LRANGE").arg(key).arg(start).arg(stop)
}
