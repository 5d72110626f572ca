//! A client library for a Redis-compatible key-value server, built around
//! pipelined throughput: a zero-copy RESP2 encoder, an incremental decoder,
//! a pipeline/transaction batcher, and a fair-acquisition connection pool.
//!
//! ```no_run
//! use redis_pipe::{cmd, ConnectionInfo, Connection};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let info = ConnectionInfo::default();
//! let mut conn = Connection::connect(&info).await?;
//!
//! let mut pipe = conn.pipeline()?;
//! pipe.command(cmd::set("hello", "world"));
//! pipe.command(cmd::get("hello"));
//! let replies = pipe.execute(false).await?;
//! assert_eq!(replies.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod cmd;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod value;

pub use cmd::{cmd as command, Cmd};
pub use config::{ConnectionInfo, PoolConfig};
pub use connection::Connection;
pub use error::{ConnectError, ProtocolError, RedisClientError, TransportError};
pub use pipeline::Pipeline;
pub use pool::{Pool, PooledConnection};
pub use value::Value;
