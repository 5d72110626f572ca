//! The pipeline/transaction command batcher.

use tracing::instrument;

use crate::cmd::{cmd, Cmd};
use crate::connection::Connection;
use crate::error::{ProtocolError, RedisClientError};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PipelineMode {
    Plain,
    Transactional,
}

/// A batch of commands bound to one [`Connection`] for its lifetime.
/// Created via [`Connection::pipeline`]/[`Connection::transaction`];
/// consumed by exactly one [`Pipeline::execute`]; releases the connection's
/// busy flag on drop whether or not `execute` was ever called.
pub struct Pipeline<'a> {
    connection: &'a mut Connection,
    commands: Vec<Cmd>,
    mode: PipelineMode,
    executed: bool,
    usage_error: Option<&'static str>,
}

impl<'a> Pipeline<'a> {
    pub(crate) fn new(connection: &'a mut Connection, mode: PipelineMode) -> Pipeline<'a> {
        Pipeline {
            connection,
            commands: Vec::new(),
            mode,
            executed: false,
            usage_error: None,
        }
    }

    /// Append a command. No I/O happens here — commands are only sent once
    /// `execute` is called. Appending after `execute` has already run is a
    /// usage error, surfaced when `execute` is (again) called.
    pub fn command(&mut self, c: Cmd) -> &mut Self {
        if self.executed {
            self.usage_error = Some("appended a command to a pipeline after it was executed");
        } else {
            self.commands.push(c);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Send every buffered command in one write, then read back exactly as
    /// many replies as were sent (or, in transactional mode, the `MULTI`
    /// ack, the `QUEUED` acks, and the `EXEC` array). `ignore_results` still
    /// reads and discards the replies — the socket must stay frame-aligned
    /// even when the caller doesn't want the data.
    #[instrument(skip(self), fields(n = self.commands.len(), transactional = self.mode == PipelineMode::Transactional))]
    pub async fn execute(&mut self, ignore_results: bool) -> Result<Vec<Value>, RedisClientError> {
        if let Some(err) = self.usage_error {
            return Err(RedisClientError::Usage(err));
        }
        if self.executed {
            return Err(RedisClientError::Usage("pipeline already executed"));
        }
        self.executed = true;

        if self.commands.is_empty() {
            return Ok(Vec::new());
        }

        let result = match self.mode {
            PipelineMode::Plain => self.execute_plain().await,
            PipelineMode::Transactional => self.execute_transactional().await,
        };

        if ignore_results {
            result.map(|_| Vec::new())
        } else {
            result
        }
    }

    async fn execute_plain(&mut self) -> Result<Vec<Value>, RedisClientError> {
        let n = self.commands.len();
        self.connection.send(&self.commands).await?;
        let replies = self.connection.read_replies(n).await?;
        if self.connection.raise_on_error {
            replies.into_iter().map(Value::raise_if_error).collect()
        } else {
            Ok(replies)
        }
    }

    async fn execute_transactional(&mut self) -> Result<Vec<Value>, RedisClientError> {
        let n = self.commands.len();
        let mut wire = Vec::with_capacity(n + 2);
        wire.push(cmd("MULTI"));
        wire.extend(self.commands.drain(..));
        wire.push(cmd("EXEC"));

        self.connection.send(&wire).await?;
        let mut replies = self.connection.read_replies(n + 2).await?;

        let multi_ack = replies.remove(0);
        if !multi_ack.is_ok() {
            self.connection.poison();
            return Err(ProtocolError::ExpectedSimpleString(multi_ack).into());
        }

        let exec_reply = replies.pop().expect("read_replies(n+2, ..) always leaves the EXEC reply last");
        for (index, reply) in replies.iter().enumerate() {
            if !reply.is_queued() {
                self.connection.poison();
                return Err(ProtocolError::NotQueued {
                    expected: n,
                    index,
                    reply: reply.clone(),
                }
                .into());
            }
        }

        match exec_reply {
            Value::NilArray => Err(RedisClientError::TransactionAborted),
            Value::Array(values) => {
                if values.len() != n {
                    self.connection.poison();
                    return Err(ProtocolError::ExecLengthMismatch {
                        expected: n,
                        got: values.len(),
                    }
                    .into());
                }
                if self.connection.raise_on_error {
                    values.into_iter().map(Value::raise_if_error).collect()
                } else {
                    Ok(values)
                }
            }
            other => {
                self.connection.poison();
                Err(ProtocolError::ExpectedSimpleString(other).into())
            }
        }
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        self.commands.clear();
        self.connection.mark_ready();
    }
}
