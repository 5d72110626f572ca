//! The fair-acquisition connection pool.
//!
//! Everything — the idle set, the created-count, and the FIFO waiter queue —
//! lives behind one `tokio::sync::Mutex`: a single lock guards all shared
//! mutable state reached from many tasks. Holding that lock across the
//! whole "check idle, check capacity, else enqueue" decision in `acquire`
//! is what prevents a connection freed by a concurrent `release` from being
//! handed to the wrong waiter (or silently stranded in `idle` while an
//! older waiter keeps sleeping).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, instrument};

use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::error::{ConnectError, RedisClientError};

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection, ConnectError>> + Send>>;
type Factory = Arc<dyn Fn() -> ConnectFuture + Send + Sync>;

struct State {
    idle: Vec<Connection>,
    waiters: VecDeque<oneshot::Sender<Option<Connection>>>,
    created: usize,
    /// Connections currently checked out to a caller (handed out by
    /// `acquire`, not yet back in `idle` or destroyed). `drain` blocks on
    /// this reaching zero before it returns, per spec §4.4.
    outstanding: usize,
    closed: bool,
}

struct Shared {
    size: usize,
    factory: Factory,
    state: Mutex<State>,
    /// Notified whenever a release leaves `outstanding == 0` while the pool
    /// is closed, so `drain` can wait for every busy connection to come back
    /// instead of returning while they're still checked out.
    drained: Notify,
}

/// A bounded set of [`Connection`]s shared by many concurrent callers.
/// Connections are minted lazily by the pool's factory closure, up to
/// `size`; beyond that, `acquire` callers queue strictly FIFO until one is
/// released.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

impl Pool {
    /// Build a pool whose factory dials `config.connection` with
    /// [`Connection::connect`] on every new connection.
    pub fn new(config: PoolConfig) -> Pool {
        let size = config.size;
        let info = config.connection;
        Pool::with_factory(size, move || {
            let info = info.clone();
            Box::pin(async move { Connection::connect(&info).await }) as ConnectFuture
        })
    }

    /// Build a pool from an arbitrary connection factory — the escape hatch
    /// that lets tests point the pool at an in-memory transport instead of
    /// a real socket.
    pub fn with_factory<F, Fut>(size: usize, factory: F) -> Pool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Connection, ConnectError>> + Send + 'static,
    {
        let factory: Factory = Arc::new(move || Box::pin(factory()) as ConnectFuture);
        Pool {
            shared: Arc::new(Shared {
                size,
                factory,
                state: Mutex::new(State {
                    idle: Vec::new(),
                    waiters: VecDeque::new(),
                    created: 0,
                    outstanding: 0,
                    closed: false,
                }),
                drained: Notify::new(),
            }),
        }
    }

    /// Acquire a connection, waiting in strict FIFO order if none is idle
    /// and the pool is already at capacity. Returns a guard that returns the
    /// connection to the pool (or closes it, if poisoned) when dropped.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<PooledConnection, RedisClientError> {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return Err(RedisClientError::PoolClosed);
        }
        if let Some(conn) = state.idle.pop() {
            state.outstanding += 1;
            drop(state);
            return Ok(PooledConnection::new(self.shared.clone(), conn));
        }
        if state.created < self.shared.size {
            state.created += 1;
            state.outstanding += 1;
            drop(state);
            return match (self.shared.factory)().await {
                Ok(conn) => Ok(PooledConnection::new(self.shared.clone(), conn)),
                Err(e) => {
                    let mut state = self.shared.state.lock().await;
                    state.created -= 1;
                    state.outstanding -= 1;
                    Err(RedisClientError::Connect(e))
                }
            };
        }

        // At capacity with nothing idle: join the FIFO queue and suspend
        // until `release` hands us a connection (or the pool drains).
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        drop(state);
        match rx.await {
            Ok(Some(conn)) => Ok(PooledConnection::new(self.shared.clone(), conn)),
            // `Ok(None)` means `drain` woke us; `Err` means our receiver was
            // dropped without ever being sent to, which `release` only does
            // while draining. Either way no connection was ever allocated to
            // us, so nothing leaks.
            Ok(None) | Err(_) => Err(RedisClientError::PoolClosed),
        }
    }

    /// Mark the pool closed, wake every still-queued waiter with
    /// `PoolClosed`, close every idle connection, then wait for every
    /// connection still checked out to be returned (and closed — see
    /// `Shared::release`) before returning. Idempotent.
    #[instrument(skip(self))]
    pub async fn drain(&self) {
        let (idle, waiters) = {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };
        for waiter in waiters {
            let _ = waiter.send(None);
        }
        for mut conn in idle {
            conn.close().await;
        }
        loop {
            let drained = self.shared.drained.notified();
            if self.shared.state.lock().await.outstanding == 0 {
                break;
            }
            drained.await;
        }
        debug!("pool drained");
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }
}

impl Shared {
    /// Return a connection that a `PooledConnection` just dropped. Hands it
    /// straight to the head FIFO waiter when one is queued, mints a
    /// replacement for that waiter if the returned connection was poisoned,
    /// or otherwise parks it in `idle`. If the pool has been drained in the
    /// meantime, the connection is closed instead of being reused — this is
    /// the other half of `drain`'s "wait for busy connections, then close
    /// them" guarantee.
    async fn release(&self, mut conn: Connection) {
        let mut state = self.state.lock().await;

        if state.closed {
            state.created -= 1;
            state.outstanding -= 1;
            drop(state);
            conn.close().await;
            let state = self.state.lock().await;
            self.notify_if_drained(&state);
            return;
        }

        let mut reusable = if conn.is_closed() {
            state.created -= 1;
            None
        } else {
            Some(conn)
        };
        // This connection is no longer held by its previous owner. If it's
        // handed straight to a waiter below, outstanding goes back up by one
        // — net unchanged, since it's still checked out, just by someone else.
        state.outstanding -= 1;

        while let Some(tx) = state.waiters.pop_front() {
            if reusable.is_none() {
                // The connection we released was poisoned (or a prior
                // handoff attempt below failed); mint a fresh one for this
                // waiter instead of leaving it queued behind a slot that
                // will never free itself.
                state.created += 1;
                drop(state);
                let minted = (self.factory)().await;
                state = self.state.lock().await;
                match minted {
                    Ok(fresh) => reusable = Some(fresh),
                    Err(_) => {
                        state.created -= 1;
                        let _ = tx.send(None);
                        continue;
                    }
                }
            }

            let conn = reusable.take().expect("ensured Some above");
            // `oneshot::Sender::send` can itself race a concurrent
            // `acquire().await` cancellation: `is_closed()` doesn't rule out
            // the receiver being dropped between a check and the send
            // landing. Treat a failed send as "try the next waiter", not
            // "drop the connection" — otherwise a cancelled waiter would
            // leak a live connection and permanently shrink the pool.
            match tx.send(Some(conn)) {
                Ok(()) => {
                    state.outstanding += 1;
                    return;
                }
                Err(Some(conn)) => reusable = Some(conn),
                Err(None) => unreachable!("this call site only ever sends Some(..)"),
            }
        }

        if let Some(conn) = reusable {
            state.idle.push(conn);
        }
        self.notify_if_drained(&state);
    }

    fn notify_if_drained(&self, state: &State) {
        if state.closed && state.outstanding == 0 {
            self.drained.notify_waiters();
        }
    }
}

/// A connection on loan from a [`Pool`]. Returns the connection to the pool
/// when dropped; a poisoned connection is closed and its capacity slot
/// freed instead of being returned to the idle set.
pub struct PooledConnection {
    pool: Arc<Shared>,
    connection: Option<Connection>,
}

impl PooledConnection {
    fn new(pool: Arc<Shared>, connection: Connection) -> PooledConnection {
        PooledConnection {
            pool,
            connection: Some(connection),
        }
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.connection.as_ref().expect("connection taken only by Drop")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().expect("connection taken only by Drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.release(conn).await;
            });
        }
    }
}
