//! End-to-end tests driving `Connection`/`Pipeline`/`Pool` against an
//! in-memory fake server over `tokio::io::duplex`, the same device the
//! teacher's own protocol tests use in place of a real socket.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use bytes::Bytes;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use redis_pipe::codec::{encode_value, Decoder};
use redis_pipe::{cmd, Connection, ConnectionInfo, Pool, Value};

/// Bring up a `tracing` subscriber once per test binary so the spans on
/// `Connection`/`Pipeline`/`Pool` are visible with `--nocapture` (filtered
/// via `RUST_LOG`, as usual for `tracing-subscriber`); tests never assert on
/// log output, this is purely so a failure is debuggable.
static INIT_TRACING: Once = Once::new();

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

enum Stored {
    Str(Bytes),
    List(VecDeque<Bytes>),
}

#[derive(Default)]
struct FakeStore {
    data: HashMap<Vec<u8>, Stored>,
}

impl FakeStore {
    fn dispatch(&mut self, args: &[Bytes]) -> Value {
        let verb = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match verb.as_str() {
            "PING" => Value::ok(),
            "AUTH" | "SELECT" => Value::ok(),
            "SET" => {
                self.data.insert(args[1].to_vec(), Stored::Str(args[2].clone()));
                Value::ok()
            }
            "GET" => match self.data.get(args[1].as_ref()) {
                Some(Stored::Str(s)) => Value::BulkString(s.clone()),
                _ => Value::Nil,
            },
            "INCR" => {
                let key = args[1].to_vec();
                let current = match self.data.get(&key) {
                    Some(Stored::Str(s)) => std::str::from_utf8(s)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .unwrap_or(0),
                    _ => 0,
                };
                let next = current + 1;
                self.data
                    .insert(key, Stored::Str(Bytes::from(next.to_string())));
                Value::Integer(next)
            }
            "LPUSH" | "RPUSH" => {
                let key = args[1].to_vec();
                let entry = self
                    .data
                    .entry(key)
                    .or_insert_with(|| Stored::List(VecDeque::new()));
                match entry {
                    Stored::List(list) => {
                        for v in &args[2..] {
                            if verb == "LPUSH" {
                                list.push_front(v.clone());
                            } else {
                                list.push_back(v.clone());
                            }
                        }
                        Value::Integer(list.len() as i64)
                    }
                    Stored::Str(_) => Value::Error(Bytes::from_static(
                        b"WRONGTYPE Operation against a key holding the wrong kind of value",
                    )),
                }
            }
            "LRANGE" => {
                let key = args[1].to_vec();
                let start: i64 = std::str::from_utf8(&args[2]).unwrap().parse().unwrap();
                let stop: i64 = std::str::from_utf8(&args[3]).unwrap().parse().unwrap();
                match self.data.get(&key) {
                    Some(Stored::List(list)) => {
                        let len = list.len() as i64;
                        let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
                        let s = norm(start).min(len);
                        let e = norm(stop).min(len.saturating_sub(1));
                        if len == 0 || s > e {
                            Value::Array(Vec::new())
                        } else {
                            Value::Array(
                                list.iter()
                                    .skip(s as usize)
                                    .take((e - s + 1) as usize)
                                    .map(|b| Value::BulkString(b.clone()))
                                    .collect(),
                            )
                        }
                    }
                    _ => Value::Array(Vec::new()),
                }
            }
            _ => Value::Error(Bytes::from_static(b"ERR unknown command")),
        }
    }
}

/// Drive one fake-server connection until the client half is dropped.
/// Supports `MULTI`/`EXEC` queuing on top of the single-command dispatch
/// above, enough to exercise pipelines, transactions, and pooling.
async fn run_fake_server(mut stream: DuplexStream) {
    let mut store = FakeStore::default();
    let mut read_buf = BytesMut::with_capacity(4096);
    let mut write_buf = BytesMut::new();
    let mut in_transaction = false;
    let mut queued: Vec<Vec<Bytes>> = Vec::new();

    loop {
        loop {
            match Decoder::try_parse_one(&mut read_buf) {
                Ok(Some(Value::Array(items))) => {
                    let args: Vec<Bytes> = items
                        .into_iter()
                        .map(|v| match v {
                            Value::BulkString(b) => b,
                            _ => Bytes::new(),
                        })
                        .collect();
                    let verb = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
                    let reply = if verb == "MULTI" {
                        in_transaction = true;
                        queued.clear();
                        Value::ok()
                    } else if verb == "EXEC" && in_transaction {
                        in_transaction = false;
                        let results = queued.drain(..).map(|c| store.dispatch(&c)).collect();
                        Value::Array(results)
                    } else if in_transaction {
                        queued.push(args);
                        Value::queued()
                    } else {
                        store.dispatch(&args)
                    };
                    encode_value(&reply, &mut write_buf);
                }
                Ok(Some(_)) => unreachable!("a client only ever sends Array frames"),
                Ok(None) => break,
                Err(_) => return,
            }
        }
        if !write_buf.is_empty() {
            if stream.write_all(&write_buf).await.is_err() {
                return;
            }
            write_buf.clear();
        }
        match stream.read_buf(&mut read_buf).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

async fn connected_pair() -> Connection {
    init_tracing();
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(run_fake_server(server));
    Connection::from_stream(client, &ConnectionInfo::default())
        .await
        .expect("handshake against the fake server should never fail")
}

#[tokio::test]
async fn set_then_get_roundtrips_a_value() {
    let mut conn = connected_pair().await;
    let set_reply = conn.execute_one(cmd::set("hello", "world")).await.unwrap();
    assert!(set_reply.is_ok());
    let get_reply = conn.execute_one(cmd::get("hello")).await.unwrap();
    assert_eq!(get_reply.as_bulk_string(), Some(b"world".as_slice()));
}

#[tokio::test]
async fn pipelined_set_then_get_over_many_keys_preserves_order() {
    let mut conn = connected_pair().await;
    const N: usize = 1000;

    let mut sets = conn.pipeline().unwrap();
    for i in 0..N {
        sets.command(cmd::set(format!("k{i}"), format!("v{i}")));
    }
    let set_replies = sets.execute(true).await.unwrap();
    assert!(set_replies.is_empty(), "ignore_results must return no values");

    let mut gets = conn.pipeline().unwrap();
    for i in 0..N {
        gets.command(cmd::get(format!("k{i}")));
    }
    let get_replies = gets.execute(false).await.unwrap();
    assert_eq!(get_replies.len(), N);
    for (i, reply) in get_replies.iter().enumerate() {
        let expected = format!("v{i}");
        assert_eq!(reply.as_bulk_string(), Some(expected.as_bytes()));
    }
}

#[tokio::test]
async fn transactional_pipeline_returns_exec_array_in_order() {
    let mut conn = connected_pair().await;
    let mut tx = conn.transaction().unwrap();
    tx.command(cmd::incr("counter"));
    tx.command(cmd::incr("counter"));
    tx.command(cmd::incr("counter"));
    let replies = tx.execute(false).await.unwrap();
    assert_eq!(
        replies,
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
    );
}

#[tokio::test]
async fn get_on_a_missing_key_returns_nil() {
    let mut conn = connected_pair().await;
    let reply = conn.execute_one(cmd::get("does-not-exist")).await.unwrap();
    assert_eq!(reply, Value::Nil);
}

#[tokio::test]
async fn lpush_then_lrange_returns_reverse_insertion_order() {
    let mut conn = connected_pair().await;
    let mut pipe = conn.pipeline().unwrap();
    pipe.command(cmd::lpush(
        "list",
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ],
    ));
    pipe.command(cmd::lrange("list", 0, -1));
    let replies = pipe.execute(false).await.unwrap();
    assert_eq!(replies[0], Value::Integer(3));
    assert_eq!(
        replies[1],
        Value::Array(vec![
            Value::from("c"),
            Value::from("b"),
            Value::from("a"),
        ])
    );
}

#[tokio::test]
async fn zero_command_pipeline_executes_to_an_empty_result() {
    let mut conn = connected_pair().await;
    let mut pipe = conn.pipeline().unwrap();
    let replies = pipe.execute(false).await.unwrap();
    assert!(replies.is_empty());
}

#[tokio::test]
async fn single_command_pipeline_matches_execute_one_shape() {
    let mut conn = connected_pair().await;
    let mut pipe = conn.pipeline().unwrap();
    pipe.command(cmd::set("solo", "value"));
    let replies = pipe.execute(false).await.unwrap();
    assert_eq!(replies, vec![Value::ok()]);
}

#[tokio::test]
async fn appending_after_execute_is_a_usage_error() {
    let mut conn = connected_pair().await;
    let mut pipe = conn.pipeline().unwrap();
    pipe.command(cmd::set("a", "1"));
    pipe.execute(false).await.unwrap();
    pipe.command(cmd::set("b", "2"));
    let err = pipe.execute(false).await.unwrap_err();
    assert!(matches!(err, redis_pipe::RedisClientError::Usage(_)));
}

fn pool_factory(size: usize) -> Pool {
    init_tracing();
    Pool::with_factory(size, || async {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_fake_server(server));
        Connection::from_stream(client, &ConnectionInfo::default()).await
    })
}

#[tokio::test]
async fn pool_of_two_never_exceeds_two_outstanding_connections() {
    let pool = pool_factory(2);
    let outstanding = Arc::new(AtomicUsize::new(0));
    let max_outstanding = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        let outstanding = outstanding.clone();
        let max_outstanding = max_outstanding.clone();
        handles.push(tokio::spawn(async move {
            let mut conn = pool.acquire().await.unwrap();
            let now = outstanding.fetch_add(1, Ordering::SeqCst) + 1;
            max_outstanding.fetch_max(now, Ordering::SeqCst);

            let key = format!("key{i}");
            let mut pipe = conn.pipeline().unwrap();
            pipe.command(cmd::set(key.clone(), "v"));
            pipe.command(cmd::get(key));
            let replies = pipe.execute(false).await.unwrap();
            assert_eq!(replies[1].as_bulk_string(), Some(b"v".as_slice()));

            outstanding.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert!(max_outstanding.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn cancelling_a_queued_acquire_does_not_leak_the_connection() {
    // A pool of size 1 with its only connection already checked out means
    // the next `acquire()` genuinely joins `state.waiters` — with size 2
    // (as `pool_of_two_never_exceeds_two_outstanding_connections` uses) a
    // second acquire would just mint a fresh connection directly and never
    // touch the FIFO wait path at all.
    let pool = pool_factory(1);
    let held = pool.acquire().await.unwrap();

    let waiting_pool = pool.clone();
    let waiter = tokio::spawn(async move { waiting_pool.acquire().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Abort the queued waiter and release the only connection at nearly
    // the same instant: this races the waiter's cancellation against
    // `Shared::release`'s attempt to hand it that exact connection, which
    // is the scenario that must not leak it.
    waiter.abort();
    drop(held);
    let _ = waiter.await;

    // A handful of subsequent sequential acquires must all complete
    // promptly. If the race above ever dropped the released connection on
    // the floor instead of returning it to `idle` (or re-offering it to a
    // still-live waiter), this pool's one slot would be gone for good and
    // every later acquire would hang forever.
    for _ in 0..5 {
        let conn = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("acquire should not hang if the released connection wasn't leaked")
            .unwrap();
        drop(conn);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn drain_waits_for_the_busy_connection_before_returning() {
    let pool = pool_factory(1);
    let held = pool.acquire().await.unwrap();

    let draining_pool = pool.clone();
    let drain_task = tokio::spawn(async move {
        draining_pool.drain().await;
    });

    // `drain` must not resolve while the pool's only connection is still
    // checked out.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(
        !drain_task.is_finished(),
        "drain returned before the busy connection was released"
    );

    drop(held);
    tokio::time::timeout(Duration::from_secs(1), drain_task)
        .await
        .expect("drain should complete promptly once the busy connection is returned")
        .unwrap();

    // Once drained, the pool is permanently closed to new acquisitions.
    assert!(matches!(
        pool.acquire().await.unwrap_err(),
        redis_pipe::RedisClientError::PoolClosed
    ));
}
