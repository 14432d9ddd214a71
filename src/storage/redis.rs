//! Redis store implementation
//!
//! Sorted sets and plain keys map directly onto Redis types. Transactions use
//! WATCH on every key read, then MULTI/EXEC for the writes; a nil EXEC reply
//! means a watched key changed and the body is run again.

use crate::storage::traits::{
    Store, StoreError, StoreResult, StoreView, TxnBody, WriteOp, MAX_TXN_ATTEMPTS,
};
use redis::{Client, Commands, Connection, RedisError};
use std::sync::Mutex;
use std::time::Duration;
use tracing::trace;

/// Read/write timeout applied to every pooled connection
const IO_TIMEOUT: Duration = Duration::from_secs(10);

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
            || err.is_io_error()
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Redis store backend
///
/// Holds a small pool of idle synchronous connections. A connection that hit
/// an error is discarded instead of being returned to the pool.
pub struct RedisStore {
    client: Client,
    idle: Mutex<Vec<Connection>>,
}

impl RedisStore {
    /// Connects to the Redis server at `url` (e.g. `redis://localhost:6379/0`)
    ///
    /// A first connection is opened eagerly so a bad address fails here rather
    /// than on the first queue operation.
    pub fn new(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let store = Self {
            client,
            idle: Mutex::new(Vec::new()),
        };
        store.with_conn(|conn| {
            let _: String = redis::cmd("PING").query(conn)?;
            Ok(())
        })?;
        Ok(store)
    }

    fn checkout(&self) -> StoreResult<Connection> {
        let pooled = self
            .idle
            .lock()
            .map_err(|_| StoreError::Backend("redis pool lock poisoned".to_string()))?
            .pop();

        match pooled {
            Some(conn) => Ok(conn),
            None => {
                let conn = self.client.get_connection()?;
                conn.set_read_timeout(Some(IO_TIMEOUT))?;
                conn.set_write_timeout(Some(IO_TIMEOUT))?;
                Ok(conn)
            }
        }
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.checkout()?;
        let result = f(&mut conn);
        if result.is_ok() {
            self.checkin(conn);
        }
        result
    }

    /// One WATCH/MULTI/EXEC round; `Ok(false)` means a watched key changed
    fn try_transaction(conn: &mut Connection, body: &mut TxnBody<'_>) -> StoreResult<bool> {
        let ops = {
            let mut view = RedisView { conn: &mut *conn };
            body(&mut view)?
        };

        if ops.is_empty() {
            let _: () = redis::cmd("UNWATCH").query(conn)?;
            return Ok(true);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                WriteOp::Set { key, value } => {
                    pipe.set(key, value.as_slice()).ignore();
                }
                WriteOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
                WriteOp::ZAdd { set, member, score } => {
                    pipe.zadd(set, member, *score).ignore();
                }
                WriteOp::ZRem { set, member } => {
                    pipe.zrem(set, member).ignore();
                }
            }
        }

        let committed: Option<()> = pipe.query(conn)?;
        Ok(committed.is_some())
    }
}

/// Watches each key before reading it
struct RedisView<'a> {
    conn: &'a mut Connection,
}

impl RedisView<'_> {
    fn watch(&mut self, key: &str) -> StoreResult<()> {
        let _: () = redis::cmd("WATCH").arg(key).query(self.conn)?;
        Ok(())
    }
}

impl StoreView for RedisView<'_> {
    fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.watch(key)?;
        let value: Option<Vec<u8>> = self.conn.get(key)?;
        Ok(value)
    }

    fn zscore(&mut self, set: &str, member: &str) -> StoreResult<Option<i64>> {
        self.watch(set)?;
        let score: Option<f64> = self.conn.zscore(set, member)?;
        Ok(score.map(|s| s as i64))
    }

    fn zrange_by_score(
        &mut self,
        set: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        self.watch(set)?;
        let members: Vec<String> =
            self.conn
                .zrangebyscore_limit(set, min, max, 0, limit as isize)?;
        Ok(members)
    }
}

impl Store for RedisStore {
    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.with_conn(|conn| {
            let _: () = conn.set(key, value)?;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            let value: Option<Vec<u8>> = conn.get(key)?;
            Ok(value)
        })
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let _: () = conn.del(key)?;
            Ok(())
        })
    }

    fn zadd(&self, set: &str, score: i64, member: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let _: () = conn.zadd(set, member, score)?;
            Ok(())
        })
    }

    fn zrem(&self, set: &str, member: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let removed: u64 = conn.zrem(set, member)?;
            Ok(removed > 0)
        })
    }

    fn zscore(&self, set: &str, member: &str) -> StoreResult<Option<i64>> {
        self.with_conn(|conn| {
            let score: Option<f64> = conn.zscore(set, member)?;
            Ok(score.map(|s| s as i64))
        })
    }

    fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let members: Vec<String> = conn.zrangebyscore_limit(set, min, max, 0, limit as isize)?;
            Ok(members)
        })
    }

    fn zcard(&self, set: &str) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let count: u64 = conn.zcard(set)?;
            Ok(count)
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let pattern = format!("{}*", escape_glob(prefix));
            let mut keys: Vec<String> = conn.scan_match::<_, String>(pattern)?.collect();
            keys.sort();
            keys.dedup();
            Ok(keys)
        })
    }

    fn atomically(&self, body: &mut TxnBody<'_>) -> StoreResult<()> {
        self.with_conn(|conn| {
            for attempt in 1..=MAX_TXN_ATTEMPTS {
                if Self::try_transaction(conn, body)? {
                    return Ok(());
                }
                trace!(attempt, "Redis transaction conflict, retrying");
            }

            Err(StoreError::Unavailable(format!(
                "transaction still conflicting after {} attempts",
                MAX_TXN_ATTEMPTS
            )))
        })
    }
}

/// Escapes Redis glob metacharacters so a prefix matches literally
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
