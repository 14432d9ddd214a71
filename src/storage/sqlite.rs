//! SQLite store implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.
//! A single connection sits behind a mutex; transactions run inside an
//! immediate SQLite transaction, so the read phase and the writes are one
//! atomic unit even across processes sharing the database file.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Store, StoreError, StoreResult, StoreView, TxnBody, WriteOp};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// SQLite store backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a store at the given path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".to_string()))
    }
}

fn read_value(conn: &Connection, key: &str) -> StoreResult<Option<Vec<u8>>> {
    Ok(conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?)
}

fn read_score(conn: &Connection, set: &str, member: &str) -> StoreResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT score FROM zset_members WHERE set_key = ?1 AND member = ?2",
            params![set, member],
            |row| row.get(0),
        )
        .optional()?)
}

fn read_range(
    conn: &Connection,
    set: &str,
    min: i64,
    max: i64,
    limit: usize,
) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT member FROM zset_members
         WHERE set_key = ?1 AND score >= ?2 AND score <= ?3
         ORDER BY score, member
         LIMIT ?4",
    )?;

    let members = stmt
        .query_map(params![set, min, max, limit as i64], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(members)
}

fn remove_member(conn: &Connection, set: &str, member: &str) -> StoreResult<bool> {
    let changed = conn.execute(
        "DELETE FROM zset_members WHERE set_key = ?1 AND member = ?2",
        params![set, member],
    )?;
    Ok(changed > 0)
}

fn apply_op(conn: &Connection, op: &WriteOp) -> StoreResult<()> {
    match op {
        WriteOp::Set { key, value } => {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        WriteOp::Delete { key } => {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            conn.execute("DELETE FROM zset_members WHERE set_key = ?1", params![key])?;
        }
        WriteOp::ZAdd { set, member, score } => {
            conn.execute(
                "INSERT INTO zset_members (set_key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(set_key, member) DO UPDATE SET score = excluded.score",
                params![set, member, score],
            )?;
        }
        WriteOp::ZRem { set, member } => {
            remove_member(conn, set, member)?;
        }
    }
    Ok(())
}

/// Reads inside an open SQLite transaction; isolation comes from the transaction
struct SqliteView<'a> {
    conn: &'a Connection,
}

impl StoreView for SqliteView<'_> {
    fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        read_value(self.conn, key)
    }

    fn zscore(&mut self, set: &str, member: &str) -> StoreResult<Option<i64>> {
        read_score(self.conn, set, member)
    }

    fn zrange_by_score(
        &mut self,
        set: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        read_range(self.conn, set, min, max, limit)
    }
}

impl Store for SqliteStore {
    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        apply_op(&*self.lock()?, &WriteOp::set(key, value.to_vec()))
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        read_value(&*self.lock()?, key)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        apply_op(&*self.lock()?, &WriteOp::delete(key))
    }

    fn zadd(&self, set: &str, score: i64, member: &str) -> StoreResult<()> {
        apply_op(&*self.lock()?, &WriteOp::zadd(set, member, score))
    }

    fn zrem(&self, set: &str, member: &str) -> StoreResult<bool> {
        remove_member(&*self.lock()?, set, member)
    }

    fn zscore(&self, set: &str, member: &str) -> StoreResult<Option<i64>> {
        read_score(&*self.lock()?, set, member)
    }

    fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        read_range(&*self.lock()?, set, min, max, limit)
    }

    fn zcard(&self, set: &str) -> StoreResult<u64> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM zset_members WHERE set_key = ?1",
            params![set],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1
             UNION
             SELECT DISTINCT set_key FROM zset_members WHERE substr(set_key, 1, length(?1)) = ?1
             ORDER BY 1",
        )?;

        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(keys)
    }

    fn atomically(&self, body: &mut TxnBody<'_>) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let ops = {
            let mut view = SqliteView { conn: &tx };
            body(&mut view)?
        };

        for op in &ops {
            apply_op(&tx, op)?;
        }

        tx.commit()?;
        Ok(())
    }
}
