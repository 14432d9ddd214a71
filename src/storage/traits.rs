//! Store traits and error types
//!
//! This module defines the key/value + sorted-set contract the queue is built
//! on, the write operations a transaction may emit, and the store error type.

use thiserror::Error;

/// Upper bound on optimistic transaction attempts before giving up
pub const MAX_TXN_ATTEMPTS: u32 = 1_000;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or is temporarily busy; worth retrying
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the operation; retrying will not help
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored value could not be decoded
    #[error("Corrupt value under key {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl StoreError {
    /// Returns true if the caller should back off and try the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A single write applied as part of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
    ZAdd { set: String, member: String, score: i64 },
    ZRem { set: String, member: String },
}

impl WriteOp {
    pub fn set(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn zadd(set: impl Into<String>, member: impl Into<String>, score: i64) -> Self {
        Self::ZAdd {
            set: set.into(),
            member: member.into(),
            score,
        }
    }

    pub fn zrem(set: impl Into<String>, member: impl Into<String>) -> Self {
        Self::ZRem {
            set: set.into(),
            member: member.into(),
        }
    }
}

/// Read access inside a transaction
///
/// Every key read through a view is watched: the transaction's writes are
/// applied only if none of the keys read have changed since they were read.
pub trait StoreView {
    fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn zscore(&mut self, set: &str, member: &str) -> StoreResult<Option<i64>>;

    /// Members with `min <= score <= max`, lowest score first, at most `limit`
    fn zrange_by_score(
        &mut self,
        set: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>>;
}

/// Body of an optimistic transaction
///
/// The body reads through the view and returns the writes to apply. It may be
/// run several times; an empty write set ends the transaction without writing.
pub type TxnBody<'a> = dyn FnMut(&mut dyn StoreView) -> StoreResult<Vec<WriteOp>> + 'a;

/// Trait for queue store backends
///
/// Implementations must be safe to share between threads; all cross-worker
/// coordination happens through `atomically`.
pub trait Store: Send + Sync {
    // ===== Key/Value =====

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Deletes a key of any kind (value or sorted set)
    fn delete(&self, key: &str) -> StoreResult<()>;

    // ===== Sorted Sets =====

    fn zadd(&self, set: &str, score: i64, member: &str) -> StoreResult<()>;

    /// Removes a member, returning whether it was present
    fn zrem(&self, set: &str, member: &str) -> StoreResult<bool>;

    fn zscore(&self, set: &str, member: &str) -> StoreResult<Option<i64>>;

    /// Members with `min <= score <= max`, lowest score first, at most `limit`
    fn zrange_by_score(&self, set: &str, min: i64, max: i64, limit: usize)
        -> StoreResult<Vec<String>>;

    fn zcard(&self, set: &str) -> StoreResult<u64>;

    // ===== Housekeeping =====

    /// Lists every key (value or sorted set) starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    // ===== Transactions =====

    /// Runs `body` as an optimistic transaction
    ///
    /// The writes returned by `body` are applied atomically, and only if no key
    /// read through the view changed in the meantime. On conflict the body is
    /// run again from scratch, up to `MAX_TXN_ATTEMPTS` times.
    fn atomically(&self, body: &mut TxnBody<'_>) -> StoreResult<()>;
}
