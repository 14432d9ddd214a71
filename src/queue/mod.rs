//! Crawl task queue
//!
//! The queue keeps at most one pending task per canonical URL, split into a
//! high-priority and a normal ready-set ordered by scheduled time. Admission
//! (`push`) and claiming (`pop`) each run as a single optimistic transaction
//! against the [`Store`], so any number of workers and processes can share
//! one queue.
//!
//! # Key Layout
//!
//! - `{name}:todo:hp` / `{name}:todo:nn`: ready-sets, task ID scored by timestamp
//! - `{name}:task:{id}`: task body (JSON), `id` is the SHA-256 of the body
//! - `{name}:taskbyurl:{urlhash}`: the pending task for a URL
//! - `{name}:urlts:{urlhash}`: when the URL was last popped

mod keys;
mod task;

pub use keys::sha256_hex;
pub use task::{Inherited, InvalidTaskError, Method, Task, TaskBuilder, DEFAULT_MIN_AGE_SECS};

use crate::storage::{Store, StoreError, StoreResult, StoreView, WriteOp};
use crate::url::{Canonicalizer, IdentityCanonicalizer};
use chrono::Utc;
use keys::QueueKeys;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that can occur during queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// No task is ready; poll again later
    #[error("Queue is empty")]
    Empty,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Returns true if the operation may succeed when tried again later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Store(e) => e.is_retryable(),
            Self::Serialization(_) => false,
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// What `push` did with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Nothing was pending for the URL; the task was enqueued
    Enqueued,
    /// A pending task was evicted and the pushed one enqueued
    Replaced,
    /// A high-priority task is pending for the URL; the push was discarded
    Shielded,
    /// The pending task is scheduled no later; the push was discarded
    Superseded,
}

impl PushOutcome {
    pub fn was_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued | Self::Replaced)
    }
}

/// Number of tasks in each ready-set, whether due yet or not
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub priority_ready: u64,
    pub normal_ready: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.priority_ready + self.normal_ready
    }
}

/// Dedup index value: the pending task for a URL
#[derive(Debug, Serialize, Deserialize)]
struct DedupEntry {
    id: String,
    high_priority: bool,
}

/// A task ready to be written: its ID, body and dedup entry
struct Encoded {
    id: String,
    body: Vec<u8>,
    dedup: Vec<u8>,
}

fn encode(task: &Task) -> serde_json::Result<Encoded> {
    let body = serde_json::to_vec(task)?;
    let id = sha256_hex(&body);
    let dedup = serde_json::to_vec(&DedupEntry {
        id: id.clone(),
        high_priority: task.high_priority(),
    })?;
    Ok(Encoded { id, body, dedup })
}

fn read_dedup(view: &mut dyn StoreView, key: &str) -> StoreResult<Option<DedupEntry>> {
    let Some(raw) = view.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_slice(&raw) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            warn!(key = %key, error = %e, "Ignoring undecodable dedup entry");
            Ok(None)
        }
    }
}

fn read_timestamp(view: &mut dyn StoreView, key: &str) -> StoreResult<Option<i64>> {
    let Some(raw) = view.get(key)? else {
        return Ok(None);
    };
    let parsed = std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok());
    if parsed.is_none() {
        warn!(key = %key, "Ignoring undecodable last-crawl timestamp");
    }
    Ok(parsed)
}

/// A named task queue over a shared store
pub struct Queue {
    name: String,
    keys: QueueKeys,
    store: Arc<dyn Store>,
    canonicalizer: Arc<dyn Canonicalizer>,
}

impl Queue {
    /// Creates a queue whose keys all live under `{name}:` in `store`
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>) -> Self {
        let name = name.into();
        Self {
            keys: QueueKeys::new(&name),
            name,
            store,
            canonicalizer: Arc::new(IdentityCanonicalizer),
        }
    }

    /// Replaces the URL canonicalizer used for dedup (identity by default)
    pub fn with_canonicalizer(mut self, canonicalizer: Arc<dyn Canonicalizer>) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn evict_ops(&self, entry: &DedupEntry) -> [WriteOp; 2] {
        [
            WriteOp::zrem(self.keys.ready_set(entry.high_priority), entry.id.as_str()),
            WriteOp::delete(self.keys.task(&entry.id)),
        ]
    }

    fn enqueue_ops(&self, task: &Task, encoded: Encoded, dedup_key: &str) -> [WriteOp; 3] {
        [
            WriteOp::set(self.keys.task(&encoded.id), encoded.body),
            WriteOp::set(dedup_key, encoded.dedup),
            WriteOp::zadd(
                self.keys.ready_set(task.high_priority()),
                encoded.id,
                task.scheduled_timestamp(),
            ),
        ]
    }

    /// Admits a task, applying priority, dedup and min-age rules
    ///
    /// The dedup lookup and the resulting writes commit as one transaction;
    /// a concurrent change to any key consulted re-runs the whole decision.
    ///
    /// # Decision Order
    ///
    /// 1. High-priority tasks evict whatever is pending for the URL
    /// 2. A pending high-priority task shields its URL from normal pushes
    /// 3. Otherwise the task is delayed to `last_crawl + min_age` and the
    ///    earlier of it and the pending task is kept (ties keep the pending one)
    pub fn push(&self, task: Task) -> QueueResult<PushOutcome> {
        let canonical = self.canonicalizer.canonicalize(task.url());
        let dedup_key = self.keys.dedup(&canonical);
        let last_crawl_key = self.keys.last_crawl(&canonical);

        let mut outcome = PushOutcome::Enqueued;
        let mut scheduled = task.scheduled_timestamp();
        let mut encode_error = None;

        self.store.atomically(&mut |view| {
            encode_error = None;
            let existing = read_dedup(view, &dedup_key)?;

            if task.high_priority() {
                let encoded = match encode(&task) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        encode_error = Some(e);
                        return Ok(Vec::new());
                    }
                };

                let mut ops = Vec::new();
                if let Some(entry) = &existing {
                    ops.extend(self.evict_ops(entry));
                }
                ops.extend(self.enqueue_ops(&task, encoded, &dedup_key));

                outcome = if existing.is_some() {
                    PushOutcome::Replaced
                } else {
                    PushOutcome::Enqueued
                };
                scheduled = task.scheduled_timestamp();
                return Ok(ops);
            }

            let mut ops = Vec::new();
            let mut existing = existing;
            if let Some(entry) = existing.as_ref().filter(|entry| entry.high_priority) {
                if view.zscore(self.keys.ready_set(true), &entry.id)?.is_some() {
                    outcome = PushOutcome::Shielded;
                    return Ok(Vec::new());
                }
                // Priority entry outlived its ready-set member; no longer shields
                ops.push(WriteOp::delete(self.keys.task(&entry.id)));
                existing = None;
            }

            let mut candidate = task.clone();
            if let Some(min_age) = candidate.min_age() {
                if let Some(last) = read_timestamp(view, &last_crawl_key)? {
                    let min_age = i64::try_from(min_age).unwrap_or(i64::MAX);
                    let earliest = last.saturating_add(min_age);
                    if candidate.scheduled_timestamp() < earliest {
                        candidate.set_scheduled_timestamp(earliest);
                    }
                }
            }
            scheduled = candidate.scheduled_timestamp();
            outcome = PushOutcome::Enqueued;

            if let Some(entry) = &existing {
                match view.zscore(self.keys.ready_set(false), &entry.id)? {
                    Some(pending_at) if pending_at <= candidate.scheduled_timestamp() => {
                        outcome = PushOutcome::Superseded;
                        return Ok(Vec::new());
                    }
                    Some(_) => {
                        outcome = PushOutcome::Replaced;
                        ops.extend(self.evict_ops(entry));
                    }
                    // Entry outlived its ready-set member; clean up the body
                    None => ops.push(WriteOp::delete(self.keys.task(&entry.id))),
                }
            }

            match encode(&candidate) {
                Ok(encoded) => ops.extend(self.enqueue_ops(&candidate, encoded, &dedup_key)),
                Err(e) => {
                    encode_error = Some(e);
                    return Ok(Vec::new());
                }
            }
            Ok(ops)
        })?;

        if let Some(e) = encode_error {
            return Err(e.into());
        }

        debug!(
            queue = %self.name,
            url = %task.url(),
            high_priority = task.high_priority(),
            scheduled,
            outcome = ?outcome,
            "Push"
        );

        Ok(outcome)
    }

    /// Claims the next due task, high-priority first
    ///
    /// Returns `QueueError::Empty` when nothing is due.
    pub fn pop(&self) -> QueueResult<Task> {
        self.pop_at(Utc::now().timestamp())
    }

    /// Like [`pop`](Self::pop) with an explicit cutoff (epoch seconds)
    pub fn pop_at(&self, now: i64) -> QueueResult<Task> {
        for high_priority in [true, false] {
            if let Some(task) = self.claim(high_priority, now)? {
                self.schedule_successor(&task, now);
                return Ok(task);
            }
        }
        Err(QueueError::Empty)
    }

    /// Removes the earliest due entry of one ready-set, with its body and dedup entry
    fn claim(&self, high_priority: bool, now: i64) -> QueueResult<Option<Task>> {
        let set = self.keys.ready_set(high_priority);

        loop {
            let mut claimed = None;
            let mut dropped: Option<(String, &'static str)> = None;

            self.store.atomically(&mut |view| {
                claimed = None;
                dropped = None;

                let Some(id) = view.zrange_by_score(set, i64::MIN, now, 1)?.into_iter().next()
                else {
                    return Ok(Vec::new());
                };

                let task_key = self.keys.task(&id);
                let task = match view.get(&task_key)? {
                    Some(body) => match serde_json::from_slice::<Task>(&body) {
                        Ok(task) => Some(task),
                        Err(_) => {
                            dropped = Some((id.clone(), "undecodable body"));
                            None
                        }
                    },
                    None => {
                        dropped = Some((id.clone(), "missing body"));
                        None
                    }
                };

                let mut ops = vec![WriteOp::zrem(set, id.as_str()), WriteOp::delete(task_key)];
                let Some(task) = task else {
                    return Ok(ops);
                };

                let canonical = self.canonicalizer.canonicalize(task.url());
                let dedup_key = self.keys.dedup(&canonical);
                if let Some(entry) = read_dedup(view, &dedup_key)? {
                    if entry.id == id {
                        ops.push(WriteOp::delete(dedup_key));
                    }
                }
                ops.push(WriteOp::set(self.keys.last_crawl(&canonical), now.to_string()));

                claimed = Some(task);
                Ok(ops)
            })?;

            if let Some(task) = claimed {
                debug!(
                    queue = %self.name,
                    url = %task.url(),
                    high_priority,
                    "Claimed task"
                );
                return Ok(Some(task));
            }

            match dropped {
                Some((id, reason)) => {
                    warn!(queue = %self.name, id = %id, reason, "Dropped unusable ready entry");
                }
                None => return Ok(None),
            }
        }
    }

    fn schedule_successor(&self, task: &Task, now: i64) {
        let Some(next) = task.successor(now) else {
            return;
        };

        let due = next.scheduled_timestamp();
        match self.push(next) {
            Ok(outcome) => {
                debug!(queue = %self.name, url = %task.url(), due, outcome = ?outcome, "Scheduled repeat")
            }
            Err(e) => {
                error!(queue = %self.name, url = %task.url(), error = %e, "Failed to schedule repeat")
            }
        }
    }

    /// The task currently pending for `url`, as stored (timestamp included)
    pub fn pending_task(&self, url: &str) -> QueueResult<Option<Task>> {
        let canonical = self.canonicalizer.canonicalize(url);
        let Some(raw) = self.store.get(&self.keys.dedup(&canonical))? else {
            return Ok(None);
        };
        let entry: DedupEntry = serde_json::from_slice(&raw)?;

        match self.store.get(&self.keys.task(&entry.id))? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }

    /// When `url` was last popped (epoch seconds)
    pub fn last_crawl(&self, url: &str) -> QueueResult<Option<i64>> {
        let canonical = self.canonicalizer.canonicalize(url);
        let raw = self.store.get(&self.keys.last_crawl(&canonical))?;
        Ok(raw
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|s| s.trim().parse().ok()))
    }

    pub fn stats(&self) -> QueueResult<QueueStats> {
        Ok(QueueStats {
            priority_ready: self.store.zcard(self.keys.ready_set(true))?,
            normal_ready: self.store.zcard(self.keys.ready_set(false))?,
        })
    }

    /// Deletes every key under this queue's prefix, returning how many were removed
    pub fn clear(&self) -> QueueResult<usize> {
        let keys = self.store.keys_with_prefix(self.keys.prefix())?;
        for key in &keys {
            self.store.delete(key)?;
        }
        info!(queue = %self.name, removed = keys.len(), "Cleared queue");
        Ok(keys.len())
    }
}
