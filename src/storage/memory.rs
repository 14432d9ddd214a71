//! In-memory store implementation
//!
//! Every key carries a version number that is bumped on each write. A
//! transaction reads under one lock acquisition and commits under another,
//! checking that the versions it observed are unchanged, so concurrent
//! transactions genuinely conflict and retry the way they do against Redis.

use crate::storage::traits::{
    Store, StoreError, StoreResult, StoreView, TxnBody, WriteOp, MAX_TXN_ATTEMPTS,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

/// A sorted set ordered by (score, member)
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn range(&self, min: i64, max: i64, limit: usize) -> Vec<String> {
        self.ordered
            .iter()
            .skip_while(|(score, _)| *score < min)
            .take_while(|(score, _)| *score <= max)
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Vec<u8>>,
    sets: HashMap<String, SortedSet>,
    versions: HashMap<String, u64>,
}

impl State {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn zrem(&mut self, set: &str, member: &str) -> bool {
        let removed = match self.sets.get_mut(set) {
            Some(sorted) => sorted.remove(member),
            None => false,
        };
        if removed {
            if self.sets.get(set).map_or(false, |s| s.len() == 0) {
                self.sets.remove(set);
            }
            self.bump(set);
        }
        removed
    }

    fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::Set { key, value } => {
                self.values.insert(key.clone(), value.clone());
                self.bump(key);
            }
            WriteOp::Delete { key } => {
                let had_value = self.values.remove(key).is_some();
                let had_set = self.sets.remove(key).is_some();
                if had_value || had_set {
                    self.bump(key);
                }
            }
            WriteOp::ZAdd { set, member, score } => {
                self.sets.entry(set.clone()).or_default().insert(member, *score);
                self.bump(set);
            }
            WriteOp::ZRem { set, member } => {
                self.zrem(set, member);
            }
        }
    }
}

/// Read view over a locked state snapshot, recording what it observed
struct MemoryView<'a> {
    state: &'a State,
    observed: Vec<(String, u64)>,
}

impl MemoryView<'_> {
    fn observe(&mut self, key: &str) {
        if !self.observed.iter().any(|(k, _)| k == key) {
            self.observed.push((key.to_string(), self.state.version(key)));
        }
    }
}

impl StoreView for MemoryView<'_> {
    fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.observe(key);
        Ok(self.state.values.get(key).cloned())
    }

    fn zscore(&mut self, set: &str, member: &str) -> StoreResult<Option<i64>> {
        self.observe(set);
        Ok(self
            .state
            .sets
            .get(set)
            .and_then(|s| s.scores.get(member).copied()))
    }

    fn zrange_by_score(
        &mut self,
        set: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        self.observe(set);
        Ok(self
            .state
            .sets
            .get(set)
            .map(|s| s.range(min, max, limit))
            .unwrap_or_default())
    }
}

/// Process-local store, used for tests and single-process crawls
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.lock()?.apply(&WriteOp::set(key, value.to_vec()));
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lock()?.values.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.lock()?.apply(&WriteOp::delete(key));
        Ok(())
    }

    fn zadd(&self, set: &str, score: i64, member: &str) -> StoreResult<()> {
        self.lock()?.apply(&WriteOp::zadd(set, member, score));
        Ok(())
    }

    fn zrem(&self, set: &str, member: &str) -> StoreResult<bool> {
        Ok(self.lock()?.zrem(set, member))
    }

    fn zscore(&self, set: &str, member: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .lock()?
            .sets
            .get(set)
            .and_then(|s| s.scores.get(member).copied()))
    }

    fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()?
            .sets
            .get(set)
            .map(|s| s.range(min, max, limit))
            .unwrap_or_default())
    }

    fn zcard(&self, set: &str) -> StoreResult<u64> {
        Ok(self.lock()?.sets.get(set).map_or(0, |s| s.len() as u64))
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let state = self.lock()?;
        let mut keys: Vec<String> = state
            .values
            .keys()
            .chain(state.sets.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn atomically(&self, body: &mut TxnBody<'_>) -> StoreResult<()> {
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let (ops, observed) = {
                let state = self.lock()?;
                let mut view = MemoryView {
                    state: &state,
                    observed: Vec::new(),
                };
                let ops = body(&mut view)?;
                (ops, view.observed)
            };

            if ops.is_empty() {
                return Ok(());
            }

            let mut state = self.lock()?;
            if observed.iter().all(|(key, v)| state.version(key) == *v) {
                for op in &ops {
                    state.apply(op);
                }
                return Ok(());
            }

            tracing::trace!(attempt, "Memory store transaction conflict, retrying");
        }

        Err(StoreError::Unavailable(format!(
            "transaction still conflicting after {} attempts",
            MAX_TXN_ATTEMPTS
        )))
    }
}
