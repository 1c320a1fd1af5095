//! Per-entity breakpoint reference counts
//!
//! Answers "does this function have any breakpoint" without scanning the
//! breakpoint table. Only the owning [`Tables`](super::table::Tables)
//! mutates it, once per insert or delete, under the same lock.

use std::collections::HashMap;

use super::{BreakCount, BreakCountKey};

#[derive(Debug, Default, Clone)]
pub struct BreakCounts {
    counts: HashMap<BreakCountKey, u32>,
}

impl BreakCounts {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counts: HashMap::with_capacity(capacity),
        }
    }

    /// Count one more breakpoint against `key`
    pub fn increment(&mut self, key: BreakCountKey) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Count one fewer breakpoint against `key`, dropping the entry at zero
    pub fn decrement(&mut self, key: BreakCountKey) {
        if let Some(count) = self.counts.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&key);
            }
        }
    }

    /// Current count for `key`, `None` when it has no breakpoints
    pub fn lookup(&self, key: &BreakCountKey) -> Option<u32> {
        self.counts.get(key).copied()
    }

    pub fn contains(&self, key: &BreakCountKey) -> bool {
        self.counts.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = BreakCount> + '_ {
        self.counts
            .iter()
            .map(|(key, count)| BreakCount { key: *key, count: *count })
    }

    pub(crate) fn try_reserve(&mut self, additional: usize) -> Result<(), std::collections::TryReserveError> {
        self.counts.try_reserve(additional)
    }
}
