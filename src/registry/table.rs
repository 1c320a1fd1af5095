//! Breakpoint tables
//!
//! [`Tables`] is one breakpoint table plus its BreakCount index. A process
//! owns its Local `Tables` outright; [`SharedRegistry`] wraps the Shared
//! `Tables` in a single reader/writer lock and a fixed capacity.

use std::collections::HashMap;

use parking_lot::{RwLock, RwLockReadGuard};

use super::breakcount::BreakCounts;
use super::{
    BreakCount, BreakCountKey, Breakpoint, BreakpointData, BreakpointKey, DeleteOutcome,
    InsertOutcome, Scope, UpsertOutcome,
};
use crate::common::{Error, Result};

/// Initial size of a process-local table
const LOCAL_TABLE_SIZE: usize = 128;

/// A breakpoint table and its BreakCount index, always mutated together
#[derive(Debug, Default)]
pub struct Tables {
    breakpoints: HashMap<BreakpointKey, BreakpointData>,
    counts: BreakCounts,
    capacity: Option<usize>,
}

impl Tables {
    /// Unbounded table for a single process
    pub fn local() -> Self {
        Self {
            breakpoints: HashMap::with_capacity(LOCAL_TABLE_SIZE),
            counts: BreakCounts::with_capacity(LOCAL_TABLE_SIZE),
            capacity: None,
        }
    }

    /// Table holding at most `capacity` breakpoints, with storage reserved up front
    pub fn bounded(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "shared breakpoint table needs a capacity of at least 1".to_string(),
            ));
        }

        let mut tables = Self {
            capacity: Some(capacity),
            ..Self::default()
        };
        tables
            .breakpoints
            .try_reserve(capacity)
            .map_err(|e| Error::Internal(format!("could not reserve breakpoint table: {}", e)))?;
        tables
            .counts
            .try_reserve(capacity)
            .map_err(|e| Error::Internal(format!("could not reserve breakcount table: {}", e)))?;

        Ok(tables)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn lookup(&self, key: &BreakpointKey) -> Option<Breakpoint> {
        self.breakpoints
            .get(key)
            .map(|data| Breakpoint { key: *key, data: *data })
    }

    pub fn has_any(&self, entity: &BreakCountKey) -> bool {
        self.counts.contains(entity)
    }

    pub fn count(&self, entity: &BreakCountKey) -> Option<u32> {
        self.counts.lookup(entity)
    }

    fn ensure_room(&self) -> Result<()> {
        match self.capacity {
            Some(capacity) if self.breakpoints.len() >= capacity => {
                Err(Error::RegistryFull { capacity })
            }
            _ => Ok(()),
        }
    }

    /// Add a breakpoint unless its key is taken; a new entry is never busy
    pub fn insert(&mut self, key: BreakpointKey, data: BreakpointData) -> Result<InsertOutcome> {
        if self.breakpoints.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        self.ensure_room()?;

        self.breakpoints.insert(key, BreakpointData { busy: false, ..data });
        self.counts.increment(key.entity());
        Ok(InsertOutcome::Inserted)
    }

    /// Overwrite an existing entry's data wholesale, or insert it
    pub fn insert_or_update(
        &mut self,
        key: BreakpointKey,
        data: BreakpointData,
    ) -> Result<UpsertOutcome> {
        if let Some(existing) = self.breakpoints.get_mut(&key) {
            *existing = data;
            return Ok(UpsertOutcome::Updated);
        }

        self.insert(key, data)?;
        Ok(UpsertOutcome::Inserted)
    }

    pub fn delete(&mut self, key: &BreakpointKey) -> DeleteOutcome {
        if self.breakpoints.remove(key).is_some() {
            self.counts.decrement(key.entity());
            DeleteOutcome::Removed
        } else {
            DeleteOutcome::NotFound
        }
    }

    /// Mark every breakpoint owned by `proxy_pid` busy and return them as
    /// they were before the mark
    pub fn mark_busy(&mut self, proxy_pid: i32) -> Vec<Breakpoint> {
        let mut marked = Vec::new();
        for (key, data) in self.breakpoints.iter_mut() {
            if data.proxy_pid == proxy_pid {
                marked.push(Breakpoint { key: *key, data: *data });
                data.busy = true;
            }
        }
        marked
    }

    /// Clear the busy mark on every breakpoint owned by `proxy_pid`
    pub fn free_session(&mut self, proxy_pid: i32) -> usize {
        let mut freed = 0;
        for data in self.breakpoints.values_mut() {
            if data.proxy_pid == proxy_pid {
                data.busy = false;
                freed += 1;
            }
        }
        freed
    }

    /// Remove every breakpoint owned by `proxy_pid`
    pub fn cleanup_for_proxy(&mut self, proxy_pid: i32) -> usize {
        let doomed: Vec<BreakpointKey> = self
            .breakpoints
            .iter()
            .filter(|(_, data)| data.proxy_pid == proxy_pid)
            .map(|(key, _)| *key)
            .collect();

        for key in &doomed {
            self.delete(key);
        }
        doomed.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Breakpoint> + '_ {
        self.breakpoints
            .iter()
            .map(|(key, data)| Breakpoint { key: *key, data: *data })
    }

    pub fn counts(&self) -> impl Iterator<Item = BreakCount> + '_ {
        self.counts.iter()
    }

    /// Dump every entry and count to the log
    pub fn show_all(&self, scope: Scope) {
        tracing::info!(%scope, entries = self.len(), "Breakpoint table");
        for bp in self.iter() {
            tracing::info!(
                database = bp.key.database_id,
                function = bp.key.function_id,
                line = bp.key.line_number,
                target = bp.key.target_pid,
                proxy_port = ?bp.data.proxy_port,
                proxy_pid = bp.data.proxy_pid,
                busy = bp.data.busy,
                temporary = bp.data.is_temporary,
                "Breakpoint"
            );
        }
        for count in self.counts() {
            tracing::info!(
                database = count.key.database_id,
                function = count.key.function_id,
                count = count.count,
                "BreakCount"
            );
        }
    }
}

/// The Shared table set: one lock for the table and its counts
#[derive(Debug)]
pub struct SharedRegistry {
    tables: RwLock<Tables>,
}

impl SharedRegistry {
    /// Create the table with a fixed capacity; failing here is a startup error
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            tables: RwLock::new(Tables::bounded(capacity)?),
        })
    }

    pub fn capacity(&self) -> usize {
        self.tables.read().capacity().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    pub fn lookup(&self, key: &BreakpointKey) -> Option<Breakpoint> {
        self.tables.read().lookup(key)
    }

    pub fn has_any(&self, entity: &BreakCountKey) -> bool {
        self.tables.read().has_any(entity)
    }

    pub fn count(&self, entity: &BreakCountKey) -> Option<u32> {
        self.tables.read().count(entity)
    }

    pub fn insert(&self, key: BreakpointKey, data: BreakpointData) -> Result<InsertOutcome> {
        self.tables.write().insert(key, data)
    }

    pub fn insert_or_update(&self, key: BreakpointKey, data: BreakpointData) -> Result<UpsertOutcome> {
        self.tables.write().insert_or_update(key, data)
    }

    pub fn delete(&self, key: &BreakpointKey) -> DeleteOutcome {
        self.tables.write().delete(key)
    }

    pub fn mark_busy(&self, proxy_pid: i32) -> Vec<Breakpoint> {
        self.tables.write().mark_busy(proxy_pid)
    }

    pub fn free_session(&self, proxy_pid: i32) -> usize {
        self.tables.write().free_session(proxy_pid)
    }

    pub fn cleanup_for_proxy(&self, proxy_pid: i32) -> usize {
        self.tables.write().cleanup_for_proxy(proxy_pid)
    }

    /// Iterate the table under the shared lock
    ///
    /// The lock is held until the scan is dropped. Do not call back into
    /// the registry while a scan is open: a queued writer would deadlock it.
    pub fn scan(&self) -> Scan<'_> {
        Scan {
            guard: self.tables.read(),
        }
    }

    /// Copy of every entry and count, taken under one read lock
    pub fn snapshot(&self) -> (Vec<Breakpoint>, Vec<BreakCount>) {
        let scan = self.scan();
        (scan.iter().collect(), scan.counts().collect())
    }

    pub fn show_all(&self) {
        self.scan().guard.show_all(Scope::Shared);
    }
}

/// An open scan of the Shared table; holds the read lock
pub struct Scan<'a> {
    guard: RwLockReadGuard<'a, Tables>,
}

impl Scan<'_> {
    pub fn iter(&self) -> impl Iterator<Item = Breakpoint> + '_ {
        self.guard.iter()
    }

    pub fn counts(&self) -> impl Iterator<Item = BreakCount> + '_ {
        self.guard.counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn key(function_id: u32, line_number: i32, target_pid: i32) -> BreakpointKey {
        BreakpointKey {
            database_id: 1,
            function_id,
            line_number,
            target_pid,
        }
    }

    fn data(proxy_pid: i32) -> BreakpointData {
        BreakpointData {
            proxy_port: Some(6000),
            proxy_pid,
            is_temporary: false,
            busy: false,
        }
    }

    /// Every BreakCount matches the number of entries for its entity
    fn assert_counts_consistent(tables: &Tables) {
        let mut expected: HashMap<BreakCountKey, u32> = HashMap::new();
        for bp in tables.iter() {
            *expected.entry(bp.key.entity()).or_default() += 1;
        }
        let actual: HashMap<BreakCountKey, u32> =
            tables.counts().map(|c| (c.key, c.count)).collect();
        assert_eq!(actual, expected);
        assert!(actual.values().all(|count| *count > 0));
    }

    #[test]
    fn test_insert_forces_not_busy() {
        let mut tables = Tables::local();
        let busy = BreakpointData {
            busy: true,
            ..data(1)
        };

        assert_eq!(tables.insert(key(100, 10, 7), busy).unwrap(), InsertOutcome::Inserted);
        assert!(!tables.lookup(&key(100, 10, 7)).unwrap().data.busy);
    }

    #[test]
    fn test_insert_duplicate_leaves_entry_alone() {
        let mut tables = Tables::local();
        tables.insert(key(100, 10, 7), data(1)).unwrap();

        assert_eq!(
            tables.insert(key(100, 10, 7), data(2)).unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(tables.lookup(&key(100, 10, 7)).unwrap().data.proxy_pid, 1);
        assert_eq!(tables.count(&key(100, 10, 7).entity()), Some(1));
    }

    #[test]
    fn test_insert_or_update_twice_keeps_one_entry() {
        let mut tables = Tables::local();
        let k = key(100, 10, 7);

        assert_eq!(tables.insert_or_update(k, data(3)).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(tables.insert_or_update(k, data(3)).unwrap(), UpsertOutcome::Updated);

        assert_eq!(tables.len(), 1);
        assert_eq!(tables.lookup(&k).unwrap().data, data(3));
        assert_eq!(tables.count(&k.entity()), Some(1));
    }

    #[test]
    fn test_update_overwrites_everything() {
        let mut tables = Tables::local();
        let k = key(100, 10, 7);
        tables.insert(k, data(3)).unwrap();

        let replacement = BreakpointData {
            proxy_port: None,
            proxy_pid: 9,
            is_temporary: true,
            busy: true,
        };
        tables.insert_or_update(k, replacement).unwrap();
        assert_eq!(tables.lookup(&k).unwrap().data, replacement);
    }

    #[test]
    fn test_delete_absent_is_not_found() {
        let mut tables = Tables::local();
        tables.insert(key(100, 10, 7), data(1)).unwrap();

        assert_eq!(tables.delete(&key(100, 11, 7)), DeleteOutcome::NotFound);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables.count(&key(100, 10, 7).entity()), Some(1));
    }

    #[test]
    fn test_counts_follow_inserts_and_deletes() {
        let mut tables = Tables::local();
        let keys = [
            key(100, 10, 7),
            key(100, 11, 7),
            key(100, -1, 7),
            key(200, 10, 7),
            key(100, 10, 8),
        ];

        for k in keys {
            tables.insert(k, data(1)).unwrap();
            assert_counts_consistent(&tables);
        }
        assert_eq!(tables.count(&key(100, 0, 0).entity()), Some(4));

        for k in keys.iter().rev() {
            tables.delete(k);
            tables.delete(k);
            assert_counts_consistent(&tables);
        }
        assert!(!tables.has_any(&key(100, 0, 0).entity()));
    }

    #[test]
    fn test_mark_busy_and_free_session() {
        let mut tables = Tables::local();
        tables.insert(key(100, 10, -1), data(1)).unwrap();
        tables.insert(key(100, 20, -1), data(1)).unwrap();
        tables.insert(key(300, 5, -1), data(2)).unwrap();

        let marked = tables.mark_busy(1);
        assert_eq!(marked.len(), 2);
        assert!(marked.iter().all(|bp| !bp.data.busy));
        assert!(tables.lookup(&key(100, 10, -1)).unwrap().data.busy);
        assert!(tables.lookup(&key(100, 20, -1)).unwrap().data.busy);
        assert!(!tables.lookup(&key(300, 5, -1)).unwrap().data.busy);

        assert_eq!(tables.free_session(1), 2);
        assert!(tables.iter().all(|bp| !bp.data.busy));
    }

    #[test]
    fn test_cleanup_for_proxy() {
        let mut tables = Tables::local();
        tables.insert(key(100, 10, -1), data(1)).unwrap();
        tables.insert(key(100, 20, -1), data(1)).unwrap();
        tables.insert(key(100, 30, -1), data(2)).unwrap();

        assert_eq!(tables.cleanup_for_proxy(1), 2);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables.count(&key(100, 0, 0).entity()), Some(1));
        assert_counts_consistent(&tables);
    }

    #[test]
    fn test_bounded_table_rejects_overflow() {
        let mut tables = Tables::bounded(2).unwrap();
        tables.insert(key(1, 1, -1), data(1)).unwrap();
        tables.insert(key(2, 1, -1), data(1)).unwrap();

        assert!(matches!(
            tables.insert(key(3, 1, -1), data(1)),
            Err(Error::RegistryFull { capacity: 2 })
        ));
        // A duplicate is still reported as such, not as overflow
        assert_eq!(
            tables.insert(key(1, 1, -1), data(1)).unwrap(),
            InsertOutcome::AlreadyExists
        );
        // Updating in place needs no room
        assert_eq!(
            tables.insert_or_update(key(1, 1, -1), data(4)).unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(tables.len(), 2);
        assert_counts_consistent(&tables);
    }

    #[test]
    fn test_zero_capacity_is_startup_error() {
        assert!(matches!(SharedRegistry::with_capacity(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_concurrent_insert_of_same_key() {
        let registry = Arc::new(SharedRegistry::with_capacity(20).unwrap());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|proxy_pid| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.insert(key(100, 10, -1), data(proxy_pid)).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<InsertOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(
            outcomes.iter().filter(|o| **o == InsertOutcome::Inserted).count(),
            1
        );
        assert_eq!(
            outcomes.iter().filter(|o| **o == InsertOutcome::AlreadyExists).count(),
            1
        );
        assert_eq!(registry.count(&key(100, 10, -1).entity()), Some(1));
    }

    #[test]
    fn test_scan_sees_everything() {
        let registry = SharedRegistry::with_capacity(8).unwrap();
        registry.insert(key(100, 10, -1), data(1)).unwrap();
        registry.insert(key(100, 20, -1), data(1)).unwrap();

        let scan = registry.scan();
        assert_eq!(scan.iter().count(), 2);
        assert_eq!(scan.counts().map(|c| c.count).sum::<u32>(), 2);
        drop(scan);

        // Lock is released; writers proceed
        assert_eq!(registry.delete(&key(100, 10, -1)), DeleteOutcome::Removed);
    }
}
