//! Manages shared and exclusive locks on pages.
//!
//! The manager is a monitor: every public method takes the single mutex for
//! its whole duration, and blocked requests wait on the paired condition
//! variable in 50 ms slices so they can re-check grant conditions, maintain
//! the wait-for graph, and give up once the timeout is exceeded.

use crate::errors::{AbortReason, DbError};
use crate::transaction::{Permissions, TransactionId};
use crate::PageId;
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// How long a request may wait in total before it is aborted.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long a blocked request sleeps before re-checking grant conditions.
pub const LOCK_WAIT_GRANULARITY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct Lock {
    tid: TransactionId,
    perm: Permissions,
}

#[derive(Debug, Default)]
struct LockState {
    /// Every lock currently held, per page.
    lock_table: HashMap<PageId, Vec<Lock>>,
    /// Every page a transaction holds at least one lock on.
    txn_locks: HashMap<TransactionId, HashSet<PageId>>,
    /// Maps a blocked transaction to the holders it is waiting on.
    waits_for: HashMap<TransactionId, HashSet<TransactionId>>,
}

#[derive(Debug)]
pub struct LockManager {
    state: Mutex<LockState>,
    cvar: Condvar,
    timeout: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager::new()
    }
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> LockManager {
        LockManager {
            state: Mutex::new(LockState::default()),
            cvar: Condvar::new(),
            timeout,
        }
    }

    /// Acquires a page lock for the transaction, blocking until it can be
    /// granted. The request is aborted with [`DbError::TransactionAborted`]
    /// when it would close a cycle in the wait-for graph or when the total
    /// wait exceeds the timeout; the caller must then roll the transaction
    /// back.
    pub fn acquire_lock(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<(), DbError> {
        let start = Instant::now();
        let mut state = self.state.lock().unwrap();
        loop {
            if state.can_grant(tid, pid, perm) {
                state.grant(tid, pid, perm);
                state.remove_waiter(tid);
                return Ok(());
            }

            state.record_wait_edges(tid, pid);
            if state.has_cycle(tid) {
                crate::substrate_debug_log!(
                    "[LockManager::acquire_lock] deadlock: aborting {tid} waiting on {pid}"
                );
                state.remove_waiter(tid);
                self.cvar.notify_all();
                return Err(DbError::TransactionAborted(AbortReason::Deadlock));
            }

            let (guard, _) = self
                .cvar
                .wait_timeout(state, LOCK_WAIT_GRANULARITY)
                .unwrap();
            state = guard;

            if start.elapsed() > self.timeout {
                crate::substrate_debug_log!(
                    "[LockManager::acquire_lock] timeout: aborting {tid} waiting on {pid}"
                );
                state.remove_waiter(tid);
                return Err(DbError::TransactionAborted(AbortReason::Timeout));
            }
        }
    }

    /// Drops every lock the transaction holds on the page and wakes all
    /// waiters.
    pub fn release_lock(&self, tid: TransactionId, pid: PageId) {
        let mut state = self.state.lock().unwrap();
        state.release(tid, pid);
        self.cvar.notify_all();
    }

    /// Drops every lock the transaction holds anywhere.
    pub fn release_all_locks(&self, tid: TransactionId) {
        let mut state = self.state.lock().unwrap();
        let pages: Vec<PageId> = state
            .txn_locks
            .get(&tid)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();
        for pid in pages {
            state.release(tid, pid);
        }
        state.txn_locks.remove(&tid);
        state.remove_waiter(tid);
        self.cvar.notify_all();
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        let state = self.state.lock().unwrap();
        state
            .lock_table
            .get(&pid)
            .is_some_and(|locks| locks.iter().any(|l| l.tid == tid))
    }

    /// The locks currently held on a page. Intended for assertions and
    /// debugging, not for making locking decisions.
    pub fn locks_on(&self, pid: PageId) -> Vec<(TransactionId, Permissions)> {
        let state = self.state.lock().unwrap();
        state
            .lock_table
            .get(&pid)
            .map(|locks| locks.iter().map(|l| (l.tid, l.perm)).collect())
            .unwrap_or_default()
    }
}

impl LockState {
    fn can_grant(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> bool {
        let Some(locks) = self.lock_table.get(&pid) else {
            return true;
        };
        if locks.is_empty() {
            return true;
        }
        match perm {
            // A shared lock coexists with other shared locks; an exclusive
            // lock held by this same transaction also suffices.
            Permissions::ReadOnly => locks
                .iter()
                .all(|l| l.perm == Permissions::ReadOnly || l.tid == tid),
            // An exclusive lock needs the page to itself, except when this
            // transaction already holds the sole lock (upgrade in place).
            Permissions::ReadWrite => locks.len() == 1 && locks[0].tid == tid,
        }
    }

    fn grant(&mut self, tid: TransactionId, pid: PageId, perm: Permissions) {
        let locks = self.lock_table.entry(pid).or_default();
        if let Some(existing) = locks.iter_mut().find(|l| l.tid == tid) {
            if existing.perm == Permissions::ReadOnly && perm == Permissions::ReadWrite {
                existing.perm = Permissions::ReadWrite;
            }
        } else {
            locks.push(Lock { tid, perm });
        }
        self.txn_locks.entry(tid).or_default().insert(pid);
    }

    /// Points the waiter at every other holder of the page. Called only
    /// while the request is blocked, so every such holder is in its way.
    fn record_wait_edges(&mut self, tid: TransactionId, pid: PageId) {
        let holders: Vec<TransactionId> = self
            .lock_table
            .get(&pid)
            .map(|locks| {
                locks
                    .iter()
                    .map(|l| l.tid)
                    .filter(|holder| *holder != tid)
                    .collect()
            })
            .unwrap_or_default();
        let edges = self.waits_for.entry(tid).or_default();
        edges.clear();
        edges.extend(holders);
    }

    fn remove_waiter(&mut self, tid: TransactionId) {
        self.waits_for.remove(&tid);
        for edges in self.waits_for.values_mut() {
            edges.remove(&tid);
        }
    }

    fn has_cycle(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        self.dfs(start, start, &mut visited)
    }

    fn dfs(
        &self,
        start: TransactionId,
        current: TransactionId,
        visited: &mut HashSet<TransactionId>,
    ) -> bool {
        let Some(neighbours) = self.waits_for.get(&current) else {
            return false;
        };
        for &next in neighbours {
            if next == start {
                return true;
            }
            if visited.insert(next) && self.dfs(start, next, visited) {
                return true;
            }
        }
        false
    }

    fn release(&mut self, tid: TransactionId, pid: PageId) {
        if let Some(locks) = self.lock_table.get_mut(&pid) {
            locks.retain(|l| l.tid != tid);
            if locks.is_empty() {
                self.lock_table.remove(&pid);
            }
        }
        if let Some(pages) = self.txn_locks.get_mut(&tid) {
            pages.remove(&pid);
            if pages.is_empty() {
                self.txn_locks.remove(&tid);
            }
        }
    }
}
