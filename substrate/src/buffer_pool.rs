//! Manages the buffer pool, the bounded in-memory cache that mediates all
//! page access.
//!
//! Every page fetch first acquires the page's lock, so the pool is also the
//! gate through which two-phase locking is enforced. Eviction is LRU over
//! clean pages only: dirty pages are pinned in memory until their
//! transaction completes (NO STEAL).

use crate::catalog::Catalog;
use crate::errors::DbError;
use crate::heap_page::HeapPage;
use crate::lock_manager::LockManager;
use crate::transaction::{Permissions, TransactionId};
use crate::tuple::Tuple;
use crate::PageId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Default number of pages the pool holds.
pub const DEFAULT_PAGES: usize = 50;

/// A shared handle to a cached page. Readers take the read half; mutators
/// must hold the page's exclusive lock before taking the write half.
pub type PageRef = Arc<RwLock<HeapPage>>;

#[derive(Debug, Default)]
struct PoolState {
    cache: HashMap<PageId, PageRef>,
    /// Access order, least recently used at the front.
    lru: VecDeque<PageId>,
}

impl PoolState {
    fn touch(&mut self, pid: PageId) {
        self.lru.retain(|p| *p != pid);
        self.lru.push_back(pid);
    }

    fn forget(&mut self, pid: PageId) {
        self.cache.remove(&pid);
        self.lru.retain(|p| *p != pid);
    }
}

#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    state: Mutex<PoolState>,
    lock_manager: LockManager,
}

impl BufferPool {
    pub fn new(capacity: usize) -> BufferPool {
        BufferPool {
            capacity,
            state: Mutex::new(PoolState::default()),
            lock_manager: LockManager::new(),
        }
    }

    /// A pool whose lock manager aborts waiters after the given timeout.
    pub fn with_lock_timeout(capacity: usize, timeout: Duration) -> BufferPool {
        BufferPool {
            capacity,
            state: Mutex::new(PoolState::default()),
            lock_manager: LockManager::with_timeout(timeout),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Retrieves a page with the given permissions, blocking on (or
    /// aborting through) the lock manager first. A miss reads the page
    /// through the catalog's heap file, evicting a clean page when the
    /// pool is full.
    pub fn get_page(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PageRef, DbError> {
        self.lock_manager.acquire_lock(tid, pid, perm)?;

        let mut state = self.state.lock().unwrap();
        if let Some(page) = state.cache.get(&pid).cloned() {
            state.touch(pid);
            return Ok(page);
        }

        if state.cache.len() >= self.capacity {
            self.evict_one(catalog, &mut state)?;
        }

        let file = catalog.database_file(pid.table_id)?;
        let page = Arc::new(RwLock::new(file.read_page(pid)?));
        state.cache.insert(pid, Arc::clone(&page));
        state.touch(pid);
        Ok(page)
    }

    /// Evicts the least recently used clean page. Under NO STEAL a dirty
    /// page may never be written out mid-transaction, so if every cached
    /// page is dirty the pool is full for good and the caller gets
    /// [`DbError::BufferFull`].
    fn evict_one(&self, catalog: &Catalog, state: &mut PoolState) -> Result<(), DbError> {
        let victim = state.lru.iter().copied().find(|pid| {
            state
                .cache
                .get(pid)
                .is_some_and(|page| page.read().unwrap().is_dirty().is_none())
        });
        let Some(pid) = victim else {
            return Err(DbError::BufferFull);
        };
        crate::substrate_debug_log!("[BufferPool::evict_one] evicting clean page {pid}");
        self.flush_if_dirty(catalog, state, pid)?;
        state.forget(pid);
        Ok(())
    }

    fn flush_if_dirty(
        &self,
        catalog: &Catalog,
        state: &mut PoolState,
        pid: PageId,
    ) -> Result<(), DbError> {
        if let Some(page_ref) = state.cache.get(&pid) {
            let mut page = page_ref.write().unwrap();
            if page.is_dirty().is_some() {
                let file = catalog.database_file(pid.table_id)?;
                file.write_page(&page)?;
                page.mark_dirty(None);
            }
        }
        Ok(())
    }

    /// Adds a tuple to the table on behalf of the transaction. Pages
    /// touched by the heap file come back dirty and are (re)entered into
    /// the cache so later fetches see the update.
    pub fn insert_tuple(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        table_id: u32,
        tuple: &mut Tuple,
    ) -> Result<(), DbError> {
        let file = catalog.database_file(table_id)?;
        let pages = file.insert_tuple(self, catalog, tid, tuple)?;
        self.absorb_dirty(tid, pages);
        Ok(())
    }

    /// Removes the tuple named by its record id.
    pub fn delete_tuple(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<(), DbError> {
        let table_id = tuple
            .record_id()
            .ok_or(DbError::NotOnThisPage)?
            .pid
            .table_id;
        let file = catalog.database_file(table_id)?;
        let pages = file.delete_tuple(self, catalog, tid, tuple)?;
        self.absorb_dirty(tid, pages);
        Ok(())
    }

    fn absorb_dirty(&self, tid: TransactionId, pages: Vec<PageRef>) {
        let mut state = self.state.lock().unwrap();
        for page_ref in pages {
            let pid = {
                let mut page = page_ref.write().unwrap();
                page.mark_dirty(Some(tid));
                page.id()
            };
            state.cache.insert(pid, page_ref);
            state.touch(pid);
        }
    }

    /// Commits or aborts the transaction. On commit, every page it dirtied
    /// is flushed and re-snapshotted as its own before-image; on abort,
    /// each such page is restored in place from its before-image. All of
    /// the transaction's locks are released either way.
    pub fn transaction_complete(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        commit: bool,
    ) -> Result<(), DbError> {
        crate::substrate_debug_log!(
            "[BufferPool::transaction_complete] {} {tid}",
            if commit { "commit" } else { "abort" }
        );
        {
            let mut state = self.state.lock().unwrap();
            let dirtied: Vec<PageId> = state
                .cache
                .iter()
                .filter(|(_, page)| page.read().unwrap().is_dirty() == Some(tid))
                .map(|(pid, _)| *pid)
                .collect();

            for pid in dirtied {
                if commit {
                    self.flush_if_dirty(catalog, &mut state, pid)?;
                    if let Some(page_ref) = state.cache.get(&pid) {
                        page_ref.write().unwrap().set_before_image();
                    }
                } else if let Some(page_ref) = state.cache.get(&pid) {
                    let mut page = page_ref.write().unwrap();
                    *page = page.before_image();
                }
            }
        }
        self.lock_manager.release_all_locks(tid);
        Ok(())
    }

    /// Writes the page to disk if it is cached and dirty, clearing the
    /// dirty flag. The before-image is untouched; only commit refreshes it.
    pub fn flush_page(&self, catalog: &Catalog, pid: PageId) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        self.flush_if_dirty(catalog, &mut state, pid)
    }

    /// Flushes every page dirtied by the given transaction.
    pub fn flush_pages(&self, catalog: &Catalog, tid: TransactionId) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let dirtied: Vec<PageId> = state
            .cache
            .iter()
            .filter(|(_, page)| page.read().unwrap().is_dirty() == Some(tid))
            .map(|(pid, _)| *pid)
            .collect();
        for pid in dirtied {
            self.flush_if_dirty(catalog, &mut state, pid)?;
        }
        Ok(())
    }

    /// Flushes every dirty page. Writing uncommitted data breaks NO STEAL,
    /// so this belongs in tests and teardown, not mid-transaction.
    pub fn flush_all_pages(&self, catalog: &Catalog) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let cached: Vec<PageId> = state.cache.keys().copied().collect();
        for pid in cached {
            self.flush_if_dirty(catalog, &mut state, pid)?;
        }
        Ok(())
    }

    /// Drops the page from the cache without writing it.
    pub fn discard_page(&self, pid: PageId) {
        let mut state = self.state.lock().unwrap();
        state.forget(pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds_lock(tid, pid)
    }

    /// Releases a single page lock before transaction completion. This
    /// punches a hole in two-phase locking; callers take responsibility
    /// for the anomalies that can follow.
    pub fn unsafe_release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_manager.release_lock(tid, pid);
    }

    #[cfg(test)]
    fn cached_pages(&self) -> Vec<PageId> {
        self.state.lock().unwrap().cache.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::heap_file::HeapFile;
    use crate::types::{Field, TupleDesc, Type};
    use tempfile::{tempdir, TempDir};

    fn id_name_desc() -> TupleDesc {
        TupleDesc::new(
            vec![Type::Int, Type::Str],
            vec![Some("id".into()), Some("name".into())],
        )
    }

    fn row(td: &TupleDesc, id: i32, name: &str) -> Tuple {
        let mut t = Tuple::new(td.clone());
        t.set_field(0, Field::Int(id));
        t.set_field(1, Field::str(name));
        t
    }

    /// A table whose backing file already holds `pages` pages, the first
    /// tuple of each being (page_no, "seed").
    fn seeded_table(db: &Database, dir: &TempDir, name: &str, pages: usize) -> u32 {
        let file = HeapFile::new(dir.path().join(format!("{name}.dat")), id_name_desc()).unwrap();
        let td = file.tuple_desc().clone();
        for page_no in 0..pages {
            let pid = crate::PageId::new(file.id(), page_no);
            let mut page = HeapPage::new(pid, &HeapPage::empty_page_data(), td.clone());
            let mut t = row(&td, page_no as i32, "seed");
            page.insert_tuple(&mut t).unwrap();
            file.write_page(&page).unwrap();
        }
        let id = file.id();
        db.catalog().add_table(file, name, None).unwrap();
        id
    }

    #[test]
    fn lru_eviction_discards_the_coldest_clean_page() {
        let dir = tempdir().unwrap();
        let db = Database::with_capacity(2);
        let table = seeded_table(&db, &dir, "t", 3);
        let tid = TransactionId::new();
        let bp = db.buffer_pool();

        let p = |n| crate::PageId::new(table, n);
        assert_eq!(bp.capacity(), 2);
        bp.get_page(db.catalog(), tid, p(0), Permissions::ReadOnly)
            .unwrap();
        bp.get_page(db.catalog(), tid, p(1), Permissions::ReadOnly)
            .unwrap();
        bp.get_page(db.catalog(), tid, p(0), Permissions::ReadOnly)
            .unwrap();
        bp.get_page(db.catalog(), tid, p(2), Permissions::ReadOnly)
            .unwrap();

        let mut cached = bp.cached_pages();
        cached.sort_by_key(|pid| pid.page_no);
        assert_eq!(cached, vec![p(0), p(2)]);
    }

    #[test]
    fn pool_of_dirty_pages_refuses_a_new_page() {
        let dir = tempdir().unwrap();
        let db = Database::with_capacity(2);
        let a = seeded_table(&db, &dir, "a", 1);
        let b = seeded_table(&db, &dir, "b", 1);
        let c = seeded_table(&db, &dir, "c", 1);
        let tid = TransactionId::new();

        let mut t = row(&id_name_desc(), 100, "x");
        db.buffer_pool()
            .insert_tuple(db.catalog(), tid, a, &mut t)
            .unwrap();
        let mut t = row(&id_name_desc(), 101, "y");
        db.buffer_pool()
            .insert_tuple(db.catalog(), tid, b, &mut t)
            .unwrap();

        let err = db
            .buffer_pool()
            .get_page(
                db.catalog(),
                tid,
                crate::PageId::new(c, 0),
                Permissions::ReadOnly,
            )
            .unwrap_err();
        assert!(matches!(err, DbError::BufferFull));
    }

    #[test]
    fn commit_flushes_dirty_pages_to_disk() {
        let dir = tempdir().unwrap();
        let db = Database::new();
        let table = seeded_table(&db, &dir, "t", 1);
        let tid = TransactionId::new();

        let mut t = row(&id_name_desc(), 42, "committed");
        db.buffer_pool()
            .insert_tuple(db.catalog(), tid, table, &mut t)
            .unwrap();
        db.buffer_pool()
            .transaction_complete(db.catalog(), tid, true)
            .unwrap();

        let file = db.catalog().database_file(table).unwrap();
        let on_disk = file.read_page(crate::PageId::new(table, 0)).unwrap();
        assert_eq!(on_disk.iter().count(), 2);
        assert!(on_disk.iter().any(|t| *t.field(0) == Field::Int(42)));
        assert!(!db.buffer_pool().holds_lock(tid, crate::PageId::new(table, 0)));
    }

    #[test]
    fn abort_restores_the_before_image() {
        let dir = tempdir().unwrap();
        let db = Database::new();
        let table = seeded_table(&db, &dir, "t", 1);
        let pid = crate::PageId::new(table, 0);
        let file = db.catalog().database_file(table).unwrap();
        let disk_before = file.read_page(pid).unwrap().serialize();

        let tid = TransactionId::new();
        let mut t = row(&id_name_desc(), 99, "doomed");
        db.buffer_pool()
            .insert_tuple(db.catalog(), tid, table, &mut t)
            .unwrap();
        db.buffer_pool()
            .transaction_complete(db.catalog(), tid, false)
            .unwrap();

        let reader = TransactionId::new();
        let page = db
            .buffer_pool()
            .get_page(db.catalog(), reader, pid, Permissions::ReadOnly)
            .unwrap();
        assert_eq!(page.read().unwrap().serialize(), disk_before);
        assert_eq!(page.read().unwrap().iter().count(), 1);
    }

    #[test]
    fn flush_page_clears_the_dirty_flag() {
        let dir = tempdir().unwrap();
        let db = Database::new();
        let table = seeded_table(&db, &dir, "t", 1);
        let pid = crate::PageId::new(table, 0);
        let tid = TransactionId::new();

        let mut t = row(&id_name_desc(), 5, "z");
        db.buffer_pool()
            .insert_tuple(db.catalog(), tid, table, &mut t)
            .unwrap();

        db.buffer_pool().flush_page(db.catalog(), pid).unwrap();
        let page = db
            .buffer_pool()
            .get_page(db.catalog(), tid, pid, Permissions::ReadWrite)
            .unwrap();
        assert!(page.read().unwrap().is_dirty().is_none());

        let file = db.catalog().database_file(table).unwrap();
        assert_eq!(file.read_page(pid).unwrap().iter().count(), 2);
    }

    #[test]
    fn flush_pages_targets_one_transaction() {
        let dir = tempdir().unwrap();
        let db = Database::new();
        let a = seeded_table(&db, &dir, "a", 1);
        let b = seeded_table(&db, &dir, "b", 1);
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        let mut t = row(&id_name_desc(), 1, "x");
        db.buffer_pool()
            .insert_tuple(db.catalog(), t1, a, &mut t)
            .unwrap();
        let mut t = row(&id_name_desc(), 2, "y");
        db.buffer_pool()
            .insert_tuple(db.catalog(), t2, b, &mut t)
            .unwrap();

        db.buffer_pool().flush_pages(db.catalog(), t1).unwrap();

        let page_a = db
            .buffer_pool()
            .get_page(db.catalog(), t1, crate::PageId::new(a, 0), Permissions::ReadWrite)
            .unwrap();
        assert!(page_a.read().unwrap().is_dirty().is_none());
        let page_b = db
            .buffer_pool()
            .get_page(db.catalog(), t2, crate::PageId::new(b, 0), Permissions::ReadWrite)
            .unwrap();
        assert_eq!(page_b.read().unwrap().is_dirty(), Some(t2));
    }

    #[test]
    fn delete_then_commit_removes_the_tuple() {
        let dir = tempdir().unwrap();
        let db = Database::new();
        let table = seeded_table(&db, &dir, "t", 1);
        let tid = TransactionId::new();
        let file = db.catalog().database_file(table).unwrap();

        let mut iter = file.iterator(db.buffer_pool(), db.catalog(), tid);
        iter.open().unwrap();
        let victim = iter.next().unwrap().unwrap();
        iter.close();

        db.buffer_pool()
            .delete_tuple(db.catalog(), tid, &victim)
            .unwrap();
        db.buffer_pool()
            .transaction_complete(db.catalog(), tid, true)
            .unwrap();

        let on_disk = file.read_page(crate::PageId::new(table, 0)).unwrap();
        assert_eq!(on_disk.iter().count(), 0);
    }

    #[test]
    fn discard_page_drops_only_the_cache_entry() {
        let dir = tempdir().unwrap();
        let db = Database::new();
        let table = seeded_table(&db, &dir, "t", 1);
        let pid = crate::PageId::new(table, 0);
        let tid = TransactionId::new();

        db.buffer_pool()
            .get_page(db.catalog(), tid, pid, Permissions::ReadOnly)
            .unwrap();
        db.buffer_pool().discard_page(pid);
        assert!(db.buffer_pool().cached_pages().is_empty());

        // Still readable from disk afterwards.
        let page = db
            .buffer_pool()
            .get_page(db.catalog(), tid, pid, Permissions::ReadOnly)
            .unwrap();
        assert_eq!(page.read().unwrap().iter().count(), 1);
    }
}
