//! The database context: one catalog plus one buffer pool.
//!
//! Rather than a process-wide singleton, the engine is handed around as an
//! explicit `Database` value. Constructors wire the pieces together once;
//! `close` tears the cache down through a final flush.

use crate::buffer_pool::{BufferPool, PageRef, DEFAULT_PAGES};
use crate::catalog::Catalog;
use crate::errors::DbError;
use crate::transaction::{Permissions, TransactionId};
use crate::tuple::Tuple;
use crate::PageId;

#[derive(Debug)]
pub struct Database {
    catalog: Catalog,
    buffer_pool: BufferPool,
}

impl Database {
    pub fn new() -> Database {
        Database::with_capacity(DEFAULT_PAGES)
    }

    /// A database whose buffer pool holds at most `num_pages` pages.
    pub fn with_capacity(num_pages: usize) -> Database {
        Database {
            catalog: Catalog::new(),
            buffer_pool: BufferPool::new(num_pages),
        }
    }

    /// A database with a custom buffer pool (e.g. one with a short lock
    /// timeout for tests).
    pub fn with_buffer_pool(buffer_pool: BufferPool) -> Database {
        Database {
            catalog: Catalog::new(),
            buffer_pool,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PageRef, DbError> {
        self.buffer_pool.get_page(&self.catalog, tid, pid, perm)
    }

    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: u32,
        tuple: &mut Tuple,
    ) -> Result<(), DbError> {
        self.buffer_pool
            .insert_tuple(&self.catalog, tid, table_id, tuple)
    }

    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<(), DbError> {
        self.buffer_pool.delete_tuple(&self.catalog, tid, tuple)
    }

    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<(), DbError> {
        self.buffer_pool
            .transaction_complete(&self.catalog, tid, commit)
    }

    /// Flushes everything still cached and consumes the context.
    pub fn close(self) -> Result<(), DbError> {
        self.buffer_pool.flush_all_pages(&self.catalog)
    }
}

impl Default for Database {
    fn default() -> Self {
        Database::new()
    }
}
