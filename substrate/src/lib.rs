//! # Substrate Storage Engine
//! The storage engine for the Granite database.
//! This crate is responsible for the on-disk and in-memory representation of
//! tables: heap pages, heap files, the catalog, page-level locking, and the
//! bounded buffer pool that mediates all page access.

/// The bounded page cache and transaction completion protocol.
pub mod buffer_pool;
/// The directory of tables known to the database.
pub mod catalog;
/// The database context wiring the catalog and buffer pool together.
pub mod db;
/// The storage-layer error taxonomy.
pub mod errors;
/// Tables stored as a sequence of pages in one local file.
pub mod heap_file;
/// The slotted page layout and its in-memory form.
pub mod heap_page;
/// Shared/exclusive page locks with deadlock detection.
pub mod lock_manager;
/// Transaction identifiers and access permissions.
pub mod transaction;
/// In-memory rows and their identity.
pub mod tuple;
/// Field types, values, and tuple schemas.
pub mod types;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use buffer_pool::{BufferPool, PageRef};
pub use catalog::Catalog;
pub use db::Database;
pub use errors::{AbortReason, DbError};
pub use heap_file::HeapFile;
pub use heap_page::HeapPage;
pub use lock_manager::LockManager;
pub use transaction::{Permissions, TransactionId};
pub use tuple::Tuple;
pub use types::{Field, TupleDesc, Type};

/// The default size of a single page in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// The size of a single page in bytes, as currently configured.
pub fn page_size() -> usize {
    PAGE_SIZE.load(Ordering::SeqCst)
}

/// Overrides the page size. Only tests should call this; production code
/// runs with [`DEFAULT_PAGE_SIZE`].
pub fn set_page_size(size: usize) {
    PAGE_SIZE.store(size, Ordering::SeqCst);
}

/// Restores the page size to [`DEFAULT_PAGE_SIZE`].
pub fn reset_page_size() {
    PAGE_SIZE.store(DEFAULT_PAGE_SIZE, Ordering::SeqCst);
}

/// A unique identifier for a page: the owning table plus the page's
/// position in the backing file. The first page of a table is page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub table_id: u32,
    pub page_no: usize,
}

impl PageId {
    pub fn new(table_id: u32, page_no: usize) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// The identity of a stored tuple: the page holding it and its slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub pid: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(pid: PageId, slot: usize) -> Self {
        Self { pid, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pid, self.slot)
    }
}

pub fn debug_logs_enabled() -> bool {
    std::env::var_os("GRANITE_DEBUG_LOG").is_some()
}

#[macro_export]
macro_rules! substrate_debug_log {
    ($($arg:tt)*) => {
        if $crate::debug_logs_enabled() {
            println!($($arg)*);
        }
    };
}
