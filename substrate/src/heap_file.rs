//! Tables as page files on disk.
//!
//! A heap file is a gap-free sequence of pages stored contiguously in one
//! local file; page `n` occupies bytes `[n * page_size, (n + 1) * page_size)`.
//! Tuple-level operations go through the buffer pool so that page locks and
//! caching apply; raw page I/O opens a fresh handle per call.

use crate::buffer_pool::{BufferPool, PageRef};
use crate::catalog::Catalog;
use crate::errors::DbError;
use crate::heap_page::HeapPage;
use crate::transaction::{Permissions, TransactionId};
use crate::tuple::Tuple;
use crate::types::TupleDesc;
use crate::{page_size, PageId};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct HeapFile {
    path: PathBuf,
    td: TupleDesc,
    id: u32,
}

impl HeapFile {
    /// Creates a heap file backed by the given path. The table id is the
    /// crc32 of the absolute path, so it is stable across process restarts.
    pub fn new(path: impl AsRef<Path>, td: TupleDesc) -> Result<HeapFile, DbError> {
        let path = std::path::absolute(path)?;
        let id = crc32fast::hash(path.as_os_str().as_encoded_bytes());
        Ok(HeapFile { path, td, id })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    /// Number of whole pages currently on disk, recomputed from the file
    /// length on every call. A file that does not exist yet has no pages.
    pub fn num_pages(&self) -> usize {
        match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() as usize / page_size(),
            Err(_) => 0,
        }
    }

    /// Reads one page from disk, bypassing the buffer pool.
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage, DbError> {
        if pid.table_id != self.id || pid.page_no >= self.num_pages() {
            return Err(DbError::PageOutOfRange(pid));
        }
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start((pid.page_no * page_size()) as u64))?;
        let mut data = vec![0u8; page_size()];
        file.read_exact(&mut data)?;
        Ok(HeapPage::new(pid, &data, self.td.clone()))
    }

    /// Writes one page at its offset, extending the file when the page lies
    /// one past the current end.
    pub fn write_page(&self, page: &HeapPage) -> Result<(), DbError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.seek(SeekFrom::Start((page.id().page_no * page_size()) as u64))?;
        file.write_all(&page.serialize())?;
        file.sync_all()?;
        Ok(())
    }

    /// Inserts a tuple into the first page with a free slot, appending a
    /// fresh page when every existing page is full. The free-slot check
    /// runs under the page's write latch, so a page filled by a concurrent
    /// transaction is simply skipped.
    pub fn insert_tuple(
        &self,
        buffer_pool: &BufferPool,
        catalog: &Catalog,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageRef>, DbError> {
        for page_no in 0..self.num_pages() {
            let pid = PageId::new(self.id, page_no);
            let page_ref = buffer_pool.get_page(catalog, tid, pid, Permissions::ReadWrite)?;
            let mut page = page_ref.write().unwrap();
            if page.num_empty_slots() > 0 {
                page.insert_tuple(tuple)?;
                page.mark_dirty(Some(tid));
                drop(page);
                return Ok(vec![page_ref]);
            }
        }

        let new_pid = PageId::new(self.id, self.num_pages());
        crate::substrate_debug_log!(
            "[HeapFile::insert_tuple] extending table {} with page {}",
            self.id,
            new_pid
        );
        let empty = HeapPage::new(new_pid, &HeapPage::empty_page_data(), self.td.clone());
        self.write_page(&empty)?;

        let page_ref = buffer_pool.get_page(catalog, tid, new_pid, Permissions::ReadWrite)?;
        {
            let mut page = page_ref.write().unwrap();
            page.insert_tuple(tuple)?;
            page.mark_dirty(Some(tid));
        }
        Ok(vec![page_ref])
    }

    /// Deletes the tuple from the page named by its record id.
    pub fn delete_tuple(
        &self,
        buffer_pool: &BufferPool,
        catalog: &Catalog,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageRef>, DbError> {
        let rid = tuple.record_id().ok_or(DbError::NotOnThisPage)?;
        if rid.pid.table_id != self.id {
            return Err(DbError::NotOnThisPage);
        }
        let page_ref = buffer_pool.get_page(catalog, tid, rid.pid, Permissions::ReadWrite)?;
        {
            let mut page = page_ref.write().unwrap();
            page.delete_tuple(tuple)?;
            page.mark_dirty(Some(tid));
        }
        Ok(vec![page_ref])
    }

    /// A pull iterator over every live tuple, in (page, slot) order. Pages
    /// are fetched through the buffer pool under `ReadOnly`.
    pub fn iterator<'a>(
        self: &Arc<Self>,
        buffer_pool: &'a BufferPool,
        catalog: &'a Catalog,
        tid: TransactionId,
    ) -> HeapFileIterator<'a> {
        HeapFileIterator {
            file: Arc::clone(self),
            buffer_pool,
            catalog,
            tid,
            page_no: 0,
            current: Vec::new().into_iter(),
            opened: false,
        }
    }
}

pub struct HeapFileIterator<'a> {
    file: Arc<HeapFile>,
    buffer_pool: &'a BufferPool,
    catalog: &'a Catalog,
    tid: TransactionId,
    page_no: usize,
    current: std::vec::IntoIter<Tuple>,
    opened: bool,
}

impl HeapFileIterator<'_> {
    pub fn open(&mut self) -> Result<(), DbError> {
        self.page_no = 0;
        self.current = if self.file.num_pages() > 0 {
            self.load_page(0)?
        } else {
            Vec::new().into_iter()
        };
        self.opened = true;
        Ok(())
    }

    fn load_page(&self, page_no: usize) -> Result<std::vec::IntoIter<Tuple>, DbError> {
        let pid = PageId::new(self.file.id(), page_no);
        let page_ref =
            self.buffer_pool
                .get_page(self.catalog, self.tid, pid, Permissions::ReadOnly)?;
        let tuples: Vec<Tuple> = page_ref.read().unwrap().iter().cloned().collect();
        Ok(tuples.into_iter())
    }

    /// The next live tuple, or `None` once every page is exhausted. A
    /// closed iterator yields `None`.
    pub fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if !self.opened {
            return Ok(None);
        }
        loop {
            if let Some(tuple) = self.current.next() {
                return Ok(Some(tuple));
            }
            if self.page_no + 1 >= self.file.num_pages() {
                return Ok(None);
            }
            self.page_no += 1;
            self.current = self.load_page(self.page_no)?;
        }
    }

    pub fn rewind(&mut self) -> Result<(), DbError> {
        self.close();
        self.open()
    }

    /// Drops buffered tuples. Page locks stay held; they are released only
    /// at transaction completion.
    pub fn close(&mut self) {
        self.opened = false;
        self.page_no = 0;
        self.current = Vec::new().into_iter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::types::{Field, Type};
    use tempfile::tempdir;

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

    #[test]
    fn table_id_is_stable_for_a_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stable.dat");
        let a = HeapFile::new(&path, id_name_desc()).unwrap();
        let b = HeapFile::new(&path, id_name_desc()).unwrap();
        let c = HeapFile::new(dir.path().join("other.dat"), id_name_desc()).unwrap();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn page_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let file = HeapFile::new(dir.path().join("t.dat"), id_name_desc()).unwrap();
        assert_eq!(file.num_pages(), 0);

        let pid = PageId::new(file.id(), 0);
        let mut page = HeapPage::new(pid, &HeapPage::empty_page_data(), id_name_desc());
        let mut t = row(file.tuple_desc(), 1, "a");
        page.insert_tuple(&mut t).unwrap();
        file.write_page(&page).unwrap();
        assert_eq!(file.num_pages(), 1);

        let reread = file.read_page(pid).unwrap();
        assert_eq!(reread.iter().count(), 1);
        assert_eq!(*reread.tuple(0).unwrap().field(0), Field::Int(1));
    }

    #[test]
    fn read_page_rejects_out_of_range_requests() {
        let dir = tempdir().unwrap();
        let file = HeapFile::new(dir.path().join("t.dat"), id_name_desc()).unwrap();
        let missing = PageId::new(file.id(), 0);
        assert!(matches!(
            file.read_page(missing),
            Err(DbError::PageOutOfRange(_))
        ));
        let foreign = PageId::new(file.id().wrapping_add(1), 0);
        assert!(matches!(
            file.read_page(foreign),
            Err(DbError::PageOutOfRange(_))
        ));
    }

    #[test]
    fn insert_fills_a_page_before_extending_the_file() {
        let dir = tempdir().unwrap();
        let db = Database::new();
        let file = HeapFile::new(dir.path().join("t.dat"), id_name_desc()).unwrap();
        let td = file.tuple_desc().clone();
        db.catalog().add_table(file, "t", None).unwrap();
        let table_id = db.catalog().table_id("t").unwrap();
        let file = db.catalog().database_file(table_id).unwrap();

        let tid = TransactionId::new();
        let slots = {
            let page = HeapPage::new(
                PageId::new(table_id, 0),
                &HeapPage::empty_page_data(),
                td.clone(),
            );
            page.num_slots()
        };
        for i in 0..slots {
            let mut t = row(&td, i as i32, "fill");
            file.insert_tuple(db.buffer_pool(), db.catalog(), tid, &mut t)
                .unwrap();
        }
        assert_eq!(file.num_pages(), 1);

        let mut overflow = row(&td, -1, "spill");
        file.insert_tuple(db.buffer_pool(), db.catalog(), tid, &mut overflow)
            .unwrap();
        assert_eq!(file.num_pages(), 2);
        assert_eq!(overflow.record_id().unwrap().pid.page_no, 1);
    }

    #[test]
    fn iterator_walks_pages_in_order() {
        let dir = tempdir().unwrap();
        let db = Database::new();
        let file = HeapFile::new(dir.path().join("t.dat"), id_name_desc()).unwrap();
        let td = file.tuple_desc().clone();
        db.catalog().add_table(file, "t", None).unwrap();
        let file = db
            .catalog()
            .database_file(db.catalog().table_id("t").unwrap())
            .unwrap();

        let tid = TransactionId::new();
        let total = 40; // more than one page of 30 slots
        for i in 0..total {
            let mut t = row(&td, i, "r");
            file.insert_tuple(db.buffer_pool(), db.catalog(), tid, &mut t)
                .unwrap();
        }

        let mut iter = file.iterator(db.buffer_pool(), db.catalog(), tid);
        iter.open().unwrap();
        let mut seen = Vec::new();
        while let Some(t) = iter.next().unwrap() {
            let Field::Int(v) = *t.field(0) else { panic!() };
            seen.push(v);
        }
        assert_eq!(seen, (0..total).collect::<Vec<_>>());

        iter.rewind().unwrap();
        assert!(iter.next().unwrap().is_some());
        iter.close();
        assert!(iter.next().unwrap().is_none());
    }

    #[test]
    fn iterator_over_empty_table_yields_nothing() {
        let dir = tempdir().unwrap();
        let db = Database::new();
        let file = HeapFile::new(dir.path().join("empty.dat"), id_name_desc()).unwrap();
        db.catalog().add_table(file, "empty", None).unwrap();
        let file = db
            .catalog()
            .database_file(db.catalog().table_id("empty").unwrap())
            .unwrap();

        let mut iter = file.iterator(db.buffer_pool(), db.catalog(), TransactionId::new());
        iter.open().unwrap();
        assert!(iter.next().unwrap().is_none());
    }
}
