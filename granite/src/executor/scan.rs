//! Sequential scan over a heap file.

use crate::errors::ExecutionError;
use crate::executor::OpIterator;
use substrate::db::Database;
use substrate::heap_file::{HeapFile, HeapFileIterator};
use substrate::transaction::TransactionId;
use substrate::tuple::Tuple;
use substrate::types::TupleDesc;
use std::sync::Arc;

/// Reads every tuple of a table in storage order, as part of one
/// transaction. The scan's schema carries the table alias: every field
/// name comes out as `alias.field`, with the literal string `"null"`
/// standing in for a missing alias or field name.
pub struct SeqScan<'a> {
    db: &'a Database,
    tid: TransactionId,
    table_id: u32,
    alias: Option<String>,
    file: Arc<HeapFile>,
    td: TupleDesc,
    iter: Option<HeapFileIterator<'a>>,
    lookahead: Option<Tuple>,
}

impl<'a> SeqScan<'a> {
    pub fn new(
        db: &'a Database,
        tid: TransactionId,
        table_id: u32,
        alias: Option<&str>,
    ) -> Result<SeqScan<'a>, ExecutionError> {
        let file = db.catalog().database_file(table_id)?;
        let base = file.tuple_desc();

        let prefix = alias.unwrap_or("null");
        let types = base.types().collect();
        let names = (0..base.num_fields())
            .map(|i| Some(format!("{prefix}.{}", base.field_name(i).unwrap_or("null"))))
            .collect();
        let td = TupleDesc::new(types, names);

        Ok(SeqScan {
            db,
            tid,
            table_id,
            alias: alias.map(String::from),
            file,
            td,
            iter: None,
            lookahead: None,
        })
    }

    /// The catalog name of the scanned table.
    pub fn table_name(&self) -> Result<String, ExecutionError> {
        Ok(self.db.catalog().table_name(self.table_id)?)
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }
}

impl OpIterator for SeqScan<'_> {
    fn open(&mut self) -> Result<(), ExecutionError> {
        let mut iter = self
            .file
            .iterator(self.db.buffer_pool(), self.db.catalog(), self.tid);
        iter.open()?;
        self.iter = Some(iter);
        self.lookahead = None;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        let iter = self
            .iter
            .as_mut()
            .ok_or(ExecutionError::IllegalState("scan not open"))?;
        if self.lookahead.is_none() {
            self.lookahead = iter.next()?;
        }
        Ok(self.lookahead.is_some())
    }

    fn next(&mut self) -> Result<Tuple, ExecutionError> {
        if !self.has_next()? {
            return Err(ExecutionError::NoSuchElement);
        }
        self.lookahead.take().ok_or(ExecutionError::NoSuchElement)
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        let iter = self
            .iter
            .as_mut()
            .ok_or(ExecutionError::IllegalState("scan not open"))?;
        iter.rewind()?;
        self.lookahead = None;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut iter) = self.iter.take() {
            iter.close();
        }
        self.lookahead = None;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}
