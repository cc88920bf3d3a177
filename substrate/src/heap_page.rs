//! The slotted heap page.
//!
//! A page is `page_size()` bytes: a slot-occupancy bitmap followed by
//! fixed-width tuple slots. Bit `i` of the header (LSB-first within each
//! byte) is set when slot `i` holds a live tuple. The number of slots is
//! chosen so that slots plus their header bits fill the page:
//! `num_slots = (page_bytes * 8) / (tuple_bytes * 8 + 1)`.

use crate::errors::DbError;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use crate::types::TupleDesc;
use crate::{page_size, PageId, RecordId};
use bytes::{Buf, BufMut, BytesMut};

#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    td: TupleDesc,
    num_slots: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirty: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Parses a page from its on-disk bytes. The bytes become the page's
    /// initial before-image.
    pub fn new(pid: PageId, data: &[u8], td: TupleDesc) -> HeapPage {
        debug_assert_eq!(data.len(), page_size());
        let num_slots = Self::slots_for(data.len(), &td);
        let header_len = num_slots.div_ceil(8);

        let mut buf = data;
        let header = buf[..header_len].to_vec();
        buf.advance(header_len);

        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if Self::bit_set(&header, slot) {
                let mut tuple = Tuple::parse(&td, &mut buf);
                tuple.set_record_id(Some(RecordId::new(pid, slot)));
                tuples.push(Some(tuple));
            } else {
                buf.advance(td.size());
                tuples.push(None);
            }
        }

        HeapPage {
            pid,
            td,
            num_slots,
            header,
            tuples,
            dirty: None,
            before_image: data.to_vec(),
        }
    }

    /// The all-zeroes byte image of a page with no tuples.
    pub fn empty_page_data() -> Vec<u8> {
        vec![0; page_size()]
    }

    fn slots_for(page_bytes: usize, td: &TupleDesc) -> usize {
        (page_bytes * 8) / (td.size() * 8 + 1)
    }

    fn bit_set(header: &[u8], slot: usize) -> bool {
        header[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    /// Produces the exact on-disk image: header, slots in order (empty
    /// slots as zeroes), zero padding to the page size.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(page_size());
        buf.put_slice(&self.header);
        for slot in &self.tuples {
            match slot {
                Some(tuple) => tuple.serialize(&mut buf),
                None => buf.put_bytes(0, self.td.size()),
            }
        }
        buf.resize(page_size(), 0);
        buf.to_vec()
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots).filter(|&i| !self.is_slot_used(i)).count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        Self::bit_set(&self.header, slot)
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }

    /// Places the tuple in the lowest-numbered free slot and assigns its
    /// record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> Result<(), DbError> {
        if *tuple.tuple_desc() != self.td {
            return Err(DbError::SchemaMismatch);
        }
        let slot = (0..self.num_slots)
            .find(|&i| !self.is_slot_used(i))
            .ok_or(DbError::PageFull(self.pid))?;

        tuple.set_record_id(Some(RecordId::new(self.pid, slot)));
        self.mark_slot_used(slot, true);
        self.tuples[slot] = Some(tuple.clone());
        Ok(())
    }

    /// Clears the slot named by the tuple's record id.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<(), DbError> {
        let rid = tuple.record_id().ok_or(DbError::NotOnThisPage)?;
        if rid.pid != self.pid || rid.slot >= self.num_slots {
            return Err(DbError::NotOnThisPage);
        }
        if !self.is_slot_used(rid.slot) {
            return Err(DbError::SlotEmpty(rid.slot));
        }
        self.mark_slot_used(rid.slot, false);
        self.tuples[rid.slot] = None;
        Ok(())
    }

    /// Live tuples in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.tuples.get(slot).and_then(|t| t.as_ref())
    }

    pub fn mark_dirty(&mut self, dirty: Option<TransactionId>) {
        self.dirty = dirty;
    }

    /// The transaction that last dirtied this page, if it is dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }

    /// The page as of its last commit (or initial load), reconstructed
    /// from the stored byte snapshot.
    pub fn before_image(&self) -> HeapPage {
        HeapPage::new(self.pid, &self.before_image, self.td.clone())
    }

    /// Snapshots the current contents as the new before-image. Called when
    /// the dirtying transaction commits.
    pub fn set_before_image(&mut self) {
        self.before_image = self.serialize();
    }
}
