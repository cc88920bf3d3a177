//! The pull-based operator protocol.

use crate::errors::ExecutionError;
use substrate::tuple::Tuple;
use substrate::types::TupleDesc;

pub mod scan;

/// Every operator is an iterator over tuples with an explicit lifecycle.
///
/// Calling anything but `close` before `open` (or after `close`) is an
/// [`ExecutionError::IllegalState`]; calling `next` when `has_next` is
/// false is [`ExecutionError::NoSuchElement`]. An operator's schema never
/// changes over its lifetime.
pub trait OpIterator {
    fn open(&mut self) -> Result<(), ExecutionError>;

    fn has_next(&mut self) -> Result<bool, ExecutionError>;

    fn next(&mut self) -> Result<Tuple, ExecutionError>;

    /// Restarts the stream from the beginning.
    fn rewind(&mut self) -> Result<(), ExecutionError>;

    fn close(&mut self);

    fn tuple_desc(&self) -> &TupleDesc;
}

/// An operator over an in-memory list of tuples. Aggregators hand their
/// results out through one of these, and tests use it as a child operator
/// with known contents.
pub struct TupleIterator {
    td: TupleDesc,
    tuples: Vec<Tuple>,
    cursor: usize,
    opened: bool,
}

impl TupleIterator {
    pub fn new(td: TupleDesc, tuples: Vec<Tuple>) -> TupleIterator {
        debug_assert!(tuples.iter().all(|t| *t.tuple_desc() == td));
        TupleIterator {
            td,
            tuples,
            cursor: 0,
            opened: false,
        }
    }
}

impl OpIterator for TupleIterator {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.cursor = 0;
        self.opened = true;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IllegalState("tuple iterator not open"));
        }
        Ok(self.cursor < self.tuples.len())
    }

    fn next(&mut self) -> Result<Tuple, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IllegalState("tuple iterator not open"));
        }
        let tuple = self
            .tuples
            .get(self.cursor)
            .ok_or(ExecutionError::NoSuchElement)?
            .clone();
        self.cursor += 1;
        Ok(tuple)
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IllegalState("tuple iterator not open"));
        }
        self.cursor = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}
