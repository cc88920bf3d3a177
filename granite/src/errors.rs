//! Errors raised during query execution.

use substrate::errors::DbError;

#[derive(Debug)]
pub enum ExecutionError {
    /// A storage-layer failure, including transaction aborts surfacing
    /// through `get_page`.
    Db(DbError),
    /// The iterator protocol was driven out of order (e.g. `next` before
    /// `open`).
    IllegalState(&'static str),
    /// `next` was called with no tuple remaining.
    NoSuchElement,
    /// The requested operation exists in the protocol but not for this
    /// operator.
    Unsupported(&'static str),
    /// A tuple field did not have the type the operator was planned with.
    TypeMismatch(&'static str),
}

impl From<DbError> for ExecutionError {
    fn from(err: DbError) -> Self {
        ExecutionError::Db(err)
    }
}

impl ExecutionError {
    /// True when the underlying cause is a transaction abort, which the
    /// caller must follow with `transaction_complete(tid, false)`.
    pub fn is_abort(&self) -> bool {
        matches!(self, ExecutionError::Db(err) if err.is_abort())
    }
}
