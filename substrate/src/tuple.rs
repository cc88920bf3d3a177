//! In-memory rows.

use crate::types::{Field, TupleDesc, Type};
use crate::RecordId;
use bytes::{Buf, BufMut};
use std::fmt;

/// A row: a schema plus one value per field, and the identity of the slot
/// holding it once it has been stored.
#[derive(Debug, Clone)]
pub struct Tuple {
    td: TupleDesc,
    fields: Vec<Field>,
    rid: Option<RecordId>,
}

impl Tuple {
    /// A tuple with zero-valued fields for the given schema. A fresh tuple
    /// has no record id until it is inserted somewhere.
    pub fn new(td: TupleDesc) -> Tuple {
        let fields = td
            .types()
            .map(|t| match t {
                Type::Int => Field::Int(0),
                Type::Str => Field::Str(String::new()),
            })
            .collect();
        Tuple { td, fields, rid: None }
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn set_field(&mut self, i: usize, field: Field) {
        debug_assert_eq!(field.field_type(), self.td.field_type(i));
        self.fields[i] = field;
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.rid = rid;
    }

    /// Writes the fixed-width encoding of every field, in schema order.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        for field in &self.fields {
            field.serialize(buf);
        }
    }

    /// Reads one tuple of the given schema. The parsed tuple has no record
    /// id; the caller assigns one when it knows the slot.
    pub fn parse(td: &TupleDesc, buf: &mut impl Buf) -> Tuple {
        let fields = td.types().map(|t| Field::parse(t, buf)).collect();
        Tuple {
            td: td.clone(),
            fields,
            rid: None,
        }
    }
}

/// Tuples compare by schema and field values; the record id is identity,
/// not content.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.td == other.td && self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}
