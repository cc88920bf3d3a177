//! The field type system and tuple schemas.
//!
//! The engine stores exactly two field types: 32-bit integers and
//! fixed-width strings. All on-disk encodings are big-endian.

use crate::errors::DbError;
use bytes::{Buf, BufMut};
use std::fmt;

/// Maximum number of UTF-8 bytes stored for a string field.
pub const STRING_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Str,
}

impl Type {
    /// Number of bytes a field of this type occupies on disk.
    /// Strings carry a 4-byte length prefix ahead of the padded payload.
    pub fn size(&self) -> usize {
        match self {
            Type::Int => 4,
            Type::Str => STRING_LEN + 4,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Str => write!(f, "string"),
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    /// Builds a string field, truncating the contents to [`STRING_LEN`]
    /// bytes on a character boundary.
    pub fn str(s: impl Into<String>) -> Field {
        let mut s = s.into();
        if s.len() > STRING_LEN {
            let mut end = STRING_LEN;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            s.truncate(end);
        }
        Field::Str(s)
    }

    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::Str,
        }
    }

    /// Writes the fixed-width encoding of this field.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        match self {
            Field::Int(v) => buf.put_i32(*v),
            Field::Str(s) => {
                let mut end = s.len().min(STRING_LEN);
                while !s.is_char_boundary(end) {
                    end -= 1;
                }
                buf.put_u32(end as u32);
                buf.put_slice(&s.as_bytes()[..end]);
                buf.put_bytes(0, STRING_LEN - end);
            }
        }
    }

    /// Reads one fixed-width field of the given type.
    pub fn parse(field_type: Type, buf: &mut impl Buf) -> Field {
        match field_type {
            Type::Int => Field::Int(buf.get_i32()),
            Type::Str => {
                let len = (buf.get_u32() as usize).min(STRING_LEN);
                let mut raw = [0u8; STRING_LEN];
                buf.copy_to_slice(&mut raw);
                Field::Str(String::from_utf8_lossy(&raw[..len]).into_owned())
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::Str(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone)]
struct TdItem {
    field_type: Type,
    name: Option<String>,
}

/// The schema of a tuple: an ordered, non-empty list of typed fields.
/// Field names are optional and ignored by equality.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(types: Vec<Type>, names: Vec<Option<String>>) -> TupleDesc {
        debug_assert!(!types.is_empty(), "a schema must have at least one field");
        debug_assert_eq!(types.len(), names.len());
        let items = types
            .into_iter()
            .zip(names)
            .map(|(field_type, name)| TdItem { field_type, name })
            .collect();
        TupleDesc { items }
    }

    pub fn unnamed(types: Vec<Type>) -> TupleDesc {
        let names = vec![None; types.len()];
        TupleDesc::new(types, names)
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> Type {
        self.items[i].field_type
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.items[i].name.as_deref()
    }

    pub fn index_for_field_name(&self, name: &str) -> Result<usize, DbError> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
            .ok_or_else(|| DbError::NoSuchField(name.to_string()))
    }

    /// Total on-disk size in bytes of a tuple with this schema.
    pub fn size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.size()).sum()
    }

    /// Concatenates two schemas into one.
    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let items = a.items.iter().chain(b.items.iter()).cloned().collect();
        TupleDesc { items }
    }

    pub fn types(&self) -> impl Iterator<Item = Type> + '_ {
        self.items.iter().map(|item| item.field_type)
    }
}

impl PartialEq for TupleDesc {
    /// Schemas are equal when their type sequences are equal; names are
    /// display metadata only.
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}({})", item.field_type, item.name.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}
