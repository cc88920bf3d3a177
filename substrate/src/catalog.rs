//! The directory of tables.
//!
//! Maps table ids to their heap files, names, and primary keys, with a
//! secondary name index. A schema file with one table per line, in the
//! format `tablename (field1 type1 [pk], field2 type2, ...)`, can be
//! loaded with [`Catalog::load_schema`]; each table's data file is
//! resolved as `<catalog dir>/<tablename>.dat`.

use crate::errors::DbError;
use crate::heap_file::HeapFile;
use crate::types::{TupleDesc, Type};
use chumsky::prelude::*;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, RwLock};

#[derive(Debug)]
struct TableEntry {
    file: Arc<HeapFile>,
    name: String,
    pkey: Option<String>,
}

#[derive(Debug, Default)]
struct CatalogState {
    tables: HashMap<u32, TableEntry>,
    names: HashMap<String, u32>,
}

/// The catalog is read-mostly: it is populated before execution starts and
/// only consulted afterwards, so a single `RwLock` over both maps suffices.
#[derive(Debug, Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new() -> Catalog {
        Catalog::default()
    }

    /// Registers a table, replacing any existing table with the same name
    /// or the same id. A *different* backing path that hashes to an
    /// existing id is rejected rather than silently merged.
    pub fn add_table(
        &self,
        file: HeapFile,
        name: &str,
        pkey: Option<&str>,
    ) -> Result<(), DbError> {
        let id = file.id();
        let mut state = self.state.write().unwrap();

        if let Some(existing) = state.tables.get(&id) {
            if existing.file.path() != file.path() {
                return Err(DbError::TableIdCollision(id));
            }
        }

        if let Some(old_id) = state.names.remove(name) {
            state.tables.remove(&old_id);
        }
        if let Some(old) = state.tables.remove(&id) {
            state.names.remove(&old.name);
        }

        state.tables.insert(
            id,
            TableEntry {
                file: Arc::new(file),
                name: name.to_string(),
                pkey: pkey.map(String::from),
            },
        );
        state.names.insert(name.to_string(), id);
        Ok(())
    }

    pub fn table_id(&self, name: &str) -> Result<u32, DbError> {
        let state = self.state.read().unwrap();
        state
            .names
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NoSuchTable(name.to_string()))
    }

    pub fn database_file(&self, table_id: u32) -> Result<Arc<HeapFile>, DbError> {
        let state = self.state.read().unwrap();
        state
            .tables
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.file))
            .ok_or_else(|| DbError::NoSuchTable(format!("id {table_id}")))
    }

    pub fn tuple_desc(&self, table_id: u32) -> Result<TupleDesc, DbError> {
        Ok(self.database_file(table_id)?.tuple_desc().clone())
    }

    pub fn table_name(&self, table_id: u32) -> Result<String, DbError> {
        let state = self.state.read().unwrap();
        state
            .tables
            .get(&table_id)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| DbError::NoSuchTable(format!("id {table_id}")))
    }

    pub fn primary_key(&self, table_id: u32) -> Result<Option<String>, DbError> {
        let state = self.state.read().unwrap();
        state
            .tables
            .get(&table_id)
            .map(|entry| entry.pkey.clone())
            .ok_or_else(|| DbError::NoSuchTable(format!("id {table_id}")))
    }

    pub fn table_ids(&self) -> Vec<u32> {
        self.state.read().unwrap().tables.keys().copied().collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        state.tables.clear();
        state.names.clear();
    }

    /// Reads a schema file and registers one table per non-empty line.
    pub fn load_schema(&self, catalog_file: impl AsRef<Path>) -> Result<(), DbError> {
        let catalog_file = std::path::absolute(catalog_file)?;
        let base_dir = catalog_file
            .parent()
            .ok_or_else(|| DbError::InvalidCatalogLine("catalog file has no parent".into()))?
            .to_path_buf();

        let reader = BufReader::new(std::fs::File::open(&catalog_file)?);
        let parser = table_line_parser();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let def = parser
                .parse(line.as_str())
                .map_err(|_| DbError::InvalidCatalogLine(line.clone()))?;
            if def.columns.iter().filter(|c| c.primary_key).count() > 1 {
                return Err(DbError::InvalidCatalogLine(line.clone()));
            }

            let pkey = def
                .columns
                .iter()
                .find(|c| c.primary_key)
                .map(|c| c.name.clone());
            let types = def.columns.iter().map(|c| c.field_type).collect();
            let names = def
                .columns
                .iter()
                .map(|c| Some(c.name.clone()))
                .collect();
            let td = TupleDesc::new(types, names);

            let data_path = base_dir.join(format!("{}.dat", def.name));
            let file = HeapFile::new(data_path, td)?;
            crate::substrate_debug_log!(
                "[Catalog::load_schema] added table {} with id {}",
                def.name,
                file.id()
            );
            self.add_table(file, &def.name, pkey.as_deref())?;
        }
        Ok(())
    }
}

struct TableDef {
    name: String,
    columns: Vec<ColumnDef>,
}

struct ColumnDef {
    name: String,
    field_type: Type,
    primary_key: bool,
}

fn table_line_parser() -> impl Parser<char, TableDef, Error = Simple<char>> {
    let ident = || text::ident::<char, Simple<char>>().padded();

    let field_type = ident().try_map(|ty: String, span| match ty.to_ascii_lowercase().as_str() {
        "int" => Ok(Type::Int),
        "string" => Ok(Type::Str),
        _ => Err(Simple::custom(span, format!("unknown type {ty}"))),
    });

    let column = ident()
        .then(field_type)
        .then(just("pk").padded().or_not())
        .map(|((name, field_type), pk)| ColumnDef {
            name,
            field_type,
            primary_key: pk.is_some(),
        });

    ident()
        .then(
            column
                .separated_by(just(',').padded())
                .at_least(1)
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .then_ignore(end())
        .map(|(name, columns)| TableDef { name, columns })
}
