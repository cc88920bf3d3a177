// Not every test binary exercises every helper.
#![allow(dead_code)]

use substrate::db::Database;
use substrate::heap_file::HeapFile;
use substrate::transaction::TransactionId;
use substrate::tuple::Tuple;
use substrate::types::{Field, TupleDesc, Type};
use tempfile::TempDir;

/// A database with one registered table, backed by a scratch directory
/// that lives as long as the handle.
pub struct TestDb {
    pub db: Database,
    pub table_id: u32,
    pub td: TupleDesc,
    _dir: TempDir,
}

pub fn id_name_desc() -> TupleDesc {
    TupleDesc::new(
        vec![Type::Int, Type::Str],
        vec![Some("id".into()), Some("name".into())],
    )
}

/// An empty table named `name` with the given schema, in a fresh database.
pub fn setup_table(name: &str, td: TupleDesc, pool_capacity: usize) -> TestDb {
    let dir = TempDir::new().unwrap();
    let db = Database::with_capacity(pool_capacity);
    let file = HeapFile::new(dir.path().join(format!("{name}.dat")), td.clone()).unwrap();
    db.catalog().add_table(file, name, None).unwrap();
    let table_id = db.catalog().table_id(name).unwrap();
    TestDb {
        db,
        table_id,
        td,
        _dir: dir,
    }
}

pub fn row(td: &TupleDesc, id: i32, name: &str) -> Tuple {
    let mut t = Tuple::new(td.clone());
    t.set_field(0, Field::Int(id));
    t.set_field(1, Field::str(name));
    t
}

/// Inserts the given rows in one committed transaction.
pub fn insert_committed(test_db: &TestDb, rows: &[(i32, &str)]) {
    let tid = TransactionId::new();
    for &(id, name) in rows {
        let mut t = row(&test_db.td, id, name);
        test_db.db.insert_tuple(tid, test_db.table_id, &mut t).unwrap();
    }
    test_db.db.transaction_complete(tid, true).unwrap();
}

/// Scans the whole table in a fresh committed transaction and returns the
/// `(id, name)` pairs in storage order.
pub fn scan_pairs(test_db: &TestDb) -> Vec<(i32, String)> {
    use granite::{OpIterator, SeqScan};

    let tid = TransactionId::new();
    let mut scan = SeqScan::new(&test_db.db, tid, test_db.table_id, Some("t")).unwrap();
    scan.open().unwrap();
    let mut out = Vec::new();
    while scan.has_next().unwrap() {
        let t = scan.next().unwrap();
        let Field::Int(id) = *t.field(0) else { panic!() };
        let Field::Str(name) = t.field(1).clone() else {
            panic!()
        };
        out.push((id, name));
    }
    scan.close();
    test_db.db.transaction_complete(tid, true).unwrap();
    out
}
