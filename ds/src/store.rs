//! SQLite-backed store

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::DB_FILE_NAME;
use crate::batch::{BatchOp, Write, WriteBatch};
use crate::error::{Result, StoreError};
use crate::record::{Document, Filter, IndexValue, Record};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE TABLE IF NOT EXISTS record_index (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    field TEXT NOT NULL,
    value,
    PRIMARY KEY (collection, id, field)
);

CREATE INDEX IF NOT EXISTS idx_record_index_lookup
    ON record_index (collection, field, value);
"#;

/// Document store over a single SQLite connection
///
/// The store is not `Sync`; callers share it by owning it in one task (see the
/// state actor in `debatedaemon`).
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open or create a store inside `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        debug!(dir = %dir.display(), "open: called");
        fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE_NAME);
        let conn = Connection::open(&path)?;
        bootstrap(&conn)?;
        info!(path = %path.display(), "Opened debate store");
        Ok(Self { conn, path: Some(path) })
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        debug!("open_in_memory: called");
        let conn = Connection::open_in_memory()?;
        bootstrap(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Database file path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // === Typed operations ===

    /// Insert a new record, failing if the id already exists
    pub fn create<R: Record>(&mut self, record: R) -> Result<String> {
        debug!(collection = R::collection_name(), id = record.id(), "create: called");
        let id = record.id().to_string();
        let mut batch = WriteBatch::new();
        batch.insert(&record)?;
        self.commit(batch)?;
        Ok(id)
    }

    /// Get a record by id
    pub fn get<R: Record>(&self, id: &str) -> Result<Option<R>> {
        debug!(collection = R::collection_name(), %id, "get: called");
        self.get_document(R::collection_name(), id)?
            .map(|doc| doc.decode())
            .transpose()
    }

    /// Replace an existing record, failing if it does not exist
    pub fn update<R: Record>(&mut self, record: R) -> Result<()> {
        debug!(collection = R::collection_name(), id = record.id(), "update: called");
        let mut batch = WriteBatch::new();
        batch.update(&record)?;
        self.commit(batch)?;
        Ok(())
    }

    /// Insert or replace a record
    pub fn upsert<R: Record>(&mut self, record: R) -> Result<()> {
        debug!(collection = R::collection_name(), id = record.id(), "upsert: called");
        let mut batch = WriteBatch::new();
        batch.upsert(&record)?;
        self.commit(batch)?;
        Ok(())
    }

    /// Delete a record; returns whether anything was removed
    pub fn delete<R: Record>(&mut self, id: &str) -> Result<bool> {
        debug!(collection = R::collection_name(), %id, "delete: called");
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM record_index WHERE collection = ?1 AND id = ?2",
            params![R::collection_name(), id],
        )?;
        let removed = tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![R::collection_name(), id],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// List records matching every filter, in insertion order
    pub fn list<R: Record>(&self, filters: &[Filter]) -> Result<Vec<R>> {
        debug!(collection = R::collection_name(), filter_count = filters.len(), "list: called");
        self.list_documents(R::collection_name(), filters)?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    /// Recompute index rows for every record of a type
    ///
    /// Needed after the set of indexed fields of a record type changes.
    pub fn rebuild_indexes<R: Record>(&mut self) -> Result<usize> {
        debug!(collection = R::collection_name(), "rebuild_indexes: called");
        let records: Vec<R> = self.list(&[])?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM record_index WHERE collection = ?1",
            params![R::collection_name()],
        )?;
        for record in &records {
            write_indexes(&tx, R::collection_name(), record.id(), &record.indexed_fields())?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    // === Document operations ===

    /// Get a document by collection and id
    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        debug!(%collection, %id, "get_document: called");
        let row = self
            .conn
            .query_row(
                "SELECT data, updated_at FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            Some((data, updated_at)) => Ok(Some(Document {
                collection: collection.to_string(),
                id: id.to_string(),
                data,
                updated_at,
                indexes: load_indexes(&self.conn, collection, id)?,
            })),
            None => Ok(None),
        }
    }

    /// List documents of a collection matching every filter
    pub fn list_documents(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>> {
        debug!(%collection, filter_count = filters.len(), "list_documents: called");
        let mut sql = String::from("SELECT r.id, r.data, r.updated_at FROM records r WHERE r.collection = ?1");
        let mut values: Vec<Value> = vec![Value::Text(collection.to_string())];

        for filter in filters {
            let field_param = values.len() + 1;
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM record_index i WHERE i.collection = r.collection \
                 AND i.id = r.id AND i.field = ?{} AND i.value {} ?{})",
                field_param,
                filter.op.sql(),
                field_param + 1
            ));
            values.push(Value::Text(filter.field.clone()));
            values.push(filter.value.to_sql());
        }
        sql.push_str(" ORDER BY r.rowid");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, data, updated_at)| {
                let indexes = load_indexes(&self.conn, collection, &id)?;
                Ok(Document {
                    collection: collection.to_string(),
                    id,
                    data,
                    updated_at,
                    indexes,
                })
            })
            .collect()
    }

    /// Apply a batch in one transaction
    ///
    /// Returns `Ok(false)` and rolls everything back when a guarded write does
    /// not hold. Unguarded failures (duplicate insert, missing update target)
    /// are errors and also roll back.
    pub fn commit(&mut self, batch: WriteBatch) -> Result<bool> {
        debug!(op_count = batch.len(), "commit: called");
        let tx = self.conn.transaction()?;
        for op in batch.ops() {
            if !apply_op(&tx, op)? {
                debug!(
                    collection = %op.doc.collection,
                    id = %op.doc.id,
                    write = ?op.write,
                    "commit: guard failed, rolling back"
                );
                tx.rollback()?;
                return Ok(false);
            }
        }
        tx.commit()?;
        Ok(true)
    }
}

fn bootstrap(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn exists(conn: &Connection, collection: &str, id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn apply_op(conn: &Connection, op: &BatchOp) -> Result<bool> {
    let doc = &op.doc;
    let present = exists(conn, &doc.collection, &doc.id)?;

    match &op.write {
        Write::Insert => {
            if present {
                return Err(StoreError::AlreadyExists {
                    collection: doc.collection.clone(),
                    id: doc.id.clone(),
                });
            }
            insert_doc(conn, doc)?;
        }
        Write::InsertIfAbsent => {
            if present {
                return Ok(false);
            }
            insert_doc(conn, doc)?;
        }
        Write::Upsert => {
            if present {
                replace_doc(conn, doc)?;
            } else {
                insert_doc(conn, doc)?;
            }
        }
        Write::Update => {
            if !present {
                return Err(StoreError::NotFound {
                    collection: doc.collection.clone(),
                    id: doc.id.clone(),
                });
            }
            replace_doc(conn, doc)?;
        }
        Write::UpdateIf { field, expected } => {
            if !present {
                return Ok(false);
            }
            let current: Option<Value> = conn
                .query_row(
                    "SELECT value FROM record_index WHERE collection = ?1 AND id = ?2 AND field = ?3",
                    params![doc.collection, doc.id, field],
                    |row| row.get(0),
                )
                .optional()?;
            if current != Some(expected.to_sql()) {
                return Ok(false);
            }
            replace_doc(conn, doc)?;
        }
    }
    Ok(true)
}

fn insert_doc(conn: &Connection, doc: &Document) -> Result<()> {
    conn.execute(
        "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![doc.collection, doc.id, doc.data, doc.updated_at],
    )?;
    write_indexes(conn, &doc.collection, &doc.id, &doc.indexes)
}

fn replace_doc(conn: &Connection, doc: &Document) -> Result<()> {
    conn.execute(
        "UPDATE records SET data = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
        params![doc.collection, doc.id, doc.data, doc.updated_at],
    )?;
    conn.execute(
        "DELETE FROM record_index WHERE collection = ?1 AND id = ?2",
        params![doc.collection, doc.id],
    )?;
    write_indexes(conn, &doc.collection, &doc.id, &doc.indexes)
}

fn write_indexes(conn: &Connection, collection: &str, id: &str, indexes: &HashMap<String, IndexValue>) -> Result<()> {
    for (field, value) in indexes {
        conn.execute(
            "INSERT INTO record_index (collection, id, field, value) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, field, value.to_sql()],
        )?;
    }
    Ok(())
}

fn load_indexes(conn: &Connection, collection: &str, id: &str) -> Result<HashMap<String, IndexValue>> {
    let mut stmt = conn.prepare("SELECT field, value FROM record_index WHERE collection = ?1 AND id = ?2")?;
    let rows = stmt
        .query_map(params![collection, id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Value>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(field, value)| {
            let value = match value {
                Value::Text(s) => IndexValue::String(s),
                Value::Integer(i) => IndexValue::Int(i),
                _ => return None,
            };
            Some((field, value))
        })
        .collect())
}
