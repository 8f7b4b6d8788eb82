//! Atomic write batches

use crate::error::Result;
use crate::record::{Document, IndexValue, Record};

/// How a document is written
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create; fails the commit with `AlreadyExists` if the id is taken
    Insert,
    /// Create or replace
    Upsert,
    /// Replace; fails the commit with `NotFound` if missing
    Update,
    /// Create only if missing; otherwise the batch is rolled back
    InsertIfAbsent,
    /// Replace only if the stored index `field` equals `expected`; otherwise
    /// the batch is rolled back
    UpdateIf { field: String, expected: IndexValue },
}

/// One document write inside a batch
#[derive(Debug, Clone)]
pub struct BatchOp {
    pub doc: Document,
    pub write: Write,
}

/// Writes committed together in one transaction
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw document write
    pub fn push(&mut self, doc: Document, write: Write) {
        self.ops.push(BatchOp { doc, write });
    }

    pub fn insert<R: Record>(&mut self, record: &R) -> Result<()> {
        self.push(Document::from_record(record)?, Write::Insert);
        Ok(())
    }

    pub fn upsert<R: Record>(&mut self, record: &R) -> Result<()> {
        self.push(Document::from_record(record)?, Write::Upsert);
        Ok(())
    }

    pub fn update<R: Record>(&mut self, record: &R) -> Result<()> {
        self.push(Document::from_record(record)?, Write::Update);
        Ok(())
    }

    pub fn insert_if_absent<R: Record>(&mut self, record: &R) -> Result<()> {
        self.push(Document::from_record(record)?, Write::InsertIfAbsent);
        Ok(())
    }

    /// Replace `record` only while its stored `field` still equals `expected`
    pub fn update_if<R: Record>(
        &mut self,
        record: &R,
        field: impl Into<String>,
        expected: impl Into<IndexValue>,
    ) -> Result<()> {
        self.push(
            Document::from_record(record)?,
            Write::UpdateIf {
                field: field.into(),
                expected: expected.into(),
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}
