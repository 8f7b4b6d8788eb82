//! Record trait, index values and filters

use rusqlite::types::Value;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Current time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A value stored in the secondary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    pub(crate) fn to_sql(&self) -> Value {
        match self {
            IndexValue::String(s) => Value::Text(s.clone()),
            IndexValue::Int(i) => Value::Integer(*i),
            IndexValue::Bool(b) => Value::Integer(i64::from(*b)),
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::String(s) => write!(f, "{}", s),
            IndexValue::Int(i) => write!(f, "{}", i),
            IndexValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::String(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        IndexValue::String(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        IndexValue::Int(value)
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        IndexValue::Bool(value)
    }
}

/// Comparison operator for a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }
}

/// Filter on an indexed field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    /// Equality filter, the common case
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }
}

/// A type that can be persisted in the store
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    /// Unique id within the collection
    fn id(&self) -> &str;

    /// Last modification time (ms since epoch)
    fn updated_at(&self) -> i64;

    /// Collection (table-like namespace) this record lives in
    fn collection_name() -> &'static str;

    /// Fields exposed to [`Filter`] queries
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}

/// A record in its stored form: JSON body plus index entries
///
/// Documents are what crosses thread and channel boundaries; they carry no
/// type parameter so one command enum can move any record kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub data: String,
    pub updated_at: i64,
    pub indexes: HashMap<String, IndexValue>,
}

impl Document {
    /// Serialize a record into a document
    pub fn from_record<R: Record>(record: &R) -> Result<Self> {
        Ok(Self {
            collection: R::collection_name().to_string(),
            id: record.id().to_string(),
            data: serde_json::to_string(record)?,
            updated_at: record.updated_at(),
            indexes: record.indexed_fields(),
        })
    }

    /// Deserialize the document body back into a record
    pub fn decode<R: Record>(&self) -> Result<R> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_value_conversions() {
        assert_eq!(IndexValue::from("a"), IndexValue::String("a".to_string()));
        assert_eq!(IndexValue::from(3_i64), IndexValue::Int(3));
        assert_eq!(IndexValue::from(true), IndexValue::Bool(true));
        assert_eq!(IndexValue::Bool(true).to_sql(), Value::Integer(1));
    }

    #[test]
    fn test_filter_eq() {
        let filter = Filter::eq("status", "active");
        assert_eq!(filter.field, "status");
        assert_eq!(filter.op, FilterOp::Eq);
        assert_eq!(filter.value, IndexValue::String("active".to_string()));
    }

    #[test]
    fn test_now_ms_is_positive() {
        assert!(now_ms() > 1_600_000_000_000);
    }
}
