//! DebateStore - embedded document store for DebateDaemon
//!
//! Records are serialized to JSON and kept in a single SQLite database next to a
//! secondary index table, so callers can filter on a handful of declared fields
//! without a schema per record type.
//!
//! # Architecture
//!
//! ```text
//! {store_dir}/
//! └── debatestore.db
//!     ├── records        (collection, id, data, updated_at)
//!     └── record_index   (collection, id, field, value)
//! ```
//!
//! Besides plain CRUD the store offers the two primitives the deliberation
//! pipeline is built on:
//!
//! - [`WriteBatch`]: several writes committed in one transaction
//! - guarded writes ([`Write::InsertIfAbsent`], [`Write::UpdateIf`]) that abort
//!   the whole batch when the guard does not hold
//!
//! # Example
//!
//! ```ignore
//! use debatestore::{Store, WriteBatch};
//!
//! let mut store = Store::open(".debatestore")?;
//! let mut batch = WriteBatch::new();
//! batch.insert(&session)?;
//! batch.insert(&round)?;
//! let applied = store.commit(batch)?;
//! ```

mod batch;
mod error;
mod record;
mod store;

pub use batch::{BatchOp, Write, WriteBatch};
pub use error::{Result, StoreError};
pub use record::{Document, Filter, FilterOp, IndexValue, Record, now_ms};
pub use store::Store;

/// File name of the SQLite database inside the store directory
pub const DB_FILE_NAME: &str = "debatestore.db";
