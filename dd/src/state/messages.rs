//! State manager messages
//!
//! Commands and responses for the actor pattern. Commands carry untyped
//! [`Document`]s so one channel serves every record type; the typed API lives
//! on [`super::StateManager`].

use debatestore::{Document, Filter, StoreError, WriteBatch};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error")]
    ChannelError,
}

impl StateError {
    /// True when the actor is unreachable; callers treat this as an
    /// infrastructure failure rather than a data problem
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, StateError::ChannelError | StateError::StoreError(_))
    }
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => StateError::NotFound(format!("{}/{}", collection, id)),
            StoreError::AlreadyExists { collection, id } => StateError::Conflict(format!("{}/{}", collection, id)),
            StoreError::Json(e) => StateError::DeserializationError(e.to_string()),
            other => StateError::StoreError(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    Get {
        collection: String,
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Document>>>,
    },
    List {
        collection: String,
        filters: Vec<Filter>,
        reply: oneshot::Sender<StateResponse<Vec<Document>>>,
    },
    /// Apply a write batch atomically; replies `false` when a guard failed
    Commit {
        batch: WriteBatch,
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // Shutdown
    Shutdown,
}
