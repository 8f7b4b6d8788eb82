//! Pipeline events for observability
//!
//! Every significant pipeline transition emits a [`DebateEvent`] on the
//! [`EventBus`]. The [`EventLogger`] persists them as JSONL, one file per
//! session.
//!
//! ```text
//!   Scheduler        Dispatcher        Executor         Completion
//!   SessionCreated   RoundDispatched   StatementRecorded RoundCompleted
//!   SessionCancelled                   GenerationFailed  SessionCompleted
//!                                                        PersonaUpdated
//!          \               |                 |               /
//!           +--------------+---- EventBus ---+--------------+
//!                                  |
//!                       sessions/{id}/events.jsonl
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, create_event_bus};
pub use logger::{EventLogger, default_sessions_dir, read_session_events, spawn_event_logger};
pub use types::{DebateEvent, EventLogEntry};
