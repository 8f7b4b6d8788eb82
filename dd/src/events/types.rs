//! Event types for pipeline activity
//!
//! These events represent the observable activity of the deliberation
//! pipeline:
//! - Session lifecycle (created, cancelled, completed)
//! - Round lifecycle (dispatched, completed)
//! - Generation (statement recorded, generation failed, persona updated)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Core event enum - the vocabulary of pipeline activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DebateEvent {
    // === Session Lifecycle ===
    /// The scheduler opened a session with a seated roster
    SessionCreated {
        session_id: String,
        topic_id: String,
        participant_count: u32,
    },
    /// The scheduler could not seat anyone for a planned session
    SessionCancelled { session_id: String, topic_id: String },
    /// The final round closed and the session was scored
    SessionCompleted {
        session_id: String,
        /// True when the summary or the verdict is a placeholder
        degraded: bool,
    },

    // === Round Lifecycle ===
    /// A round's chain head was enqueued
    RoundDispatched {
        session_id: String,
        round_number: u32,
        participant_id: String,
        /// True when a stalled chain was re-driven
        resumed: bool,
    },
    /// The last participant finished and the round was closed
    RoundCompleted { session_id: String, round_number: u32 },

    // === Generation ===
    /// A statement was persisted
    StatementRecorded {
        session_id: String,
        round_number: u32,
        participant_id: String,
        speaking_order: u32,
    },
    /// A participant's generation failed; the chain moved on or was deferred
    GenerationFailed {
        session_id: String,
        round_number: u32,
        participant_id: String,
        error: String,
        deferred: bool,
    },
    /// A participant's persona absorbed feedback
    PersonaUpdated {
        session_id: String,
        participant_id: String,
        version: u32,
    },
}

impl DebateEvent {
    /// Get the session ID for this event
    pub fn session_id(&self) -> &str {
        match self {
            DebateEvent::SessionCreated { session_id, .. }
            | DebateEvent::SessionCancelled { session_id, .. }
            | DebateEvent::SessionCompleted { session_id, .. }
            | DebateEvent::RoundDispatched { session_id, .. }
            | DebateEvent::RoundCompleted { session_id, .. }
            | DebateEvent::StatementRecorded { session_id, .. }
            | DebateEvent::GenerationFailed { session_id, .. }
            | DebateEvent::PersonaUpdated { session_id, .. } => session_id,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            DebateEvent::SessionCreated { .. } => "SessionCreated",
            DebateEvent::SessionCancelled { .. } => "SessionCancelled",
            DebateEvent::SessionCompleted { .. } => "SessionCompleted",
            DebateEvent::RoundDispatched { .. } => "RoundDispatched",
            DebateEvent::RoundCompleted { .. } => "RoundCompleted",
            DebateEvent::StatementRecorded { .. } => "StatementRecorded",
            DebateEvent::GenerationFailed { .. } => "GenerationFailed",
            DebateEvent::PersonaUpdated { .. } => "PersonaUpdated",
        }
    }

    /// True for the last event a session ever emits
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DebateEvent::SessionCompleted { .. } | DebateEvent::SessionCancelled { .. }
        )
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: DebateEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: DebateEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_session_id() {
        let event = DebateEvent::RoundCompleted {
            session_id: "s-1".to_string(),
            round_number: 2,
        };
        assert_eq!(event.session_id(), "s-1");
        assert_eq!(event.event_type(), "RoundCompleted");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_event_serialization() {
        let event = DebateEvent::GenerationFailed {
            session_id: "s-1".to_string(),
            round_number: 1,
            participant_id: "p-1".to_string(),
            error: "boom".to_string(),
            deferred: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"GenerationFailed\""));

        let parsed: DebateEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id(), "s-1");
    }

    #[test]
    fn test_event_log_entry() {
        let entry = EventLogEntry::new(DebateEvent::SessionCompleted {
            session_id: "s-1".to_string(),
            degraded: false,
        });
        assert!(entry.event.is_terminal());

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("ts"));
        assert!(json.contains("SessionCompleted"));
    }
}
