//! Session, roster and verdict domain types

use debatestore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::id::{generate_id, roster_id};
use super::mode::DebateMode;

/// Session lifecycle status
///
/// Transitions are monotonic: pending -> active -> completed, or
/// pending -> cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Whether the status machine allows moving to `next`
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::Active)
                | (SessionStatus::Pending, SessionStatus::Cancelled)
                | (SessionStatus::Active, SessionStatus::Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" | "canceled" => Ok(SessionStatus::Cancelled),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Score of one participant on the four judging axes (0-10 each)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantScore {
    pub participant_id: String,
    pub logic: f32,
    pub evidence: f32,
    pub persuasiveness: f32,
    pub consistency: f32,
}

impl ParticipantScore {
    pub fn total(&self) -> f32 {
        self.logic + self.evidence + self.persuasiveness + self.consistency
    }
}

/// Judgement of a closed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub scores: Vec<ParticipantScore>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub rationale: String,
    /// True when scoring failed and this verdict stands in for one
    #[serde(default)]
    pub placeholder: bool,
}

impl Verdict {
    /// Stand-in verdict used when scoring could not be generated
    pub fn placeholder() -> Self {
        Self {
            scores: Vec::new(),
            winner: None,
            rationale: "Verdict unavailable: scoring could not be generated.".to_string(),
            placeholder: true,
        }
    }
}

/// A scheduled deliberation on one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub topic_id: String,
    pub status: SessionStatus,
    pub mode: DebateMode,
    pub participant_count: u32,

    /// Highest completed round (0 before round 1 completes)
    pub current_round: u32,
    pub max_rounds: u32,

    pub summary: Option<String>,
    pub verdict: Option<Verdict>,

    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,

    /// When a closer claimed the session; at most one close runs per claim
    #[serde(default)]
    pub closing_at: Option<i64>,
}

impl Session {
    /// Create a pending session for a topic
    pub fn new(topic_id: impl Into<String>, topic_title: &str, mode: DebateMode) -> Self {
        let id = generate_id("session", topic_title);
        Self::with_id(id, topic_id, mode)
    }

    /// Create a pending session with a known ID
    pub fn with_id(id: impl Into<String>, topic_id: impl Into<String>, mode: DebateMode) -> Self {
        let now = now_ms();
        let session = Self {
            id: id.into(),
            topic_id: topic_id.into(),
            status: SessionStatus::Pending,
            mode,
            participant_count: 0,
            current_round: 0,
            max_rounds: mode.max_rounds(),
            summary: None,
            verdict: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            closing_at: None,
        };
        debug!(id = %session.id, %mode, "Session::with_id: called");
        session
    }

    /// pending -> active with a seated roster
    pub fn activate(&mut self, participant_count: u32, now: i64) {
        debug!(id = %self.id, participant_count, "Session::activate: called");
        self.participant_count = participant_count;
        self.status = SessionStatus::Active;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// pending -> cancelled
    pub fn cancel(&mut self, now: i64) {
        debug!(id = %self.id, "Session::cancel: called");
        self.status = SessionStatus::Cancelled;
        self.updated_at = now;
    }

    /// Record that `round_number` completed; never moves backwards or past
    /// `max_rounds`
    pub fn advance_round(&mut self, round_number: u32, now: i64) {
        let next = self.current_round.max(round_number).min(self.max_rounds);
        debug!(id = %self.id, from = self.current_round, to = next, "Session::advance_round: called");
        self.current_round = next;
        self.updated_at = now;
    }

    /// Stamp the close claim; the stored stamp is the guard for the next claimer
    pub fn claim_close(&mut self, now: i64) {
        debug!(id = %self.id, previous = ?self.closing_at, "Session::claim_close: called");
        self.closing_at = Some(now);
        self.updated_at = now;
    }

    /// A close claimed less than `lease_ms` ago is still owned by its closer
    pub fn has_fresh_close_claim(&self, now: i64, lease_ms: i64) -> bool {
        self.closing_at.is_some_and(|at| now - at < lease_ms)
    }

    /// active -> completed with the closing artifacts
    pub fn complete(&mut self, summary: String, verdict: Verdict, now: i64) {
        debug!(id = %self.id, placeholder = verdict.placeholder, "Session::complete: called");
        self.summary = Some(summary);
        self.verdict = Some(verdict);
        self.status = SessionStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// True once every round has completed
    pub fn is_on_final_round(&self, round_number: u32) -> bool {
        round_number >= self.max_rounds
    }
}

impl Record for Session {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "sessions"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        debug!(id = %self.id, "Session::indexed_fields: called");
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("topic_id".to_string(), IndexValue::String(self.topic_id.clone()));
        fields.insert("mode".to_string(), IndexValue::String(self.mode.to_string()));
        fields.insert("closing_at".to_string(), IndexValue::Int(self.closing_at.unwrap_or(0)));
        fields
    }
}

/// A participant's seat in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParticipant {
    /// Derived from (session, participant)
    pub id: String,
    pub session_id: String,
    pub participant_id: String,

    /// 1-based, gapless within the session
    pub speaking_order: u32,

    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionParticipant {
    pub fn new(session_id: impl Into<String>, participant_id: impl Into<String>, speaking_order: u32) -> Self {
        let session_id = session_id.into();
        let participant_id = participant_id.into();
        let now = now_ms();
        Self {
            id: roster_id(&session_id, &participant_id),
            session_id,
            participant_id,
            speaking_order,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for SessionParticipant {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "session_participants"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("session_id".to_string(), IndexValue::String(self.session_id.clone()));
        fields.insert(
            "participant_id".to_string(),
            IndexValue::String(self.participant_id.clone()),
        );
        fields
    }
}
