//! Round and Statement domain types

use debatestore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::id::{round_id, statement_id};

/// Round lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Created, waiting for the dispatcher
    #[default]
    Pending,
    /// Chain in flight
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Pending => write!(f, "pending"),
            RoundStatus::Processing => write!(f, "processing"),
            RoundStatus::Completed => write!(f, "completed"),
            RoundStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One pass of every seated participant speaking once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// Derived from (session, round_number)
    pub id: String,
    pub session_id: String,

    /// 1-based, contiguous within the session
    pub round_number: u32,

    pub status: RoundStatus,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,

    /// Stamped on dispatch and every chain step; drives stall detection
    pub last_progress_at: Option<i64>,

    /// Cumulative digest of rounds 1..=round_number
    pub rolling_summary: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Round {
    /// Create a pending round
    pub fn new(session_id: impl Into<String>, round_number: u32) -> Self {
        let session_id = session_id.into();
        let now = now_ms();
        debug!(%session_id, round_number, "Round::new: called");
        Self {
            id: round_id(&session_id, round_number),
            session_id,
            round_number,
            status: RoundStatus::Pending,
            started_at: None,
            completed_at: None,
            last_progress_at: None,
            rolling_summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enter (or re-enter, for a stalled chain) the processing state
    pub fn mark_processing(&mut self, now: i64) {
        debug!(id = %self.id, from = %self.status, "Round::mark_processing: called");
        self.status = RoundStatus::Processing;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.last_progress_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: i64) {
        debug!(id = %self.id, "Round::mark_completed: called");
        self.status = RoundStatus::Completed;
        self.completed_at = Some(now);
        self.last_progress_at = Some(now);
        self.updated_at = now;
    }

    /// Abandon a round that can never run
    pub fn mark_failed(&mut self, now: i64) {
        debug!(id = %self.id, from = %self.status, "Round::mark_failed: called");
        self.status = RoundStatus::Failed;
        self.updated_at = now;
    }

    pub fn touch_progress(&mut self, now: i64) {
        self.last_progress_at = Some(now);
        self.updated_at = now;
    }

    /// A processing round whose chain has not moved for `timeout_ms`
    pub fn is_stalled(&self, now: i64, timeout_ms: i64) -> bool {
        if self.status != RoundStatus::Processing {
            return false;
        }
        let last = self.last_progress_at.or(self.started_at).unwrap_or(self.updated_at);
        now - last >= timeout_ms
    }
}

impl Record for Round {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "rounds"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        debug!(id = %self.id, "Round::indexed_fields: called");
        let mut fields = HashMap::new();
        fields.insert("session_id".to_string(), IndexValue::String(self.session_id.clone()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("round_number".to_string(), IndexValue::Int(self.round_number as i64));
        fields
    }
}

/// A participant's contribution to a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Derived from (round, participant)
    pub id: String,
    pub round_id: String,
    pub session_id: String,
    pub participant_id: String,
    pub round_number: u32,
    pub speaking_order: u32,

    pub content: String,

    /// Short form used when the statement is abridged in later context
    pub summary: Option<String>,

    /// Optional reasoning trace returned alongside the statement
    pub reasoning: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Statement {
    pub fn new(
        round: &Round,
        participant_id: impl Into<String>,
        speaking_order: u32,
        content: impl Into<String>,
    ) -> Self {
        let participant_id = participant_id.into();
        let now = now_ms();
        Self {
            id: statement_id(&round.id, &participant_id),
            round_id: round.id.clone(),
            session_id: round.session_id.clone(),
            participant_id,
            round_number: round.round_number,
            speaking_order,
            content: content.into(),
            summary: None,
            reasoning: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning = reasoning;
        self
    }

    /// Summary when present, otherwise the full content
    pub fn abridged(&self) -> &str {
        self.summary.as_deref().unwrap_or(&self.content)
    }
}

impl Record for Statement {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "statements"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("round_id".to_string(), IndexValue::String(self.round_id.clone()));
        fields.insert("session_id".to_string(), IndexValue::String(self.session_id.clone()));
        fields.insert(
            "participant_id".to_string(),
            IndexValue::String(self.participant_id.clone()),
        );
        fields
    }
}
