//! Knowledge items and steering inputs
//!
//! Both are private to one participant. Steering comes in three kinds:
//! directives aimed at one (session, round), standing strategy notes (the
//! latest wins), and feedback consumed by the next persona update.

use debatestore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::id::generate_id;

/// Reference material a participant may draw on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub participant_id: String,
    pub title: String,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl KnowledgeItem {
    pub fn new(participant_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        let title = title.into();
        let now = now_ms();
        Self {
            id: generate_id("knowledge", &title),
            participant_id: participant_id.into(),
            title,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for KnowledgeItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "knowledge_items"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert(
            "participant_id".to_string(),
            IndexValue::String(self.participant_id.clone()),
        );
        fields
    }
}

/// Kind of steering input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteeringKind {
    Directive,
    Strategy,
    Feedback,
}

impl fmt::Display for SteeringKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SteeringKind::Directive => write!(f, "directive"),
            SteeringKind::Strategy => write!(f, "strategy"),
            SteeringKind::Feedback => write!(f, "feedback"),
        }
    }
}

/// Owner guidance for a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteeringInput {
    pub id: String,
    pub participant_id: String,
    pub kind: SteeringKind,

    /// Directive targeting
    pub session_id: Option<String>,
    pub round_number: Option<u32>,

    pub content: String,

    /// Set once feedback has been folded into the persona
    pub applied_at: Option<i64>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl SteeringInput {
    pub fn new(participant_id: impl Into<String>, kind: SteeringKind, content: impl Into<String>) -> Self {
        let participant_id = participant_id.into();
        let now = now_ms();
        Self {
            id: generate_id(&kind.to_string(), &participant_id),
            participant_id,
            kind,
            session_id: None,
            round_number: None,
            content: content.into(),
            applied_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: aim a directive at one session round
    pub fn targeting(mut self, session_id: impl Into<String>, round_number: u32) -> Self {
        self.session_id = Some(session_id.into());
        self.round_number = Some(round_number);
        self
    }

    /// Whether a directive applies to this (session, round)
    pub fn targets(&self, session_id: &str, round_number: u32) -> bool {
        self.session_id.as_deref() == Some(session_id) && self.round_number == Some(round_number)
    }

    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }

    pub fn mark_applied(&mut self, now: i64) {
        debug!(id = %self.id, "SteeringInput::mark_applied: called");
        self.applied_at = Some(now);
        self.updated_at = now;
    }
}

impl Record for SteeringInput {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "steering_inputs"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert(
            "participant_id".to_string(),
            IndexValue::String(self.participant_id.clone()),
        );
        fields.insert("kind".to_string(), IndexValue::String(self.kind.to_string()));
        fields.insert("applied".to_string(), IndexValue::Bool(self.is_applied()));
        fields
    }
}
