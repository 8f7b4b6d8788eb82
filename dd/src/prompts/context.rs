//! Template contexts
//!
//! One serializable struct per template. Field names are the template
//! variables.

use serde::Serialize;

use crate::domain::{KnowledgeItem, Persona};

/// Variables for `statement-system`
#[derive(Debug, Clone, Serialize)]
pub struct StatementContext {
    pub name: String,
    pub persona: Persona,
    pub topic_title: String,
    pub topic_description: String,
    pub round_number: u32,
    pub max_rounds: u32,
    pub phase: String,
    pub phase_guidance: String,
    pub knowledge: Vec<KnowledgeNote>,
    pub strategy: Option<String>,
    pub directive: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeNote {
    pub title: String,
    pub content: String,
}

impl From<&KnowledgeItem> for KnowledgeNote {
    fn from(item: &KnowledgeItem) -> Self {
        Self {
            title: item.title.clone(),
            content: item.content.clone(),
        }
    }
}

/// Variables for `statement-user`
#[derive(Debug, Clone, Serialize)]
pub struct HistoryContext {
    pub name: String,
    /// Rendered compressed context; empty before anyone has spoken
    pub history: String,
}

/// Variables for `rolling-summary`
#[derive(Debug, Clone, Serialize)]
pub struct RollingSummaryContext {
    pub topic_title: String,
    pub round_number: u32,
    pub previous_round: Option<u32>,
    pub previous_summary: Option<String>,
    /// Rounds before the latest, rendered, when no previous digest exists
    pub earlier: Option<String>,
    pub latest: String,
}

/// Variables for `session-summary`
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummaryContext {
    pub topic_title: String,
    pub round_count: u32,
    pub transcript: String,
}

/// Variables for `verdict`
#[derive(Debug, Clone, Serialize)]
pub struct VerdictContext {
    pub topic_title: String,
    pub participants: Vec<SeatNote>,
    pub transcript: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeatNote {
    pub id: String,
    pub name: String,
}

/// Variables for `persona-update`
#[derive(Debug, Clone, Serialize)]
pub struct PersonaContext {
    pub name: String,
    pub persona: Persona,
    pub summary: Option<String>,
    pub feedback: Vec<String>,
}
