//! Participant domain type
//!
//! A participant is an agent with a persona. The persona is versioned and only
//! rewritten after a session closes, from the feedback its owner left.

use debatestore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::id::generate_id;

/// Participant availability for scheduling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    #[default]
    Active,
    /// Benched; never scheduled
    Reserve,
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantStatus::Active => write!(f, "active"),
            ParticipantStatus::Reserve => write!(f, "reserve"),
        }
    }
}

/// Personality profile that frames every statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    #[serde(default)]
    pub core_values: Vec<String>,
    #[serde(default)]
    pub thinking_style: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub background: String,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            core_values: Vec::new(),
            thinking_style: String::new(),
            traits: Vec::new(),
            background: String::new(),
            version: default_version(),
        }
    }
}

/// An agent that takes part in sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,

    /// Owning user reference (opaque to the pipeline)
    pub owner_id: String,

    pub name: String,
    pub persona: Persona,
    pub status: ParticipantStatus,

    /// Last time the participant was active (ms since epoch)
    pub last_active_at: i64,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Participant {
    /// Create an active participant with a generated ID
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>, persona: Persona) -> Self {
        let name = name.into();
        let id = generate_id("agent", &name);
        Self::with_id(id, owner_id, name, persona)
    }

    /// Create an active participant with a known ID
    pub fn with_id(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        persona: Persona,
    ) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            persona,
            status: ParticipantStatus::Active,
            last_active_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the scheduler may seat this participant at `now`
    pub fn is_eligible(&self, now: i64, activity_window_ms: i64) -> bool {
        let eligible = self.status == ParticipantStatus::Active && self.last_active_at >= now - activity_window_ms;
        debug!(id = %self.id, status = %self.status, eligible, "is_eligible: called");
        eligible
    }

    /// Replace the persona, bumping its version past the current one
    pub fn apply_persona(&mut self, mut persona: Persona) {
        persona.version = self.persona.version + 1;
        debug!(id = %self.id, version = persona.version, "apply_persona: called");
        self.persona = persona;
        self.updated_at = now_ms();
    }

    pub fn set_status(&mut self, status: ParticipantStatus) {
        debug!(id = %self.id, %status, "set_status: called");
        self.status = status;
        self.updated_at = now_ms();
    }
}

impl Record for Participant {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "participants"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("owner_id".to_string(), IndexValue::String(self.owner_id.clone()));
        fields.insert("last_active_at".to_string(), IndexValue::Int(self.last_active_at));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;

    #[test]
    fn test_eligibility() {
        let now = now_ms();
        let mut p = Participant::with_id("p1", "u1", "Ada", Persona::default());

        p.last_active_at = now - HOUR_MS;
        assert!(p.is_eligible(now, 2 * HOUR_MS));
        assert!(!p.is_eligible(now, HOUR_MS / 2));

        p.set_status(ParticipantStatus::Reserve);
        assert!(!p.is_eligible(now, 2 * HOUR_MS));
    }

    #[test]
    fn test_apply_persona_bumps_version() {
        let mut p = Participant::with_id("p1", "u1", "Ada", Persona::default());
        assert_eq!(p.persona.version, 1);

        let revised = Persona {
            core_values: vec!["rigor".to_string()],
            version: 99,
            ..Default::default()
        };
        p.apply_persona(revised);
        assert_eq!(p.persona.version, 2);
        assert_eq!(p.persona.core_values, vec!["rigor"]);
    }

    #[test]
    fn test_persona_yaml_defaults_version() {
        let persona: Persona = serde_yaml::from_str("thinking_style: skeptical\nbackground: physicist\n").unwrap();
        assert_eq!(persona.version, 1);
        assert_eq!(persona.background, "physicist");
        assert_eq!(persona.thinking_style, "skeptical");
        assert!(persona.traits.is_empty());
    }
}
