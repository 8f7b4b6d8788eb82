//! Decoding of structured model replies
//!
//! Models are asked for JSON but do not always comply. Statements fall back
//! to the raw text; verdicts and personas fail instead, and the caller
//! substitutes a placeholder or keeps the old persona.

use std::collections::HashSet;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::domain::{ParticipantScore, Persona, Verdict};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("No JSON object in reply")]
    NoJson,

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reply had no usable content: {0}")]
    Empty(&'static str),
}

/// A statement as returned by the model
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedStatement {
    pub content: String,
    pub summary: Option<String>,
    pub reasoning: Option<String>,
}

#[derive(Deserialize)]
struct RawStatement {
    #[serde(default, alias = "content")]
    statement: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(default)]
    scores: Vec<ParticipantScore>,
    #[serde(default)]
    winner: Option<String>,
    #[serde(default)]
    rationale: String,
}

#[derive(Deserialize)]
struct RawPersona {
    core_values: Option<Vec<String>>,
    thinking_style: Option<String>,
    traits: Option<Vec<String>>,
    background: Option<String>,
}

/// Find a JSON object in a reply that may carry surrounding prose
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return Some(text[json_start..json_start + end].trim());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start { Some(&text[start..=end]) } else { None }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Decode a statement reply; plain text is taken as the statement itself
pub fn parse_statement(text: &str) -> GeneratedStatement {
    debug!(len = text.len(), "parse_statement: called");
    let parsed = extract_json_block(text).and_then(|block| serde_json::from_str::<RawStatement>(block).ok());

    match parsed {
        Some(raw) if !raw.statement.trim().is_empty() => GeneratedStatement {
            content: raw.statement.trim().to_string(),
            summary: non_blank(raw.summary),
            reasoning: non_blank(raw.reasoning),
        },
        _ => GeneratedStatement {
            content: text.trim().to_string(),
            summary: None,
            reasoning: None,
        },
    }
}

/// Decode a verdict, keeping only scores for seated participants
///
/// Scores are clamped to 0..=10. An unknown or missing winner is replaced by
/// the highest total; a verdict with no valid scores is an error.
pub fn parse_verdict(text: &str, participant_ids: &[String]) -> Result<Verdict, DecodeError> {
    debug!(len = text.len(), seats = participant_ids.len(), "parse_verdict: called");
    let block = extract_json_block(text).ok_or(DecodeError::NoJson)?;
    let raw: RawVerdict = serde_json::from_str(block)?;

    let seated: HashSet<&str> = participant_ids.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let scores: Vec<ParticipantScore> = raw
        .scores
        .into_iter()
        .filter(|s| seated.contains(s.participant_id.as_str()))
        .filter(|s| seen.insert(s.participant_id.clone()))
        .map(|s| ParticipantScore {
            logic: s.logic.clamp(0.0, 10.0),
            evidence: s.evidence.clamp(0.0, 10.0),
            persuasiveness: s.persuasiveness.clamp(0.0, 10.0),
            consistency: s.consistency.clamp(0.0, 10.0),
            participant_id: s.participant_id,
        })
        .collect();

    if scores.is_empty() {
        return Err(DecodeError::Empty("verdict scores"));
    }

    let winner = match raw.winner {
        Some(w) if seated.contains(w.as_str()) => Some(w),
        _ => scores
            .iter()
            .max_by(|a, b| a.total().total_cmp(&b.total()))
            .map(|s| s.participant_id.clone()),
    };

    Ok(Verdict {
        scores,
        winner,
        rationale: raw.rationale.trim().to_string(),
        placeholder: false,
    })
}

/// Decode a persona revision on top of `current`; omitted fields are kept
///
/// The version is not touched here; see [`crate::domain::Participant::apply_persona`].
pub fn parse_persona(text: &str, current: &Persona) -> Result<Persona, DecodeError> {
    debug!(len = text.len(), "parse_persona: called");
    let block = extract_json_block(text).ok_or(DecodeError::NoJson)?;
    let raw: RawPersona = serde_json::from_str(block)?;

    if raw.core_values.is_none() && raw.thinking_style.is_none() && raw.traits.is_none() && raw.background.is_none() {
        return Err(DecodeError::Empty("persona fields"));
    }

    Ok(Persona {
        core_values: raw.core_values.unwrap_or_else(|| current.core_values.clone()),
        thinking_style: raw.thinking_style.unwrap_or_else(|| current.thinking_style.clone()),
        traits: raw.traits.unwrap_or_else(|| current.traits.clone()),
        background: raw.background.unwrap_or_else(|| current.background.clone()),
        version: current.version,
    })
}
