//! Context compressor
//!
//! Builds the bounded discussion history handed to the gateway for one
//! participant in one round.
//!
//! ```text
//!   R < C            Full: every prior round, every statement in full
//!   R >= C           Tiered:
//!                      summary  rolling digest stored on round R-3 (1..=R-3)
//!                      recent   round R-2, own statement full, others abridged
//!                      latest   round R-1 in full
//! ```
//!
//! Statements already made in round R by earlier speakers are carried
//! separately (see [`ContextCompressor::in_progress`]) and rendered after
//! the history in both shapes.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::domain::{Round, Statement};

/// One statement as it appears in a prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub participant_id: String,
    pub speaker: String,
    pub speaking_order: u32,
    pub text: String,
    /// True when `text` is the short summary rather than the full statement
    pub abridged: bool,
}

/// Statements of one round in speaking order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundTranscript {
    pub round_number: u32,
    pub entries: Vec<TranscriptEntry>,
}

impl RoundTranscript {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn render_into(&self, out: &mut String) {
        let _ = writeln!(out, "Round {}:", self.round_number);
        for entry in &self.entries {
            let marker = if entry.abridged { " (summary)" } else { "" };
            let _ = writeln!(out, "[{}] {}{}: {}", entry.speaking_order, entry.speaker, marker, entry.text);
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }
}

/// History payload for one generation call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompressedContext {
    /// Every prior round in full
    Full { rounds: Vec<RoundTranscript> },
    /// Rolling digest plus the two most recent rounds
    Tiered {
        summary: String,
        /// Last round the digest covers (R-3)
        summary_through: u32,
        recent: RoundTranscript,
        latest: RoundTranscript,
    },
}

impl CompressedContext {
    pub fn is_tiered(&self) -> bool {
        matches!(self, CompressedContext::Tiered { .. })
    }

    /// Render the history, then any statements already made this round
    pub fn render(&self, in_progress: Option<&RoundTranscript>) -> String {
        let mut out = String::new();
        match self {
            CompressedContext::Full { rounds } => {
                for round in rounds {
                    round.render_into(&mut out);
                    out.push('\n');
                }
            }
            CompressedContext::Tiered {
                summary,
                summary_through,
                recent,
                latest,
            } => {
                let _ = writeln!(out, "Digest of rounds 1-{}:\n{}\n", summary_through, summary.trim());
                recent.render_into(&mut out);
                out.push('\n');
                latest.render_into(&mut out);
                out.push('\n');
            }
        }
        if let Some(current) = in_progress.filter(|t| !t.is_empty()) {
            let _ = writeln!(out, "This round so far:");
            current.render_into(&mut out);
        }
        out.trim_end().to_string()
    }
}

/// Inputs for the rolling digest after one round
#[derive(Debug, Clone, PartialEq)]
pub struct RollingInputs {
    /// Digest stored on the previous round, with its round number
    pub previous: Option<(u32, String)>,
    /// Rounds before the latest, rendered in full, when no digest exists
    pub earlier: Option<String>,
    /// The round being digested
    pub latest: String,
}

/// Builds compressed history from stored rounds and statements
#[derive(Debug, Clone)]
pub struct ContextCompressor {
    threshold: u32,
}

impl ContextCompressor {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// History for `participant_id` speaking in round `round_number`
    ///
    /// `rounds` and `statements` are the session's records in any order.
    pub fn compress(
        &self,
        round_number: u32,
        participant_id: &str,
        rounds: &[Round],
        statements: &[Statement],
        names: &HashMap<String, String>,
    ) -> CompressedContext {
        debug!(round_number, %participant_id, threshold = self.threshold, "compress: called");

        if round_number >= self.threshold && round_number > 3 {
            let digest_round = round_number - 3;
            let summary = rounds
                .iter()
                .find(|r| r.round_number == digest_round)
                .and_then(|r| r.rolling_summary.as_deref())
                .filter(|s| !s.trim().is_empty());

            if let Some(summary) = summary {
                debug!(round_number, digest_round, "compress: tiered");
                return CompressedContext::Tiered {
                    summary: summary.to_string(),
                    summary_through: digest_round,
                    recent: transcript(round_number - 2, statements, names, Some(participant_id)),
                    latest: transcript(round_number - 1, statements, names, None),
                };
            }
            debug!(round_number, digest_round, "compress: no rolling summary, falling back to full history");
        }

        CompressedContext::Full {
            rounds: grouped(statements, names, |n| n < round_number),
        }
    }

    /// Every statement of the session, uncompressed
    pub fn full_history(&self, statements: &[Statement], names: &HashMap<String, String>) -> CompressedContext {
        CompressedContext::Full {
            rounds: grouped(statements, names, |_| true),
        }
    }

    /// Statements already made in `round_number`, in speaking order
    pub fn in_progress(
        &self,
        round_number: u32,
        statements: &[Statement],
        names: &HashMap<String, String>,
    ) -> RoundTranscript {
        transcript(round_number, statements, names, None)
    }

    /// Whether the digest after round `round_number` will ever be read
    ///
    /// Round k's digest is consumed by round k+3 once that round is at or
    /// past the threshold.
    pub fn needs_rolling_summary(&self, round_number: u32, max_rounds: u32) -> bool {
        let consumer = round_number + 3;
        consumer <= max_rounds && consumer >= self.threshold
    }

    /// Gather what the digest after `round_number` is built from
    pub fn rolling_inputs(
        &self,
        round_number: u32,
        rounds: &[Round],
        statements: &[Statement],
        names: &HashMap<String, String>,
    ) -> RollingInputs {
        debug!(round_number, "rolling_inputs: called");
        let previous = round_number
            .checked_sub(1)
            .filter(|n| *n >= 1)
            .and_then(|n| rounds.iter().find(|r| r.round_number == n))
            .and_then(|r| r.rolling_summary.clone().map(|s| (r.round_number, s)));

        let earlier = if previous.is_none() && round_number > 1 {
            let rendered: Vec<String> = grouped(statements, names, |n| n < round_number)
                .iter()
                .map(RoundTranscript::render)
                .collect();
            Some(rendered.join("\n")).filter(|s| !s.is_empty())
        } else {
            None
        };

        RollingInputs {
            previous,
            earlier,
            latest: transcript(round_number, statements, names, None).render(),
        }
    }
}

fn speaker(names: &HashMap<String, String>, participant_id: &str) -> String {
    names
        .get(participant_id)
        .cloned()
        .unwrap_or_else(|| participant_id.to_string())
}

/// One round's statements; with `own`, other speakers are abridged
fn transcript(
    round_number: u32,
    statements: &[Statement],
    names: &HashMap<String, String>,
    own: Option<&str>,
) -> RoundTranscript {
    let mut selected: Vec<&Statement> = statements.iter().filter(|s| s.round_number == round_number).collect();
    selected.sort_by_key(|s| (s.speaking_order, s.created_at));

    let entries = selected
        .into_iter()
        .map(|s| {
            let abridge = own.is_some_and(|me| me != s.participant_id) && s.summary.is_some();
            TranscriptEntry {
                participant_id: s.participant_id.clone(),
                speaker: speaker(names, &s.participant_id),
                speaking_order: s.speaking_order,
                text: if abridge { s.abridged().to_string() } else { s.content.clone() },
                abridged: abridge,
            }
        })
        .collect();

    RoundTranscript { round_number, entries }
}

/// Full transcripts of every round passing `keep`, in round order
fn grouped(
    statements: &[Statement],
    names: &HashMap<String, String>,
    keep: impl Fn(u32) -> bool,
) -> Vec<RoundTranscript> {
    let numbers: BTreeSet<u32> = statements
        .iter()
        .map(|s| s.round_number)
        .filter(|n| keep(*n))
        .collect();
    numbers
        .into_iter()
        .map(|n| transcript(n, statements, names, None))
        .collect()
}
