//! Debate modes and round phases

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Debate mode, governing round count and phase framing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateMode {
    /// Three rounds: opening, rebuttal, closing
    Quick,
    /// Five rounds
    #[default]
    Standard,
    /// Eight rounds with cross-examination every third middle round
    Extended,
}

impl DebateMode {
    /// Number of rounds a session in this mode runs
    pub fn max_rounds(&self) -> u32 {
        match self {
            DebateMode::Quick => 3,
            DebateMode::Standard => 5,
            DebateMode::Extended => 8,
        }
    }

    /// Phase of round `round_number` in a session of `max_rounds` rounds
    pub fn phase_for(&self, round_number: u32, max_rounds: u32) -> Phase {
        debug!(mode = %self, round_number, max_rounds, "phase_for: called");
        if round_number <= 1 {
            return Phase::Opening;
        }
        if round_number >= max_rounds {
            return Phase::Closing;
        }
        if *self == DebateMode::Extended && (round_number - 1) % 3 == 0 {
            return Phase::CrossExamination;
        }
        Phase::Rebuttal
    }
}

impl fmt::Display for DebateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebateMode::Quick => write!(f, "quick"),
            DebateMode::Standard => write!(f, "standard"),
            DebateMode::Extended => write!(f, "extended"),
        }
    }
}

impl FromStr for DebateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quick" => Ok(DebateMode::Quick),
            "standard" => Ok(DebateMode::Standard),
            "extended" => Ok(DebateMode::Extended),
            _ => Err(format!("Unknown debate mode: {}. Use 'quick', 'standard' or 'extended'", s)),
        }
    }
}

/// Rhetorical phase of a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Opening,
    Rebuttal,
    CrossExamination,
    Closing,
}

impl Phase {
    /// Short instruction for the speaker in this phase
    pub fn guidance(&self) -> &'static str {
        match self {
            Phase::Opening => "Present your opening position and the main reasons behind it.",
            Phase::Rebuttal => "Respond to the strongest points made so far and develop your position.",
            Phase::CrossExamination => "Challenge a specific claim made by another participant with pointed questions.",
            Phase::Closing => "Summarize your final position and why it should prevail.",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Opening => write!(f, "opening"),
            Phase::Rebuttal => write!(f, "rebuttal"),
            Phase::CrossExamination => write!(f, "cross_examination"),
            Phase::Closing => write!(f, "closing"),
        }
    }
}
