//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::DebateMode;

/// Session scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Target roster size per session (P)
    #[serde(default = "default_roster_size", rename = "roster-size")]
    pub roster_size: usize,

    /// Maximum sessions one participant joins per cycle (M)
    #[serde(
        default = "default_max_sessions_per_participant",
        rename = "max-sessions-per-participant"
    )]
    pub max_sessions_per_participant: usize,

    /// Seconds between scheduling cycles
    #[serde(default = "default_interval_secs", rename = "interval-secs")]
    pub interval_secs: u64,

    /// Participants inactive for longer than this are not scheduled
    #[serde(default = "default_activity_window_secs", rename = "activity-window-secs")]
    pub activity_window_secs: u64,

    /// Mode of newly created sessions
    #[serde(default, rename = "default-mode")]
    pub default_mode: DebateMode,

    /// Fixed RNG seed for reproducible cycles
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_roster_size() -> usize {
    4
}

fn default_max_sessions_per_participant() -> usize {
    2
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_activity_window_secs() -> u64 {
    72 * 3600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            roster_size: default_roster_size(),
            max_sessions_per_participant: default_max_sessions_per_participant(),
            interval_secs: default_interval_secs(),
            activity_window_secs: default_activity_window_secs(),
            default_mode: DebateMode::Standard,
            seed: None,
        }
    }
}

impl SchedulerConfig {
    /// Get the cycle interval as a Duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn activity_window_ms(&self) -> i64 {
        (self.activity_window_secs as i64).saturating_mul(1000)
    }
}
