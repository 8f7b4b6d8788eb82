//! Session scheduling
//!
//! Decides each cycle how many sessions to open, which topics they debate
//! and who takes part, then writes them out ready for dispatch.

mod config;
mod core;
mod plan;

pub use config::SchedulerConfig;
pub use core::{ScheduleReport, SessionScheduler};
pub use plan::{
    CyclePlan, PlanParams, PlannedSession, assign_participants, distribute_topics, plan_cycle, session_count,
};
