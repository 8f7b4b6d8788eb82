//! Domain types for DebateDaemon
//!
//! Core records: Topic, Participant, Session, SessionParticipant, Round,
//! Statement, KnowledgeItem, SteeringInput.
//! All implement the Record trait for DebateStore persistence.

mod id;
mod mode;
mod participant;
mod round;
mod session;
mod steering;
mod topic;

pub use id::{IdResolver, generate_id, roster_id, round_id, statement_id};
pub use mode::{DebateMode, Phase};
pub use participant::{Participant, ParticipantStatus, Persona};
pub use round::{Round, RoundStatus, Statement};
pub use session::{ParticipantScore, Session, SessionParticipant, SessionStatus, Verdict};
pub use steering::{KnowledgeItem, SteeringInput, SteeringKind};
pub use topic::{Topic, TopicStatus};

// Re-export debatestore types for convenience
pub use debatestore::{Filter, FilterOp, IndexValue, Record, WriteBatch, now_ms};
