//! DebateDaemon - multi-agent deliberation pipeline
//!
//! Participants are agent personas owned by users. Each cycle the scheduler
//! opens sessions pairing topics with rosters; every session then runs a
//! fixed number of rounds in which the seated participants speak in turn.
//!
//! ```text
//!   SessionScheduler --(session + roster + round 1)--> DebateStore
//!                                                          |
//!   RoundDispatcher  --(pending / stalled rounds)--> WorkQueue
//!                                                          |
//!   WorkerPool -> RoundExecutor --(next speaker)---> WorkQueue
//!                      |
//!                      +--(last speaker)--> CompletionHandler
//!                                             next round | summary, verdict,
//!                                                        | persona updates
//! ```
//!
//! # Modules
//!
//! - [`scheduler`] - Session counts, topic spread and roster assignment
//! - [`dispatcher`] - Claims ready rounds and starts their speaking chains
//! - [`executor`] - Generates one statement and chains to the next speaker
//! - [`completion`] - Round advancement and the closing artifacts
//! - [`compressor`] - Keeps long histories inside the context budget
//! - [`gateway`] - Rate-limit retries around every generation call
//! - [`state`] - Actor owning the DebateStore
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod completion;
pub mod compressor;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod events;
pub mod executor;
pub mod gateway;
pub mod jobs;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod queue;
pub mod scheduler;
pub mod seed;
pub mod state;
pub mod worker;

// Re-export commonly used types
pub use completion::{CompletionHandler, RoundEnd};
pub use config::{Config, LlmConfig};
pub use dispatcher::{DispatchReport, RoundDispatcher};
pub use domain::{
    DebateMode, Participant, Persona, Round, RoundStatus, Session, SessionParticipant, SessionStatus, Statement,
    Topic,
};
pub use executor::{RoundExecutor, StepOutcome};
pub use gateway::GenerationGateway;
pub use llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, create_client};
pub use pipeline::Pipeline;
pub use queue::{ChannelQueue, WorkItem, WorkQueue};
pub use scheduler::{ScheduleReport, SessionScheduler};
pub use state::StateManager;
