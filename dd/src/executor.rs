//! Round executor
//!
//! Handles one [`WorkItem`]: one participant speaking once in one round.
//! After speaking (or failing to) the item hands the chain to the next seat
//! in speaking order, or to the completion handler when it was the last.
//!
//! Every step is safe to replay. A statement already on record skips
//! generation; the chain link it would have produced is produced again.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::completion::{CompletionError, CompletionHandler, RoundEnd};
use crate::compressor::ContextCompressor;
use crate::config::{CompressionConfig, ExecutorConfig};
use crate::domain::{
    Participant, Round, RoundStatus, Session, SessionParticipant, SessionStatus, Statement, SteeringKind, Topic,
    now_ms, statement_id,
};
use crate::events::{DebateEvent, EventBus};
use crate::gateway::GenerationGateway;
use crate::llm::CompletionRequest;
use crate::prompts::{HistoryContext, KnowledgeNote, PromptLoader, StatementContext, parse_statement};
use crate::queue::{QueueError, WorkItem, WorkQueue};
use crate::state::{StateError, StateManager};

/// Failures that make a work item worth redelivering
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),
}

/// What happened to the participant's turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Recorded,
    /// A previous delivery already stored the statement
    AlreadyRecorded,
    /// Generation failed; the participant is skipped this round
    Failed,
    /// Rate limited; the same item was re-enqueued with a delay
    Deferred,
    /// The item no longer applies (round closed, session gone, ...)
    Halted(String),
}

/// What happened to the chain after the turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStep {
    Next(WorkItem),
    RoundEnd(RoundEnd),
    /// The chain resumes when the deferred item is delivered
    Held,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub outcome: StepOutcome,
    pub chain: ChainStep,
}

impl StepReport {
    fn halted(reason: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Halted(reason.into()),
            chain: ChainStep::Stopped,
        }
    }
}

/// The seat that speaks after `speaking_order`, if any
pub fn next_in_chain(roster: &[SessionParticipant], speaking_order: u32) -> Option<&SessionParticipant> {
    roster
        .iter()
        .filter(|seat| seat.speaking_order > speaking_order)
        .min_by_key(|seat| seat.speaking_order)
}

/// Consumes work items and drives round chains
pub struct RoundExecutor {
    state: StateManager,
    gateway: Arc<GenerationGateway>,
    prompts: Arc<PromptLoader>,
    queue: Arc<dyn WorkQueue>,
    completion: Arc<CompletionHandler>,
    events: Arc<EventBus>,
    compressor: ContextCompressor,
    config: ExecutorConfig,
}

impl RoundExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: StateManager,
        gateway: Arc<GenerationGateway>,
        prompts: Arc<PromptLoader>,
        queue: Arc<dyn WorkQueue>,
        completion: Arc<CompletionHandler>,
        events: Arc<EventBus>,
        compression: &CompressionConfig,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            state,
            gateway,
            prompts,
            queue,
            completion,
            events,
            compressor: ContextCompressor::new(compression.threshold),
            config,
        }
    }

    /// Process one work item
    ///
    /// `Err` means the item could not be handled at all (the state actor or
    /// the queue is gone) and should be redelivered.
    pub async fn handle(&self, item: &WorkItem) -> Result<StepReport, ExecutorError> {
        debug!(
            round_id = %item.round_id,
            participant_id = %item.participant_id,
            speaking_order = item.speaking_order,
            attempt = item.attempt,
            "handle: called"
        );

        let Some(round) = self.state.get::<Round>(&item.round_id).await? else {
            warn!(round_id = %item.round_id, "Work item for missing round");
            return Ok(StepReport::halted("round missing"));
        };
        if round.status != RoundStatus::Processing {
            debug!(round_id = %item.round_id, status = %round.status, "handle: round not processing, dropping item");
            return Ok(StepReport::halted(format!("round is {}", round.status)));
        }
        let Some(session) = self.state.get::<Session>(&item.session_id).await? else {
            warn!(session_id = %item.session_id, "Work item for missing session");
            return Ok(StepReport::halted("session missing"));
        };
        if session.status != SessionStatus::Active {
            debug!(session_id = %session.id, status = %session.status, "handle: session not active");
            return Ok(StepReport::halted(format!("session is {}", session.status)));
        }
        let roster = self.state.roster(&session.id).await?;
        if roster.is_empty() {
            warn!(session_id = %session.id, "Session has no roster");
            return Ok(StepReport::halted("empty roster"));
        }

        let outcome = self.take_turn(item, &round, &session, &roster).await?;

        self.touch_progress(&round).await?;

        if outcome == StepOutcome::Deferred {
            return Ok(StepReport {
                outcome,
                chain: ChainStep::Held,
            });
        }

        let chain = match next_in_chain(&roster, item.speaking_order) {
            Some(seat) => {
                let next = item.next_seat(seat);
                debug!(round_id = %item.round_id, next = %next.participant_id, "handle: chaining");
                self.queue.enqueue(next.clone()).await?;
                ChainStep::Next(next)
            }
            None => ChainStep::RoundEnd(self.completion.handle_round_end(&item.round_id).await?),
        };

        Ok(StepReport { outcome, chain })
    }

    /// Generate and store the participant's statement unless it exists
    async fn take_turn(
        &self,
        item: &WorkItem,
        round: &Round,
        session: &Session,
        roster: &[SessionParticipant],
    ) -> Result<StepOutcome, ExecutorError> {
        let id = statement_id(&item.round_id, &item.participant_id);
        if self.state.get::<Statement>(&id).await?.is_some() {
            debug!(%id, "take_turn: statement already recorded");
            return Ok(StepOutcome::AlreadyRecorded);
        }

        let Some(participant) = self.state.get::<Participant>(&item.participant_id).await? else {
            warn!(participant_id = %item.participant_id, "Seated participant missing");
            self.emit_failure(item, "participant missing", false);
            return Ok(StepOutcome::Failed);
        };

        let request = match self.build_request(item, round, session, &participant, roster).await {
            Ok(request) => request,
            Err(BuildError::State(e)) => return Err(e.into()),
            Err(BuildError::Prompt(message)) => {
                warn!(participant_id = %item.participant_id, error = %message, "Statement prompt failed to render");
                self.emit_failure(item, &message, false);
                return Ok(StepOutcome::Failed);
            }
        };

        match self.gateway.generate(request).await {
            Ok(text) => {
                let generated = parse_statement(&text);
                let statement = Statement::new(round, &item.participant_id, item.speaking_order, generated.content)
                    .with_summary(generated.summary)
                    .with_reasoning(generated.reasoning);

                if !self.state.insert_if_absent(&statement).await? {
                    debug!(%id, "take_turn: lost the insert race");
                    return Ok(StepOutcome::AlreadyRecorded);
                }

                info!(
                    session_id = %session.id,
                    round_number = round.round_number,
                    participant_id = %item.participant_id,
                    "Statement recorded"
                );
                self.events.emit(DebateEvent::StatementRecorded {
                    session_id: session.id.clone(),
                    round_number: round.round_number,
                    participant_id: item.participant_id.clone(),
                    speaking_order: item.speaking_order,
                });
                Ok(StepOutcome::Recorded)
            }
            Err(e) if e.is_rate_limit() && item.attempt + 1 < self.config.max_chain_attempts => {
                let delay = self.config.chain_backoff();
                info!(
                    participant_id = %item.participant_id,
                    attempt = item.attempt,
                    ?delay,
                    "Rate limited; deferring turn"
                );
                self.queue.enqueue_after(item.retry(), delay).await?;
                self.emit_failure(item, &e.to_string(), true);
                Ok(StepOutcome::Deferred)
            }
            Err(e) => {
                warn!(
                    participant_id = %item.participant_id,
                    round_id = %item.round_id,
                    error = %e,
                    "Generation failed; skipping turn"
                );
                self.emit_failure(item, &e.to_string(), false);
                Ok(StepOutcome::Failed)
            }
        }
    }

    async fn build_request(
        &self,
        item: &WorkItem,
        round: &Round,
        session: &Session,
        participant: &Participant,
        roster: &[SessionParticipant],
    ) -> Result<CompletionRequest, BuildError> {
        let (topic_title, topic_description) = match self.state.get::<Topic>(&session.topic_id).await? {
            Some(topic) => (topic.title, topic.description),
            None => (session.topic_id.clone(), String::new()),
        };

        let knowledge: Vec<KnowledgeNote> = self
            .state
            .knowledge_for(&participant.id)
            .await?
            .iter()
            .map(KnowledgeNote::from)
            .collect();
        let directive = self
            .state
            .steering_for(&participant.id, SteeringKind::Directive)
            .await?
            .into_iter()
            .rev()
            .find(|d| d.targets(&session.id, round.round_number))
            .map(|d| d.content);
        let strategy = self
            .state
            .steering_for(&participant.id, SteeringKind::Strategy)
            .await?
            .pop()
            .map(|s| s.content);

        let rounds = self.state.rounds_for_session(&session.id).await?;
        let statements = self.state.statements_for_session(&session.id).await?;
        let names: HashMap<String, String> = self.state.participant_names(roster).await?;

        let history = self
            .compressor
            .compress(round.round_number, &participant.id, &rounds, &statements, &names);
        let spoken: Vec<Statement> = statements
            .into_iter()
            .filter(|s| s.round_number == round.round_number && s.speaking_order < item.speaking_order)
            .collect();
        let current = self.compressor.in_progress(round.round_number, &spoken, &names);

        let phase = session.mode.phase_for(round.round_number, session.max_rounds);
        let system = self
            .prompts
            .render(
                "statement-system",
                &StatementContext {
                    name: participant.name.clone(),
                    persona: participant.persona.clone(),
                    topic_title,
                    topic_description,
                    round_number: round.round_number,
                    max_rounds: session.max_rounds,
                    phase: phase.to_string(),
                    phase_guidance: phase.guidance().to_string(),
                    knowledge,
                    strategy,
                    directive,
                },
            )
            .map_err(|e| BuildError::Prompt(e.to_string()))?;
        let user = self
            .prompts
            .render(
                "statement-user",
                &HistoryContext {
                    name: participant.name.clone(),
                    history: history.render(Some(&current)),
                },
            )
            .map_err(|e| BuildError::Prompt(e.to_string()))?;

        debug!(tiered = history.is_tiered(), "build_request: context built");
        Ok(CompletionRequest::single(system, user, self.config.statement_max_tokens))
    }

    /// Stamp chain progress so the dispatcher does not see a stall
    async fn touch_progress(&self, round: &Round) -> Result<(), ExecutorError> {
        let Some(mut current) = self.state.get::<Round>(&round.id).await? else {
            return Ok(());
        };
        current.touch_progress(now_ms());
        if !self
            .state
            .transition(&current, "status", RoundStatus::Processing.to_string())
            .await?
        {
            debug!(round_id = %round.id, "touch_progress: round no longer processing");
        }
        Ok(())
    }

    fn emit_failure(&self, item: &WorkItem, error: &str, deferred: bool) {
        self.events.emit(DebateEvent::GenerationFailed {
            session_id: item.session_id.clone(),
            round_number: item.round_number,
            participant_id: item.participant_id.clone(),
            error: error.to_string(),
            deferred,
        });
    }
}

enum BuildError {
    State(StateError),
    Prompt(String),
}

impl From<StateError> for BuildError {
    fn from(err: StateError) -> Self {
        BuildError::State(err)
    }
}
