//! Round and session completion
//!
//! Invoked by the last participant's work item. Closes the round exactly
//! once, then either opens the next round or closes the session with a
//! summary, a verdict and persona updates.
//!
//! ```text
//!   round processing ──(guarded batch)──► round completed
//!                                          session.current_round = n
//!                                          round n+1 pending      (n < max)
//!   n == max: claim ─► summary ─► verdict ─► session completed ─► personas (concurrent)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compressor::ContextCompressor;
use crate::config::{CompletionConfig, CompressionConfig};
use crate::domain::{
    Participant, Round, RoundStatus, Session, SessionParticipant, SessionStatus, Topic, Verdict, WriteBatch, now_ms,
};
use crate::events::{DebateEvent, EventBus};
use crate::gateway::{GatewayError, GenerationGateway};
use crate::llm::CompletionRequest;
use crate::prompts::{
    DecodeError, PersonaContext, PromptLoader, RollingSummaryContext, SeatNote, SessionSummaryContext, VerdictContext,
    parse_persona, parse_verdict,
};
use crate::state::{StateError, StateManager};

/// Stand-in summary when the summary call fails
pub const SUMMARY_PLACEHOLDER: &str = "Summary unavailable: the session summary could not be generated.";

const ROLLING_SUMMARY_SYSTEM: &str = "You write faithful, compact digests of debates.";
const SESSION_SUMMARY_SYSTEM: &str = "You write clear, neutral summaries of debates.";
const VERDICT_SYSTEM: &str = "You are an impartial debate judge. You reply with JSON only.";
const PERSONA_USER: &str = "Reply with the revised persona as a single JSON object.";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Generation error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Prompt error: {0}")]
    Prompt(String),
}

impl CompletionError {
    /// True when the state actor is unreachable
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, CompletionError::State(e) if e.is_infrastructure())
    }
}

/// What a completion attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEnd {
    /// The round or its session no longer exists
    Missing,
    /// Another delivery already closed the round (or the session)
    AlreadyCompleted,
    /// Another closer holds an unexpired claim on the session
    Closing,
    /// The next round is pending
    Advanced { next_round: u32 },
    /// The session is completed
    SessionClosed { degraded: bool, personas_updated: usize },
    /// Nothing to recover
    Idle,
}

/// Per-participant outcome of the persona pass: the new persona version,
/// or `None` when there was no feedback to apply
pub type PersonaOutcome = (String, Result<Option<u32>, CompletionError>);

/// Closes rounds and sessions
pub struct CompletionHandler {
    state: StateManager,
    gateway: Arc<GenerationGateway>,
    prompts: Arc<PromptLoader>,
    compressor: ContextCompressor,
    events: Arc<EventBus>,
    config: CompletionConfig,
    rolling_max_tokens: u32,
}

impl CompletionHandler {
    pub fn new(
        state: StateManager,
        gateway: Arc<GenerationGateway>,
        prompts: Arc<PromptLoader>,
        events: Arc<EventBus>,
        compression: &CompressionConfig,
        config: CompletionConfig,
    ) -> Self {
        Self {
            state,
            gateway,
            prompts,
            compressor: ContextCompressor::new(compression.threshold),
            events,
            config,
            rolling_max_tokens: compression.summary_max_tokens,
        }
    }

    /// Close a round whose last participant has spoken
    pub async fn handle_round_end(&self, round_id: &str) -> Result<RoundEnd, CompletionError> {
        debug!(%round_id, "handle_round_end: called");

        let Some(round) = self.state.get::<Round>(round_id).await? else {
            warn!(%round_id, "handle_round_end: round missing");
            return Ok(RoundEnd::Missing);
        };
        if round.status != RoundStatus::Processing {
            debug!(%round_id, status = %round.status, "handle_round_end: round not processing");
            return Ok(RoundEnd::AlreadyCompleted);
        }
        let Some(session) = self.state.get::<Session>(&round.session_id).await? else {
            warn!(%round_id, session_id = %round.session_id, "handle_round_end: session missing");
            return Ok(RoundEnd::Missing);
        };

        let now = now_ms();
        let is_final = session.is_on_final_round(round.round_number);

        let mut completed = round.clone();
        completed.mark_completed(now);
        let mut advanced = session.clone();
        advanced.advance_round(round.round_number, now);

        let mut batch = WriteBatch::new();
        batch
            .update_if(&completed, "status", RoundStatus::Processing.to_string())
            .map_err(StateError::from)?;
        batch
            .update_if(&advanced, "status", SessionStatus::Active.to_string())
            .map_err(StateError::from)?;
        if !is_final {
            batch
                .insert_if_absent(&Round::new(&session.id, round.round_number + 1))
                .map_err(StateError::from)?;
        }

        if !self.state.commit(batch).await? {
            debug!(%round_id, "handle_round_end: transition already applied");
            return Ok(RoundEnd::AlreadyCompleted);
        }

        info!(session_id = %session.id, round_number = round.round_number, is_final, "Round completed");
        self.events.emit(DebateEvent::RoundCompleted {
            session_id: session.id.clone(),
            round_number: round.round_number,
        });

        if is_final {
            return self.close_session(&advanced).await;
        }

        if self.compressor.needs_rolling_summary(round.round_number, session.max_rounds) {
            if let Err(e) = self.update_rolling_summary(&session, &completed).await {
                if e.is_infrastructure() {
                    return Err(e);
                }
                warn!(%round_id, error = %e, "Rolling summary failed; later rounds fall back to full history");
            }
        }

        Ok(RoundEnd::Advanced {
            next_round: round.round_number + 1,
        })
    }

    /// Finish an active session whose rounds stopped moving
    ///
    /// Covers a crash between closing a round and creating the next one, or
    /// between closing the final round and closing the session.
    pub async fn recover_session(&self, session: &Session) -> Result<RoundEnd, CompletionError> {
        debug!(session_id = %session.id, "recover_session: called");
        if session.status != SessionStatus::Active {
            return Ok(RoundEnd::Idle);
        }

        let rounds = self.state.rounds_for_session(&session.id).await?;
        if rounds
            .iter()
            .any(|r| matches!(r.status, RoundStatus::Pending | RoundStatus::Processing))
        {
            return Ok(RoundEnd::Idle);
        }

        let last_completed = rounds
            .iter()
            .filter(|r| r.status == RoundStatus::Completed)
            .map(|r| r.round_number)
            .max()
            .unwrap_or(0);

        if session.is_on_final_round(last_completed) {
            info!(session_id = %session.id, "Recovering session: closing");
            return self.close_session(session).await;
        }

        let next_round = last_completed + 1;
        info!(session_id = %session.id, next_round, "Recovering session: creating missing round");
        if self.state.insert_if_absent(&Round::new(&session.id, next_round)).await? {
            Ok(RoundEnd::Advanced { next_round })
        } else {
            Ok(RoundEnd::Idle)
        }
    }

    /// Claim, summary, verdict, completed status, then persona updates
    ///
    /// The claim keeps a slow close from being started again by recovery;
    /// a claim older than the close lease is taken over.
    async fn close_session(&self, session: &Session) -> Result<RoundEnd, CompletionError> {
        debug!(session_id = %session.id, "close_session: called");

        let now = now_ms();
        if session.has_fresh_close_claim(now, self.config.close_lease_ms()) {
            debug!(session_id = %session.id, "close_session: close already claimed");
            return Ok(RoundEnd::Closing);
        }
        let mut claimed = session.clone();
        claimed.claim_close(now);
        let mut batch = WriteBatch::new();
        // Claim guard first; the status guard then sees the claimed indexes
        batch
            .update_if(&claimed, "closing_at", session.closing_at.unwrap_or(0))
            .map_err(StateError::from)?;
        batch
            .update_if(&claimed, "status", SessionStatus::Active.to_string())
            .map_err(StateError::from)?;
        if !self.state.commit(batch).await? {
            debug!(session_id = %session.id, "close_session: claim lost");
            return Ok(RoundEnd::Closing);
        }
        if let Some(previous) = session.closing_at {
            warn!(session_id = %session.id, claimed_at = previous, "Taking over an expired session close");
        }

        let roster = self.state.roster(&session.id).await?;
        let names = self.state.participant_names(&roster).await?;
        let statements = self.state.statements_for_session(&session.id).await?;
        let topic_title = self.topic_title(&session.topic_id).await?;
        let transcript = self.compressor.full_history(&statements, &names).render(None);

        let summary = match self.generate_summary(&topic_title, session.max_rounds, &transcript).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Session summary failed; using placeholder");
                None
            }
        };
        let verdict = match self.generate_verdict(&topic_title, &roster, &names, &transcript).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Verdict failed; using placeholder");
                Verdict::placeholder()
            }
        };
        let degraded = summary.is_none() || verdict.placeholder;

        let mut closed = claimed.clone();
        closed.complete(
            summary.clone().unwrap_or_else(|| SUMMARY_PLACEHOLDER.to_string()),
            verdict,
            now_ms(),
        );
        if !self.state.transition(&closed, "closing_at", now).await? {
            debug!(session_id = %session.id, "close_session: claim taken over before completion");
            return Ok(RoundEnd::AlreadyCompleted);
        }
        info!(session_id = %session.id, degraded, "Session completed");

        let outcomes = self.update_personas(&session.id, &roster, summary.as_deref()).await;
        let mut personas_updated = 0;
        for (participant_id, outcome) in &outcomes {
            match outcome {
                Ok(Some(version)) => {
                    personas_updated += 1;
                    info!(%participant_id, version, "Persona updated");
                }
                Ok(None) => debug!(%participant_id, "No feedback to apply"),
                Err(e) => warn!(%participant_id, error = %e, "Persona update failed"),
            }
        }

        // Terminal event last: the event log closes the session's file on it
        self.events.emit(DebateEvent::SessionCompleted {
            session_id: session.id.clone(),
            degraded,
        });

        Ok(RoundEnd::SessionClosed {
            degraded,
            personas_updated,
        })
    }

    async fn topic_title(&self, topic_id: &str) -> Result<String, CompletionError> {
        Ok(self
            .state
            .get::<Topic>(topic_id)
            .await?
            .map(|t| t.title)
            .unwrap_or_else(|| topic_id.to_string()))
    }

    async fn generate_summary(
        &self,
        topic_title: &str,
        round_count: u32,
        transcript: &str,
    ) -> Result<String, CompletionError> {
        let prompt = self
            .prompts
            .render(
                "session-summary",
                &SessionSummaryContext {
                    topic_title: topic_title.to_string(),
                    round_count,
                    transcript: transcript.to_string(),
                },
            )
            .map_err(|e| CompletionError::Prompt(e.to_string()))?;
        let text = self
            .gateway
            .generate(CompletionRequest::single(
                SESSION_SUMMARY_SYSTEM,
                prompt,
                self.config.summary_max_tokens,
            ))
            .await?;
        Ok(text.trim().to_string())
    }

    async fn generate_verdict(
        &self,
        topic_title: &str,
        roster: &[SessionParticipant],
        names: &HashMap<String, String>,
        transcript: &str,
    ) -> Result<Verdict, CompletionError> {
        let participants: Vec<SeatNote> = roster
            .iter()
            .map(|seat| SeatNote {
                id: seat.participant_id.clone(),
                name: names
                    .get(&seat.participant_id)
                    .cloned()
                    .unwrap_or_else(|| seat.participant_id.clone()),
            })
            .collect();
        let ids: Vec<String> = roster.iter().map(|s| s.participant_id.clone()).collect();

        let prompt = self
            .prompts
            .render(
                "verdict",
                &VerdictContext {
                    topic_title: topic_title.to_string(),
                    participants,
                    transcript: transcript.to_string(),
                },
            )
            .map_err(|e| CompletionError::Prompt(e.to_string()))?;
        let text = self
            .gateway
            .generate(CompletionRequest::single(VERDICT_SYSTEM, prompt, self.config.verdict_max_tokens))
            .await?;
        Ok(parse_verdict(&text, &ids)?)
    }

    /// Store the cumulative digest on a just-completed round
    async fn update_rolling_summary(&self, session: &Session, round: &Round) -> Result<(), CompletionError> {
        debug!(round_id = %round.id, "update_rolling_summary: called");
        let rounds = self.state.rounds_for_session(&session.id).await?;
        let statements = self.state.statements_for_session(&session.id).await?;
        let roster = self.state.roster(&session.id).await?;
        let names = self.state.participant_names(&roster).await?;
        let topic_title = self.topic_title(&session.topic_id).await?;

        let inputs = self
            .compressor
            .rolling_inputs(round.round_number, &rounds, &statements, &names);
        let (previous_round, previous_summary) = match inputs.previous {
            Some((n, text)) => (Some(n), Some(text)),
            None => (None, None),
        };
        let prompt = self
            .prompts
            .render(
                "rolling-summary",
                &RollingSummaryContext {
                    topic_title,
                    round_number: round.round_number,
                    previous_round,
                    previous_summary,
                    earlier: inputs.earlier,
                    latest: inputs.latest,
                },
            )
            .map_err(|e| CompletionError::Prompt(e.to_string()))?;
        let text = self
            .gateway
            .generate(CompletionRequest::single(
                ROLLING_SUMMARY_SYSTEM,
                prompt,
                self.rolling_max_tokens,
            ))
            .await?;

        let mut summarized = round.clone();
        summarized.rolling_summary = Some(text.trim().to_string());
        summarized.updated_at = now_ms();
        self.state
            .transition(&summarized, "status", RoundStatus::Completed.to_string())
            .await?;
        Ok(())
    }

    /// Apply unapplied feedback to every seated participant, concurrently
    pub async fn update_personas(
        &self,
        session_id: &str,
        roster: &[SessionParticipant],
        summary: Option<&str>,
    ) -> Vec<PersonaOutcome> {
        debug!(%session_id, seat_count = roster.len(), "update_personas: called");
        let updates = roster.iter().map(|seat| async move {
            let outcome = self.update_persona(session_id, &seat.participant_id, summary).await;
            (seat.participant_id.clone(), outcome)
        });
        join_all(updates).await
    }

    async fn update_persona(
        &self,
        session_id: &str,
        participant_id: &str,
        summary: Option<&str>,
    ) -> Result<Option<u32>, CompletionError> {
        let feedback = self.state.unapplied_feedback(participant_id).await?;
        if feedback.is_empty() {
            return Ok(None);
        }
        let Some(participant) = self.state.get::<Participant>(participant_id).await? else {
            return Err(StateError::NotFound(format!("participants/{}", participant_id)).into());
        };

        let prompt = self
            .prompts
            .render(
                "persona-update",
                &PersonaContext {
                    name: participant.name.clone(),
                    persona: participant.persona.clone(),
                    summary: summary.map(str::to_string),
                    feedback: feedback.iter().map(|f| f.content.clone()).collect(),
                },
            )
            .map_err(|e| CompletionError::Prompt(e.to_string()))?;
        let text = self
            .gateway
            .generate(CompletionRequest::single(prompt, PERSONA_USER, self.config.persona_max_tokens))
            .await?;
        let persona = parse_persona(&text, &participant.persona)?;

        let now = now_ms();
        let mut updated = participant.clone();
        updated.apply_persona(persona);

        // Persona and the consumed feedback land together or not at all
        let mut batch = WriteBatch::new();
        batch.update(&updated).map_err(StateError::from)?;
        for input in &feedback {
            let mut applied = input.clone();
            applied.mark_applied(now);
            batch.update_if(&applied, "applied", false).map_err(StateError::from)?;
        }
        if !self.state.commit(batch).await? {
            debug!(%participant_id, "update_persona: feedback applied concurrently");
            return Ok(None);
        }

        let version = updated.persona.version;
        self.events.emit(DebateEvent::PersonaUpdated {
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
            version,
        });
        Ok(Some(version))
    }
}
