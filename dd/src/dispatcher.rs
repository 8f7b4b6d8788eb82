//! Round dispatcher
//!
//! Promotes rounds to `processing` and enqueues the head of their chain.
//! Pending rounds start at the first seat; stalled rounds resume at the
//! first seat without a statement. A session with a round already in flight
//! never gets a second one.
//!
//! Also sweeps active sessions whose rounds all completed without a
//! successor (a crash between closing one round and opening the next).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::completion::{CompletionHandler, RoundEnd};
use crate::config::DispatcherConfig;
use crate::domain::{Round, RoundStatus, Session, SessionParticipant, SessionStatus};
use crate::events::{DebateEvent, EventBus};
use crate::jobs::{Job, JobReport};
use crate::queue::{WorkItem, WorkQueue};
use crate::state::StateManager;

/// A round chosen for dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct Selected {
    pub round: Round,
    /// True when a stalled chain is being re-driven
    pub resumed: bool,
}

/// Choose up to `batch_size` rounds, stalled ones first, one per session
///
/// `pending` is taken in the given order. A pending round is skipped when
/// its session has any processing round, stalled or not.
pub fn select_rounds(
    processing: &[Round],
    pending: &[Round],
    now: i64,
    stall_timeout_ms: i64,
    batch_size: usize,
) -> Vec<Selected> {
    let busy: HashSet<&str> = processing.iter().map(|r| r.session_id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut selected = Vec::new();

    for round in processing.iter().filter(|r| r.is_stalled(now, stall_timeout_ms)) {
        if selected.len() >= batch_size {
            return selected;
        }
        if seen.insert(round.session_id.as_str()) {
            selected.push(Selected {
                round: round.clone(),
                resumed: true,
            });
        }
    }

    for round in pending {
        if selected.len() >= batch_size {
            break;
        }
        let session = round.session_id.as_str();
        if !busy.contains(session) && seen.insert(session) {
            selected.push(Selected {
                round: round.clone(),
                resumed: false,
            });
        }
    }

    selected
}

/// Where a (re)dispatched chain starts
///
/// Fresh rounds start at the first seat. Resumed rounds start at the first
/// seat without a statement, or at the last seat so completion still fires.
pub fn chain_head<'a>(
    roster: &'a [SessionParticipant],
    spoken: &HashSet<String>,
    resumed: bool,
) -> Option<&'a SessionParticipant> {
    let mut seats: Vec<&SessionParticipant> = roster.iter().collect();
    seats.sort_by_key(|s| s.speaking_order);
    if !resumed {
        return seats.first().copied();
    }
    seats
        .iter()
        .find(|s| !spoken.contains(&s.participant_id))
        .or_else(|| seats.last())
        .copied()
}

/// Counts from one dispatch cycle
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub resumed: usize,
    /// Selected rounds whose status moved before they could be claimed
    pub skipped: usize,
    /// Rounds abandoned because their session has no roster
    pub failed: usize,
    pub recovered: usize,
}

impl DispatchReport {
    pub fn changed(&self) -> usize {
        self.dispatched + self.resumed + self.failed + self.recovered
    }

    pub fn summary(&self) -> String {
        format!(
            "{} dispatched, {} resumed, {} skipped, {} failed, {} recovered",
            self.dispatched, self.resumed, self.skipped, self.failed, self.recovered
        )
    }
}

/// What happened to one selected round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Claimed,
    Skipped,
    Failed,
}

pub struct RoundDispatcher {
    state: StateManager,
    queue: Arc<dyn WorkQueue>,
    completion: Arc<CompletionHandler>,
    events: Arc<EventBus>,
    config: DispatcherConfig,
}

impl RoundDispatcher {
    pub fn new(
        state: StateManager,
        queue: Arc<dyn WorkQueue>,
        completion: Arc<CompletionHandler>,
        events: Arc<EventBus>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            state,
            queue,
            completion,
            events,
            config,
        }
    }

    /// One dispatch cycle at `now` (ms since epoch)
    pub async fn run_cycle(&self, now: i64) -> eyre::Result<DispatchReport> {
        debug!(now, "run_cycle: called");
        let stall_ms = self.config.stall_timeout_ms();
        let processing = self.state.rounds_with_status(RoundStatus::Processing).await?;
        let pending = self.state.rounds_with_status(RoundStatus::Pending).await?;

        // Every dispatched chain holds one queued item at a time
        let room = self.queue.remaining();
        let batch_size = self.config.batch_size.min(room);
        if batch_size < self.config.batch_size {
            info!(room, batch_size = self.config.batch_size, "Queue near capacity; dispatching fewer rounds");
        }

        let mut report = DispatchReport::default();
        for selected in select_rounds(&processing, &pending, now, stall_ms, batch_size) {
            match self.dispatch(&selected, now).await? {
                Dispatch::Claimed if selected.resumed => report.resumed += 1,
                Dispatch::Claimed => report.dispatched += 1,
                Dispatch::Skipped => report.skipped += 1,
                Dispatch::Failed => report.failed += 1,
            }
        }

        report.recovered = self.recover_orphans(now, stall_ms).await?;

        debug!(?report, "run_cycle: done");
        Ok(report)
    }

    /// Claim one round and enqueue its chain head
    async fn dispatch(&self, selected: &Selected, now: i64) -> eyre::Result<Dispatch> {
        let round = &selected.round;
        debug!(round_id = %round.id, resumed = selected.resumed, "dispatch: called");

        let roster = self.state.roster(&round.session_id).await?;
        let spoken: HashSet<String> = if selected.resumed {
            self.state
                .statements_for_round(&round.id)
                .await?
                .into_iter()
                .map(|s| s.participant_id)
                .collect()
        } else {
            HashSet::new()
        };
        let Some(head) = chain_head(&roster, &spoken, selected.resumed) else {
            return self.abandon(round, now).await;
        };

        let mut claimed = round.clone();
        claimed.mark_processing(now);
        if !self
            .state
            .transition(&claimed, "status", round.status.to_string())
            .await?
        {
            debug!(round_id = %round.id, "dispatch: round moved since selection");
            return Ok(Dispatch::Skipped);
        }

        let item = WorkItem::for_seat(&claimed, head);
        self.queue.enqueue(item).await?;

        info!(
            session_id = %round.session_id,
            round_number = round.round_number,
            participant_id = %head.participant_id,
            resumed = selected.resumed,
            "Round dispatched"
        );
        self.events.emit(DebateEvent::RoundDispatched {
            session_id: round.session_id.clone(),
            round_number: round.round_number,
            participant_id: head.participant_id.clone(),
            resumed: selected.resumed,
        });
        Ok(Dispatch::Claimed)
    }

    /// Mark a round with nobody to speak as failed
    async fn abandon(&self, round: &Round, now: i64) -> eyre::Result<Dispatch> {
        let mut failed = round.clone();
        failed.mark_failed(now);
        if !self
            .state
            .transition(&failed, "status", round.status.to_string())
            .await?
        {
            debug!(round_id = %round.id, "abandon: round moved since selection");
            return Ok(Dispatch::Skipped);
        }
        error!(round_id = %round.id, session_id = %round.session_id, "Round has no roster; marked failed");
        Ok(Dispatch::Failed)
    }

    /// Move active sessions with no round in flight and no successor
    async fn recover_orphans(&self, now: i64, stall_ms: i64) -> eyre::Result<usize> {
        let mut recovered = 0;
        for session in self.state.list_sessions(Some(SessionStatus::Active)).await? {
            let rounds = self.state.rounds_for_session(&session.id).await?;
            if rounds
                .iter()
                .any(|r| matches!(r.status, RoundStatus::Pending | RoundStatus::Processing))
            {
                continue;
            }
            // Sessions with a failed round wait for an operator
            if rounds.iter().any(|r| r.status == RoundStatus::Failed) {
                continue;
            }
            if !is_quiet(&session, &rounds, now, stall_ms) {
                continue;
            }

            warn!(session_id = %session.id, "Active session has no round in flight; recovering");
            match self.completion.recover_session(&session).await? {
                RoundEnd::Advanced { .. } | RoundEnd::SessionClosed { .. } => recovered += 1,
                _ => {}
            }
        }
        Ok(recovered)
    }
}

/// Nothing has happened in the session for at least `stall_ms`
fn is_quiet(session: &Session, rounds: &[Round], now: i64, stall_ms: i64) -> bool {
    let last = rounds
        .iter()
        .filter_map(|r| r.completed_at)
        .max()
        .or(session.started_at)
        .unwrap_or(session.updated_at);
    now - last >= stall_ms
}

#[async_trait]
impl Job for RoundDispatcher {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    async fn run(&self, now: DateTime<Utc>) -> eyre::Result<JobReport> {
        let report = self.run_cycle(now.timestamp_millis()).await?;
        Ok(JobReport::new(self.name(), report.changed(), report.summary()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompletionConfig, CompressionConfig, GatewayConfig};
    use crate::domain::{DebateMode, Participant, Persona, Statement, Topic, now_ms};
    use crate::gateway::GenerationGateway;
    use crate::llm::client::mock::MockLlmClient;
    use crate::prompts::PromptLoader;
    use crate::queue::ChannelQueue;

    const STALL_MS: i64 = 60_000;

    fn round_at(session: &str, n: u32, status: RoundStatus, progress: i64) -> Round {
        let mut round = Round::new(session, n);
        round.status = status;
        round.last_progress_at = Some(progress);
        round
    }

    #[test]
    fn test_select_rounds_prefers_stalled_and_dedups() {
        let now = 1_000_000;
        let processing = vec![
            round_at("a", 2, RoundStatus::Processing, now - STALL_MS),
            round_at("b", 1, RoundStatus::Processing, now - 10),
        ];
        let pending = vec![
            round_at("b", 2, RoundStatus::Pending, 0),
            round_at("c", 1, RoundStatus::Pending, 0),
            round_at("c", 2, RoundStatus::Pending, 0),
            round_at("d", 1, RoundStatus::Pending, 0),
        ];

        let selected = select_rounds(&processing, &pending, now, STALL_MS, 10);
        let ids: Vec<&str> = selected.iter().map(|s| s.round.id.as_str()).collect();
        assert_eq!(ids, vec!["a:r2", "c:r1", "d:r1"]);
        assert!(selected[0].resumed);
        assert!(!selected[1].resumed);
    }

    #[test]
    fn test_select_rounds_respects_batch_size() {
        let pending: Vec<Round> = (0..5)
            .map(|i| round_at(&format!("s{}", i), 1, RoundStatus::Pending, 0))
            .collect();
        assert_eq!(select_rounds(&[], &pending, 0, STALL_MS, 2).len(), 2);
        assert!(select_rounds(&[], &pending, 0, STALL_MS, 0).is_empty());
    }

    #[test]
    fn test_chain_head() {
        let roster = vec![
            SessionParticipant::new("s", "b", 2),
            SessionParticipant::new("s", "a", 1),
            SessionParticipant::new("s", "c", 3),
        ];
        let mut spoken = HashSet::new();
        assert_eq!(chain_head(&roster, &spoken, false).unwrap().participant_id, "a");

        spoken.insert("a".to_string());
        assert_eq!(chain_head(&roster, &spoken, true).unwrap().participant_id, "b");
        // Fresh dispatch ignores statements
        assert_eq!(chain_head(&roster, &spoken, false).unwrap().participant_id, "a");

        spoken.insert("b".to_string());
        spoken.insert("c".to_string());
        assert_eq!(chain_head(&roster, &spoken, true).unwrap().participant_id, "c");
        assert!(chain_head(&[], &spoken, true).is_none());
    }

    struct Harness {
        state: StateManager,
        queue: ChannelQueue,
        dispatcher: RoundDispatcher,
    }

    async fn harness(stall_timeout_secs: u64) -> Harness {
        let state = StateManager::spawn_in_memory().unwrap();
        let queue = ChannelQueue::new(16);
        let events = Arc::new(EventBus::new(64));
        let gateway = Arc::new(GenerationGateway::new(
            Arc::new(MockLlmClient::failing()),
            &GatewayConfig::default(),
        ));
        let completion = Arc::new(CompletionHandler::new(
            state.clone(),
            gateway,
            Arc::new(PromptLoader::embedded_only()),
            events.clone(),
            &CompressionConfig::default(),
            CompletionConfig::default(),
        ));
        let dispatcher = RoundDispatcher::new(
            state.clone(),
            Arc::new(queue.clone()),
            completion,
            events,
            DispatcherConfig {
                stall_timeout_secs,
                ..Default::default()
            },
        );

        state.create(&Topic::with_id("t-1", "Zoning", "")).await.unwrap();
        let mut session = Session::with_id("s-1", "t-1", DebateMode::Quick);
        session.activate(2, now_ms());
        state.create(&session).await.unwrap();
        for (i, pid) in ["p-1", "p-2"].iter().enumerate() {
            state
                .create(&Participant::with_id(*pid, "owner", *pid, Persona::default()))
                .await
                .unwrap();
            state
                .create(&SessionParticipant::new("s-1", *pid, i as u32 + 1))
                .await
                .unwrap();
        }

        Harness {
            state,
            queue,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_dispatches_pending_round_once() {
        let h = harness(900).await;
        h.state.create(&Round::new("s-1", 1)).await.unwrap();

        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.dispatched, 1);

        let round: Round = h.state.require("s-1:r1").await.unwrap();
        assert_eq!(round.status, RoundStatus::Processing);
        assert!(round.started_at.is_some());
        let item = h.queue.try_dequeue().await.unwrap();
        assert_eq!(item.participant_id, "p-1");
        assert_eq!(item.attempt, 0);

        // Already in flight and not stalled: nothing to do
        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert!(h.queue.try_dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_resumes_stalled_round_at_first_silent_seat() {
        let h = harness(60).await;
        let mut round = Round::new("s-1", 1);
        round.mark_processing(now_ms() - 120_000);
        h.state.create(&round).await.unwrap();
        h.state
            .create(&Statement::new(&round, "p-1", 1, "said it"))
            .await
            .unwrap();

        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.resumed, 1);
        let item = h.queue.try_dequeue().await.unwrap();
        assert_eq!(item.participant_id, "p-2");

        let touched: Round = h.state.require("s-1:r1").await.unwrap();
        assert!(!touched.is_stalled(now_ms(), 60_000));
    }

    #[tokio::test]
    async fn test_recovers_session_missing_next_round() {
        let h = harness(60).await;
        let mut round = Round::new("s-1", 1);
        round.mark_processing(now_ms() - 300_000);
        round.mark_completed(now_ms() - 200_000);
        h.state.create(&round).await.unwrap();

        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.recovered, 1);
        let next: Round = h.state.require("s-1:r2").await.unwrap();
        assert_eq!(next.status, RoundStatus::Pending);

        // The recovered round is dispatched on the following cycle
        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.dispatched, 1);
    }

    #[tokio::test]
    async fn test_recent_completion_is_not_an_orphan() {
        let h = harness(900).await;
        let mut round = Round::new("s-1", 1);
        round.mark_processing(now_ms());
        round.mark_completed(now_ms());
        h.state.create(&round).await.unwrap();

        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.recovered, 0);
        assert!(h.state.get::<Round>("s-1:r2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_stops_at_queue_capacity() {
        let h = harness(900).await;
        for n in 2..=4 {
            let sid = format!("s-{}", n);
            let mut session = Session::with_id(&sid, "t-1", DebateMode::Quick);
            session.activate(2, now_ms());
            h.state.create(&session).await.unwrap();
            for (i, pid) in ["p-1", "p-2"].iter().enumerate() {
                h.state
                    .create(&SessionParticipant::new(&sid, *pid, i as u32 + 1))
                    .await
                    .unwrap();
            }
        }
        for n in 1..=4 {
            h.state.create(&Round::new(format!("s-{}", n), 1)).await.unwrap();
        }
        // Leave room for two chains
        let filler = WorkItem::for_seat(&Round::new("s-x", 1), &SessionParticipant::new("s-x", "p-1", 1));
        for _ in 0..14 {
            h.queue.enqueue(filler.clone()).await.unwrap();
        }

        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(h.queue.remaining(), 0);
        let pending = h.state.rounds_with_status(RoundStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 2);

        // Nothing more until workers drain the queue
        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.dispatched, 0);
        for _ in 0..16 {
            h.queue.try_dequeue().await.unwrap();
        }
        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.dispatched, 2);
    }

    #[tokio::test]
    async fn test_round_without_roster_is_marked_failed() {
        let h = harness(60).await;
        let mut session = Session::with_id("s-2", "t-1", DebateMode::Quick);
        session.activate(2, now_ms() - 300_000);
        h.state.create(&session).await.unwrap();
        h.state.create(&Round::new("s-2", 1)).await.unwrap();

        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.dispatched, 0);
        assert!(h.queue.try_dequeue().await.is_none());

        let round: Round = h.state.require("s-2:r1").await.unwrap();
        assert_eq!(round.status, RoundStatus::Failed);
        assert_eq!(h.state.get_metrics().await.unwrap().rounds_failed, 1);

        // The sweep leaves the session alone instead of opening round 2
        let report = h.dispatcher.run_cycle(now_ms()).await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert!(h.state.get::<Round>("s-2:r2").await.unwrap().is_none());
    }
}
