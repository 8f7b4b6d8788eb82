//! Session scheduler
//!
//! Opens a fresh set of sessions every cycle from the active topics and the
//! eligible participants. Each session, its roster and its first round are
//! written in one batch, so a session is never visible half-built.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::eyre;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{ParticipantStatus, Round, Session, SessionParticipant, Topic, WriteBatch};
use crate::events::{DebateEvent, EventBus};
use crate::jobs::{Job, JobReport};
use crate::state::StateManager;

use super::config::SchedulerConfig;
use super::plan::{PlanParams, PlannedSession, plan_cycle};

/// Counts from one scheduling cycle
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub eligible: usize,
    pub topics: usize,
    pub created: usize,
    pub cancelled: usize,
    /// Seats filled across all created sessions
    pub seated: usize,
    pub session_ids: Vec<String>,
}

impl ScheduleReport {
    pub fn summary(&self) -> String {
        format!(
            "{} sessions created ({} seats), {} cancelled from {} eligible participants and {} topics",
            self.created, self.seated, self.cancelled, self.eligible, self.topics
        )
    }
}

pub struct SessionScheduler {
    state: StateManager,
    config: SchedulerConfig,
    rng: Mutex<StdRng>,
    events: Arc<EventBus>,
}

impl SessionScheduler {
    /// Create a scheduler; a configured seed makes cycles reproducible
    pub fn new(state: StateManager, config: SchedulerConfig, events: Arc<EventBus>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(state, config, events, rng)
    }

    pub fn with_rng(state: StateManager, config: SchedulerConfig, events: Arc<EventBus>, rng: StdRng) -> Self {
        debug!(
            roster_size = config.roster_size,
            max_sessions = config.max_sessions_per_participant,
            "SessionScheduler::new: called"
        );
        Self {
            state,
            config,
            rng: Mutex::new(rng),
            events,
        }
    }

    /// One scheduling cycle at `now` (ms since epoch)
    pub async fn run_cycle(&self, now: i64) -> eyre::Result<ScheduleReport> {
        debug!(now, "run_cycle: called");
        let topics = self.state.active_topics().await?;
        let participants = self.state.list_participants(Some(ParticipantStatus::Active)).await?;
        let window = self.config.activity_window_ms();
        let eligible: Vec<String> = participants
            .into_iter()
            .filter(|p| p.is_eligible(now, window))
            .map(|p| p.id)
            .collect();

        let mut report = ScheduleReport {
            eligible: eligible.len(),
            topics: topics.len(),
            ..Default::default()
        };
        if eligible.is_empty() || topics.is_empty() {
            info!(
                eligible = eligible.len(),
                topics = topics.len(),
                "Nothing to schedule this cycle"
            );
            return Ok(report);
        }

        let topic_ids: Vec<String> = topics.iter().map(|t| t.id.clone()).collect();
        let params = PlanParams {
            roster_size: self.config.roster_size,
            max_sessions: self.config.max_sessions_per_participant,
        };
        let plan = {
            let mut rng = self.rng.lock().map_err(|_| eyre!("Scheduler RNG lock poisoned"))?;
            plan_cycle(&topic_ids, &eligible, params, &mut *rng)
        };
        info!(sessions = plan.sessions.len(), "Cycle planned");

        let titles: HashMap<&str, &Topic> = topics.iter().map(|t| (t.id.as_str(), t)).collect();
        for planned in &plan.sessions {
            let title = titles
                .get(planned.topic_id.as_str())
                .map(|t| t.title.as_str())
                .unwrap_or("");
            let session = self.open_session(planned, title, now).await?;
            if planned.roster.is_empty() {
                report.cancelled += 1;
            } else {
                report.created += 1;
                report.seated += planned.roster.len();
            }
            report.session_ids.push(session.id);
        }

        Ok(report)
    }

    /// Write one planned session with its roster and round 1
    ///
    /// A plan with nobody seated is recorded as cancelled.
    async fn open_session(&self, planned: &PlannedSession, topic_title: &str, now: i64) -> eyre::Result<Session> {
        debug!(topic_id = %planned.topic_id, seats = planned.roster.len(), "open_session: called");
        let mut session = Session::new(&planned.topic_id, topic_title, self.config.default_mode);

        if planned.roster.is_empty() {
            session.cancel(now);
            self.state.create(&session).await?;
            warn!(
                session_id = %session.id,
                topic_id = %planned.topic_id,
                "Planned session has no participants; cancelled"
            );
            self.events.emit(DebateEvent::SessionCancelled {
                session_id: session.id.clone(),
                topic_id: planned.topic_id.clone(),
            });
            return Ok(session);
        }

        session.activate(planned.roster.len() as u32, now);

        let mut batch = WriteBatch::new();
        batch.insert(&session)?;
        for (i, participant_id) in planned.roster.iter().enumerate() {
            batch.insert(&SessionParticipant::new(&session.id, participant_id, i as u32 + 1))?;
        }
        batch.insert(&Round::new(&session.id, 1))?;
        self.state.commit(batch).await?;

        info!(
            session_id = %session.id,
            topic_id = %planned.topic_id,
            participants = planned.roster.len(),
            mode = %session.mode,
            "Session created"
        );
        self.events.emit(DebateEvent::SessionCreated {
            session_id: session.id.clone(),
            topic_id: planned.topic_id.clone(),
            participant_count: session.participant_count,
        });
        Ok(session)
    }
}

#[async_trait]
impl Job for SessionScheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn run(&self, now: DateTime<Utc>) -> eyre::Result<JobReport> {
        let report = self.run_cycle(now.timestamp_millis()).await?;
        Ok(JobReport::new(
            self.name(),
            report.created + report.cancelled,
            report.summary(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Participant, Persona, RoundStatus, SessionStatus, TopicStatus, now_ms};

    async fn seed(state: &StateManager, topics: usize, participants: usize) {
        for i in 0..topics {
            state
                .create(&Topic::with_id(format!("t-{}", i), format!("Topic {}", i), ""))
                .await
                .unwrap();
        }
        for i in 0..participants {
            state
                .create(&Participant::with_id(
                    format!("p-{}", i),
                    "owner",
                    format!("P{}", i),
                    Persona::default(),
                ))
                .await
                .unwrap();
        }
    }

    fn scheduler(state: &StateManager) -> SessionScheduler {
        let config = SchedulerConfig {
            roster_size: 4,
            max_sessions_per_participant: 2,
            seed: Some(11),
            ..Default::default()
        };
        SessionScheduler::new(state.clone(), config, Arc::new(EventBus::new(64)))
    }

    #[tokio::test]
    async fn test_four_participants_one_topic() {
        let state = StateManager::spawn_in_memory().unwrap();
        seed(&state, 1, 4).await;

        let report = scheduler(&state).run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.seated, 4);

        let sessions = state.list_sessions(None).await.unwrap();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.participant_count, 4);
        assert_eq!(session.current_round, 0);

        let roster = state.roster(&session.id).await.unwrap();
        let orders: Vec<u32> = roster.iter().map(|s| s.speaking_order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);

        let rounds = state.rounds_for_session(&session.id).await.unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].round_number, 1);
        assert_eq!(rounds[0].status, RoundStatus::Pending);
    }

    #[tokio::test]
    async fn test_nothing_scheduled_without_topics_or_participants() {
        let state = StateManager::spawn_in_memory().unwrap();
        seed(&state, 0, 4).await;
        let report = scheduler(&state).run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.created, 0);

        let state = StateManager::spawn_in_memory().unwrap();
        seed(&state, 2, 0).await;
        let report = scheduler(&state).run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.created, 0);
        assert!(state.list_sessions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ineligible_participants_are_skipped() {
        let state = StateManager::spawn_in_memory().unwrap();
        seed(&state, 1, 3).await;

        let mut reserve: Participant = state.require("p-0").await.unwrap();
        reserve.set_status(ParticipantStatus::Reserve);
        state.update(&reserve).await.unwrap();

        let mut idle: Participant = state.require("p-1").await.unwrap();
        idle.last_active_at = now_ms() - 30 * 24 * 3600 * 1000;
        state.update(&idle).await.unwrap();

        let mut archived: Topic = state.require("t-0").await.unwrap();
        archived.set_status(TopicStatus::Archived);
        state.update(&archived).await.unwrap();
        state.create(&Topic::with_id("t-live", "Live", "")).await.unwrap();

        let report = scheduler(&state).run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.eligible, 1);
        assert_eq!(report.topics, 1);
        assert_eq!(report.created, 1);

        let session = &state.list_sessions(None).await.unwrap()[0];
        assert_eq!(session.topic_id, "t-live");
        let roster = state.roster(&session.id).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].participant_id, "p-2");
    }

    #[tokio::test]
    async fn test_cap_and_coverage_across_sessions() {
        let state = StateManager::spawn_in_memory().unwrap();
        seed(&state, 4, 10).await;

        let report = scheduler(&state).run_cycle(now_ms()).await.unwrap();
        assert_eq!(report.created, 4);

        let mut loads: HashMap<String, usize> = HashMap::new();
        for session in state.list_sessions(None).await.unwrap() {
            for seat in state.roster(&session.id).await.unwrap() {
                *loads.entry(seat.participant_id).or_default() += 1;
            }
        }
        assert_eq!(loads.len(), 10);
        assert!(loads.values().all(|&n| (1..=2).contains(&n)));
    }

    #[tokio::test]
    async fn test_empty_plan_is_cancelled() {
        let state = StateManager::spawn_in_memory().unwrap();
        let sched = scheduler(&state);
        let mut rx = sched.events.subscribe();

        let planned = PlannedSession {
            topic_id: "t-0".to_string(),
            roster: Vec::new(),
        };
        let session = sched.open_session(&planned, "Topic 0", now_ms()).await.unwrap();

        let stored: Session = state.require(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Cancelled);
        assert!(state.rounds_for_session(&session.id).await.unwrap().is_empty());
        assert!(state.roster(&session.id).await.unwrap().is_empty());
        assert!(matches!(rx.try_recv().unwrap(), DebateEvent::SessionCancelled { .. }));
    }
}
