//! End-to-end pipeline runs over an in-memory store

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use debatedaemon::completion::SUMMARY_PLACEHOLDER;
use debatedaemon::config::Config;
use debatedaemon::domain::{DebateMode, Participant, Round, RoundStatus, Session, SessionStatus, now_ms};
use debatedaemon::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError};
use debatedaemon::pipeline::Pipeline;
use debatedaemon::seed::SeedFile;
use debatedaemon::state::StateManager;

const SEED: &str = r#"
topics:
  - id: t-ubi
    title: Universal basic income
participants:
  - id: p-0
    name: Ada
    feedback: [Open with a concrete example]
  - id: p-1
    name: Grace
  - id: p-2
    name: Alan
  - id: p-3
    name: Barbara
"#;

const VERDICT: &str = r#"{"scores": [
    {"participant_id": "p-0", "logic": 9, "evidence": 8, "persuasiveness": 8, "consistency": 9},
    {"participant_id": "p-1", "logic": 7, "evidence": 7, "persuasiveness": 6, "consistency": 7},
    {"participant_id": "p-2", "logic": 6, "evidence": 5, "persuasiveness": 6, "consistency": 6},
    {"participant_id": "p-3", "logic": 5, "evidence": 6, "persuasiveness": 5, "consistency": 6}
], "winner": "p-0", "rationale": "Most concrete"}"#;

/// Answers by request shape; counts every call
struct ScriptedClient {
    calls: AtomicUsize,
    fail: bool,
}

impl ScriptedClient {
    fn answering() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LlmError::ApiError {
                status: 400,
                message: "scripted failure".to_string(),
            });
        }
        let user = request.messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let text = if request.system_prompt.contains("debate judge") {
            VERDICT.to_string()
        } else if user.contains("revised persona") {
            r#"{"traits": ["concrete"]}"#.to_string()
        } else if request.system_prompt.contains("summaries of debates") {
            "Ada carried the room.".to_string()
        } else {
            format!(r#"{{"statement": "Point number {}.", "summary": "point {}"}}"#, n, n)
        };
        Ok(CompletionResponse::text(text))
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.scheduler.roster_size = 4;
    config.scheduler.max_sessions_per_participant = 2;
    config.scheduler.default_mode = DebateMode::Quick;
    config.scheduler.seed = Some(7);
    config.gateway.max_retries = 0;
    config
}

async fn seeded_pipeline(client: Arc<dyn LlmClient>) -> Pipeline {
    let state = StateManager::spawn_in_memory().unwrap();
    SeedFile::parse(SEED).unwrap().apply(&state).await.unwrap();
    Pipeline::build(config(), state, client)
}

/// Dispatch ready rounds and run every queued turn to the end of its chain
async fn dispatch_and_drain(pipeline: &Pipeline) -> usize {
    let report = pipeline.dispatcher.run_cycle(now_ms()).await.unwrap();
    let mut turns = 0;
    while let Some(item) = pipeline.queue.try_dequeue().await {
        pipeline.executor.handle(&item).await.unwrap();
        turns += 1;
    }
    assert!(turns >= report.dispatched + report.resumed);
    turns
}

async fn only_session(state: &StateManager) -> Session {
    let sessions = state.list_sessions(None).await.unwrap();
    assert_eq!(sessions.len(), 1);
    sessions.into_iter().next().unwrap()
}

#[tokio::test]
async fn test_first_round_leads_to_second() {
    let pipeline = seeded_pipeline(Arc::new(ScriptedClient::answering())).await;

    let report = pipeline.scheduler.run_cycle(now_ms()).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.seated, 4);

    let turns = dispatch_and_drain(&pipeline).await;
    assert_eq!(turns, 4);

    let session = only_session(&pipeline.state).await;
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.current_round, 1);

    let rounds = pipeline.state.rounds_for_session(&session.id).await.unwrap();
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0].status, RoundStatus::Completed);
    assert_eq!(rounds[1].round_number, 2);
    assert_eq!(rounds[1].status, RoundStatus::Pending);

    let statements = pipeline.state.statements_for_round(&rounds[0].id).await.unwrap();
    let orders: Vec<u32> = statements.iter().map(|s| s.speaking_order).collect();
    assert_eq!(orders, vec![1, 2, 3, 4]);
    assert!(statements.iter().all(|s| s.summary.is_some()));
}

#[tokio::test]
async fn test_quick_session_runs_to_verdict() {
    let pipeline = seeded_pipeline(Arc::new(ScriptedClient::answering())).await;
    pipeline.scheduler.run_cycle(now_ms()).await.unwrap();

    for _ in 0..3 {
        assert_eq!(dispatch_and_drain(&pipeline).await, 4);
    }

    let session = only_session(&pipeline.state).await;
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.current_round, 3);
    assert_eq!(session.summary.as_deref(), Some("Ada carried the room."));
    let verdict = session.verdict.unwrap();
    assert!(!verdict.placeholder);
    assert_eq!(verdict.winner.as_deref(), Some("p-0"));
    assert_eq!(verdict.scores.len(), 4);

    assert_eq!(pipeline.state.statements_for_session(&session.id).await.unwrap().len(), 12);
    assert!(pipeline.state.get::<Round>(&format!("{}:r4", session.id)).await.unwrap().is_none());

    // Only the participant with pending feedback gets a new persona
    let ada: Participant = pipeline.state.require("p-0").await.unwrap();
    assert_eq!(ada.persona.version, 2);
    assert_eq!(ada.persona.traits, vec!["concrete".to_string()]);
    let grace: Participant = pipeline.state.require("p-1").await.unwrap();
    assert_eq!(grace.persona.version, 1);

    // A further cycle finds nothing to do
    assert_eq!(dispatch_and_drain(&pipeline).await, 0);
}

#[tokio::test]
async fn test_failing_provider_closes_with_placeholders() {
    let client = Arc::new(ScriptedClient::failing());
    let pipeline = seeded_pipeline(client.clone()).await;
    pipeline.scheduler.run_cycle(now_ms()).await.unwrap();

    for _ in 0..3 {
        dispatch_and_drain(&pipeline).await;
    }

    let session = only_session(&pipeline.state).await;
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.summary.as_deref(), Some(SUMMARY_PLACEHOLDER));
    assert!(session.verdict.unwrap().placeholder);
    assert!(pipeline.state.statements_for_session(&session.id).await.unwrap().is_empty());

    let ada: Participant = pipeline.state.require("p-0").await.unwrap();
    assert_eq!(ada.persona.version, 1);
    assert_eq!(pipeline.state.unapplied_feedback("p-0").await.unwrap().len(), 1);
    assert!(client.calls.load(Ordering::SeqCst) >= 12);
}
