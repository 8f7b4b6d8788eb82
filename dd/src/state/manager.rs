//! StateManager - actor that owns the DebateStore
//!
//! Processes commands via channels for thread-safe access to persistent state.
//! Every component (scheduler, dispatcher, workers, completion handler) holds a
//! cloned handle; the single actor task serializes their reads and writes, which
//! is what makes guarded inserts and conditional transitions race-free.

use debatestore::{Document, Filter, IndexValue, Record, Store, WriteBatch};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{
    KnowledgeItem, Participant, ParticipantStatus, Round, RoundStatus, Session, SessionParticipant, SessionStatus,
    Statement, SteeringInput, SteeringKind, Topic, TopicStatus,
};

use super::messages::{StateCommand, StateError, StateResponse};

/// Aggregated counts of the pipeline's records
#[derive(Debug, Default, serde::Serialize)]
pub struct PipelineMetrics {
    pub sessions_pending: u64,
    pub sessions_active: u64,
    pub sessions_completed: u64,
    pub sessions_cancelled: u64,
    pub rounds_pending: u64,
    pub rounds_processing: u64,
    pub rounds_completed: u64,
    pub rounds_failed: u64,
}

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor over an on-disk store
    pub fn spawn(store_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "spawn: called");
        let mut store = Store::open(store_path.as_ref())?;

        // Index definitions may have changed since the records were written
        let sessions = store.rebuild_indexes::<Session>()?;
        let rounds = store.rebuild_indexes::<Round>()?;
        let steering = store.rebuild_indexes::<SteeringInput>()?;
        info!(sessions, rounds, steering, "Rebuilt indexes for Session, Round and SteeringInput records");

        Ok(Self::start(store))
    }

    /// Spawn a StateManager over a throwaway in-memory store
    pub fn spawn_in_memory() -> eyre::Result<Self> {
        debug!("spawn_in_memory: called");
        Ok(Self::start(Store::open_in_memory()?))
    }

    fn start(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    // === Raw document operations ===

    async fn get_document(&self, collection: &str, id: &str) -> StateResponse<Option<Document>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::Get {
                collection: collection.to_string(),
                id: id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    async fn list_documents(&self, collection: &str, filters: Vec<Filter>) -> StateResponse<Vec<Document>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::List {
                collection: collection.to_string(),
                filters,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Apply a write batch atomically
    ///
    /// Returns `false` (and writes nothing) when a guarded write did not hold.
    pub async fn commit(&self, batch: WriteBatch) -> StateResponse<bool> {
        debug!(op_count = batch.len(), "commit: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::Commit { batch, reply: reply_tx })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Typed record operations ===

    /// Get a record by ID
    pub async fn get<R: Record>(&self, id: &str) -> StateResponse<Option<R>> {
        debug!(collection = R::collection_name(), %id, "get: called");
        match self.get_document(R::collection_name(), id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Get a record by ID, treating absence as an error
    pub async fn require<R: Record>(&self, id: &str) -> StateResponse<R> {
        self.get(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("{}/{}", R::collection_name(), id)))
    }

    /// List records matching every filter
    pub async fn list<R: Record>(&self, filters: Vec<Filter>) -> StateResponse<Vec<R>> {
        debug!(collection = R::collection_name(), filter_count = filters.len(), "list: called");
        let docs = self.list_documents(R::collection_name(), filters).await?;
        docs.iter().map(|doc| doc.decode().map_err(StateError::from)).collect()
    }

    /// Create a new record; fails with `Conflict` if the ID exists
    pub async fn create<R: Record>(&self, record: &R) -> StateResponse<String> {
        debug!(collection = R::collection_name(), id = record.id(), "create: called");
        let mut batch = WriteBatch::new();
        batch.insert(record)?;
        self.commit(batch).await?;
        Ok(record.id().to_string())
    }

    /// Replace an existing record
    pub async fn update<R: Record>(&self, record: &R) -> StateResponse<()> {
        debug!(collection = R::collection_name(), id = record.id(), "update: called");
        let mut batch = WriteBatch::new();
        batch.update(record)?;
        self.commit(batch).await?;
        Ok(())
    }

    /// Create or replace a record
    pub async fn upsert<R: Record>(&self, record: &R) -> StateResponse<()> {
        debug!(collection = R::collection_name(), id = record.id(), "upsert: called");
        let mut batch = WriteBatch::new();
        batch.upsert(record)?;
        self.commit(batch).await?;
        Ok(())
    }

    /// Create a record unless its ID is taken; returns whether it was written
    pub async fn insert_if_absent<R: Record>(&self, record: &R) -> StateResponse<bool> {
        debug!(collection = R::collection_name(), id = record.id(), "insert_if_absent: called");
        let mut batch = WriteBatch::new();
        batch.insert_if_absent(record)?;
        self.commit(batch).await
    }

    /// Replace a record only while its stored `field` equals `expected`
    pub async fn transition<R: Record>(
        &self,
        record: &R,
        field: &str,
        expected: impl Into<IndexValue>,
    ) -> StateResponse<bool> {
        let expected = expected.into();
        debug!(collection = R::collection_name(), id = record.id(), %field, %expected, "transition: called");
        let mut batch = WriteBatch::new();
        batch.update_if(record, field, expected)?;
        self.commit(batch).await
    }

    // === Domain queries ===

    /// Topics the scheduler may use
    pub async fn active_topics(&self) -> StateResponse<Vec<Topic>> {
        self.list(vec![Filter::eq("status", TopicStatus::Active.to_string())]).await
    }

    pub async fn list_participants(&self, status: Option<ParticipantStatus>) -> StateResponse<Vec<Participant>> {
        debug!(?status, "list_participants: called");
        let filters = status
            .map(|s| vec![Filter::eq("status", s.to_string())])
            .unwrap_or_default();
        self.list(filters).await
    }

    pub async fn list_sessions(&self, status: Option<SessionStatus>) -> StateResponse<Vec<Session>> {
        debug!(?status, "list_sessions: called");
        let filters = status
            .map(|s| vec![Filter::eq("status", s.to_string())])
            .unwrap_or_default();
        self.list(filters).await
    }

    /// Seats of a session in speaking order
    pub async fn roster(&self, session_id: &str) -> StateResponse<Vec<SessionParticipant>> {
        debug!(%session_id, "roster: called");
        let mut seats: Vec<SessionParticipant> = self.list(vec![Filter::eq("session_id", session_id)]).await?;
        seats.sort_by_key(|s| s.speaking_order);
        Ok(seats)
    }

    /// Display names of seated participants, keyed by participant ID
    ///
    /// Seats whose participant record is gone are left out.
    pub async fn participant_names(&self, seats: &[SessionParticipant]) -> StateResponse<HashMap<String, String>> {
        debug!(seat_count = seats.len(), "participant_names: called");
        let mut names = HashMap::new();
        for seat in seats {
            if let Some(participant) = self.get::<Participant>(&seat.participant_id).await? {
                names.insert(participant.id, participant.name);
            }
        }
        Ok(names)
    }

    /// Rounds of a session in round order
    pub async fn rounds_for_session(&self, session_id: &str) -> StateResponse<Vec<Round>> {
        debug!(%session_id, "rounds_for_session: called");
        let mut rounds: Vec<Round> = self.list(vec![Filter::eq("session_id", session_id)]).await?;
        rounds.sort_by_key(|r| r.round_number);
        Ok(rounds)
    }

    /// Rounds in a given status, oldest first
    pub async fn rounds_with_status(&self, status: RoundStatus) -> StateResponse<Vec<Round>> {
        debug!(%status, "rounds_with_status: called");
        let mut rounds: Vec<Round> = self.list(vec![Filter::eq("status", status.to_string())]).await?;
        rounds.sort_by_key(|r| (r.created_at, r.round_number));
        Ok(rounds)
    }

    /// Statements of a session in (round, speaking order) order
    pub async fn statements_for_session(&self, session_id: &str) -> StateResponse<Vec<Statement>> {
        debug!(%session_id, "statements_for_session: called");
        let mut statements: Vec<Statement> = self.list(vec![Filter::eq("session_id", session_id)]).await?;
        statements.sort_by_key(|s| (s.round_number, s.speaking_order));
        Ok(statements)
    }

    /// Statements of a round in speaking order
    pub async fn statements_for_round(&self, round_id: &str) -> StateResponse<Vec<Statement>> {
        debug!(%round_id, "statements_for_round: called");
        let mut statements: Vec<Statement> = self.list(vec![Filter::eq("round_id", round_id)]).await?;
        statements.sort_by_key(|s| s.speaking_order);
        Ok(statements)
    }

    pub async fn knowledge_for(&self, participant_id: &str) -> StateResponse<Vec<KnowledgeItem>> {
        self.list(vec![Filter::eq("participant_id", participant_id)]).await
    }

    /// Steering inputs of one kind for a participant, oldest first
    pub async fn steering_for(&self, participant_id: &str, kind: SteeringKind) -> StateResponse<Vec<SteeringInput>> {
        debug!(%participant_id, %kind, "steering_for: called");
        let mut inputs: Vec<SteeringInput> = self
            .list(vec![
                Filter::eq("participant_id", participant_id),
                Filter::eq("kind", kind.to_string()),
            ])
            .await?;
        inputs.sort_by_key(|s| s.created_at);
        Ok(inputs)
    }

    /// Feedback not yet folded into the persona
    pub async fn unapplied_feedback(&self, participant_id: &str) -> StateResponse<Vec<SteeringInput>> {
        let mut inputs: Vec<SteeringInput> = self
            .list(vec![
                Filter::eq("participant_id", participant_id),
                Filter::eq("kind", SteeringKind::Feedback.to_string()),
                Filter::eq("applied", false),
            ])
            .await?;
        inputs.sort_by_key(|s| s.created_at);
        Ok(inputs)
    }

    /// Count sessions and rounds by status
    pub async fn get_metrics(&self) -> StateResponse<PipelineMetrics> {
        debug!("get_metrics: called");
        let mut metrics = PipelineMetrics::default();

        for session in self.list::<Session>(Vec::new()).await? {
            match session.status {
                SessionStatus::Pending => metrics.sessions_pending += 1,
                SessionStatus::Active => metrics.sessions_active += 1,
                SessionStatus::Completed => metrics.sessions_completed += 1,
                SessionStatus::Cancelled => metrics.sessions_cancelled += 1,
            }
        }
        for round in self.list::<Round>(Vec::new()).await? {
            match round.status {
                RoundStatus::Pending => metrics.rounds_pending += 1,
                RoundStatus::Processing => metrics.rounds_processing += 1,
                RoundStatus::Completed => metrics.rounds_completed += 1,
                RoundStatus::Failed => metrics.rounds_failed += 1,
            }
        }

        Ok(metrics)
    }

    /// Stop the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// Actor loop: owns the store and serves commands one at a time
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: called");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Get { collection, id, reply } => {
                debug!(%collection, %id, "actor_loop: Get command");
                let result = store.get_document(&collection, &id).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::List {
                collection,
                filters,
                reply,
            } => {
                debug!(%collection, filter_count = filters.len(), "actor_loop: List command");
                let result = store.list_documents(&collection, &filters).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::Commit { batch, reply } => {
                debug!(op_count = batch.len(), "actor_loop: Commit command");
                let result = store.commit(batch).map_err(StateError::from);
                if let Err(ref e) = result {
                    warn!(error = %e, "actor_loop: commit failed");
                }
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("actor_loop: exited");
}
