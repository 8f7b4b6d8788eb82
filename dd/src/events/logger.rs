//! Event Logger - persists events to JSONL files
//!
//! Subscribes to the EventBus and appends every event to a per-session
//! `events.jsonl` under the sessions directory. A session's writer is
//! released on its terminal event; anything arriving later is appended
//! without reopening a long-lived writer.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{DebateEvent, EventLogEntry};

/// Writes events to `{sessions_dir}/{session-id}/events.jsonl`
pub struct EventLogger {
    sessions_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
    closed: HashSet<String>,
}

impl EventLogger {
    pub fn new(sessions_dir: impl AsRef<Path>) -> Self {
        let sessions_dir = sessions_dir.as_ref().to_path_buf();
        debug!(?sessions_dir, "EventLogger::new: creating logger");
        Self {
            sessions_dir,
            writers: HashMap::new(),
            closed: HashSet::new(),
        }
    }

    fn open(&self, session_id: &str) -> eyre::Result<BufWriter<File>> {
        let dir = self.sessions_dir.join(session_id);
        fs::create_dir_all(&dir)?;
        let log_path = dir.join("events.jsonl");
        debug!(?log_path, "EventLogger: opening log file");
        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        Ok(BufWriter::new(file))
    }

    /// Number of sessions holding an open writer
    pub fn open_writers(&self) -> usize {
        self.writers.len()
    }

    /// Append an event to its session's log file
    pub fn write_event(&mut self, event: &DebateEvent) -> eyre::Result<()> {
        let session_id = event.session_id();
        debug!(%session_id, event_type = event.event_type(), "EventLogger::write_event");

        let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;

        if self.closed.contains(session_id) {
            let mut writer = self.open(session_id)?;
            writeln!(writer, "{}", json)?;
            writer.flush()?;
            return Ok(());
        }

        if !self.writers.contains_key(session_id) {
            let writer = self.open(session_id)?;
            self.writers.insert(session_id.to_string(), writer);
        }
        let Some(writer) = self.writers.get_mut(session_id) else {
            return Err(eyre::eyre!("no writer for session {}", session_id));
        };
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close the writer for a finished session
    pub fn close_session(&mut self, session_id: &str) {
        debug!(%session_id, "EventLogger::close_session");
        if let Some(mut writer) = self.writers.remove(session_id) {
            let _ = writer.flush();
        }
        self.closed.insert(session_id.to_string());
    }

    /// Consume events until every bus sender is gone
    pub async fn run(mut self, mut rx: broadcast::Receiver<DebateEvent>) {
        debug!("EventLogger::run: starting event logger");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = self.write_event(&event) {
                        error!(session_id = event.session_id(), error = %e, "EventLogger: failed to write event");
                    }
                    if event.is_terminal() {
                        self.close_session(event.session_id());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (session_id, mut writer) in self.writers.drain() {
            debug!(%session_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Default sessions directory (`~/.local/share/debatedaemon/sessions` on Linux)
pub fn default_sessions_dir() -> eyre::Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or_else(|| eyre::eyre!("Could not determine local data directory"))?;
    Ok(base.join("debatedaemon").join("sessions"))
}

/// Read the event log of one session
pub fn read_session_events(sessions_dir: impl AsRef<Path>, session_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = sessions_dir.as_ref().join(session_id).join("events.jsonl");
    debug!(?log_path, "read_session_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_session_events: failed to parse line"),
        }
    }
    Ok(entries)
}

/// Spawn the event logger as a background task
///
/// Subscribes before returning, so every event emitted after this call is
/// logged. The bus only closes once every sender is gone; the task holds no
/// strong reference to it.
pub fn spawn_event_logger(
    event_bus: Arc<EventBus>,
    sessions_dir: PathBuf,
) -> eyre::Result<tokio::task::JoinHandle<()>> {
    fs::create_dir_all(&sessions_dir)?;
    let rx = event_bus.subscribe();
    drop(event_bus);
    let logger = EventLogger::new(sessions_dir);
    Ok(tokio::spawn(logger.run(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn recorded(session: &str, order: u32) -> DebateEvent {
        DebateEvent::StatementRecorded {
            session_id: session.to_string(),
            round_number: 1,
            participant_id: format!("p-{}", order),
            speaking_order: order,
        }
    }

    #[test]
    fn test_write_event() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&recorded("s-1", 1)).unwrap();
        logger.write_event(&recorded("s-1", 2)).unwrap();

        let log_path = temp.path().join("s-1").join("events.jsonl");
        let content = fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("StatementRecorded"));
    }

    #[test]
    fn test_read_session_events() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());
        logger.write_event(&recorded("s-1", 1)).unwrap();
        logger.write_event(&recorded("s-2", 1)).unwrap();
        logger.close_session("s-1");

        let entries = read_session_events(temp.path(), "s-1").unwrap();
        assert_eq!(entries.len(), 1);
        assert!(read_session_events(temp.path(), "missing").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_writes_until_bus_dropped() {
        let temp = tempdir().unwrap();
        let bus = Arc::new(EventBus::new(16));
        let handle = spawn_event_logger(bus.clone(), temp.path().to_path_buf()).unwrap();

        // Subscribed on spawn: nothing emitted from here on is missed
        bus.emit(recorded("s-9", 1));
        bus.emit(DebateEvent::SessionCompleted {
            session_id: "s-9".to_string(),
            degraded: false,
        });
        drop(bus);
        handle.await.unwrap();

        let entries = read_session_events(temp.path(), "s-9").unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_events_after_terminal_do_not_reopen_writers() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        for n in 1..=3 {
            let session = format!("s-{}", n);
            logger.write_event(&recorded(&session, 1)).unwrap();
            let done = DebateEvent::SessionCompleted {
                session_id: session.clone(),
                degraded: false,
            };
            logger.write_event(&done).unwrap();
            logger.close_session(&session);
            logger
                .write_event(&DebateEvent::PersonaUpdated {
                    session_id: session.clone(),
                    participant_id: "p-1".to_string(),
                    version: 2,
                })
                .unwrap();
        }

        assert_eq!(logger.open_writers(), 0);
        let entries = read_session_events(temp.path(), "s-2").unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[2].event, DebateEvent::PersonaUpdated { .. }));
    }
}
