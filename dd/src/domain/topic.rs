//! Topic domain type

use debatestore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::id::generate_id;

/// Topic lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    /// Available to the scheduler
    #[default]
    Active,
    /// Kept for history, never scheduled
    Archived,
}

impl fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicStatus::Active => write!(f, "active"),
            TopicStatus::Archived => write!(f, "archived"),
        }
    }
}

/// A proposition participants debate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TopicStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Topic {
    /// Create an active topic with a generated ID
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let title = title.into();
        let id = generate_id("topic", &title);
        Self::with_id(id, title, description)
    }

    /// Create an active topic with a known ID
    pub fn with_id(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = now_ms();
        let topic = Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: TopicStatus::Active,
            created_at: now,
            updated_at: now,
        };
        debug!(id = %topic.id, title = %topic.title, "Topic::with_id: called");
        topic
    }

    pub fn set_status(&mut self, status: TopicStatus) {
        debug!(id = %self.id, %status, "Topic::set_status: called");
        self.status = status;
        self.updated_at = now_ms();
    }
}

impl Record for Topic {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "topics"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_new() {
        let topic = Topic::new("Universal basic income", "Should every adult receive one?");
        assert!(topic.id.contains("-topic-universal-basic-income"));
        assert_eq!(topic.status, TopicStatus::Active);
    }

    #[test]
    fn test_topic_archive() {
        let mut topic = Topic::with_id("t1", "Title", "");
        topic.set_status(TopicStatus::Archived);
        assert_eq!(
            topic.indexed_fields().get("status"),
            Some(&IndexValue::String("archived".to_string()))
        );
    }
}
