//! Seed files
//!
//! Loads topics, participants, knowledge and steering inputs from YAML so a
//! store can be populated without the admin surface.
//!
//! ```yaml
//! topics:
//!   - title: Universal basic income
//!     description: Should every adult receive one?
//! participants:
//!   - name: Ada
//!     persona:
//!       core-values: [rigor]
//!       thinking-style: analytical
//!     knowledge:
//!       - title: Pilot results
//!         content: Finland 2017-2018 ...
//!     strategy: Lead with data
//!     feedback: [Shorter openings]
//! ```

use std::path::Path;

use eyre::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{
    KnowledgeItem, Participant, ParticipantStatus, Persona, SteeringInput, SteeringKind, Topic, WriteBatch,
};
use crate::state::StateManager;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SeedFile {
    pub topics: Vec<TopicSeed>,
    pub participants: Vec<ParticipantSeed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TopicSeed {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PersonaSeed {
    pub core_values: Vec<String>,
    pub thinking_style: String,
    pub traits: Vec<String>,
    pub background: String,
}

impl From<PersonaSeed> for Persona {
    fn from(seed: PersonaSeed) -> Self {
        Persona {
            core_values: seed.core_values,
            thinking_style: seed.thinking_style,
            traits: seed.traits,
            background: seed.background,
            ..Persona::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KnowledgeSeed {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DirectiveSeed {
    pub session: String,
    pub round: u32,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ParticipantSeed {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default)]
    pub reserve: bool,
    #[serde(default)]
    pub persona: PersonaSeed,
    #[serde(default)]
    pub knowledge: Vec<KnowledgeSeed>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub feedback: Vec<String>,
    #[serde(default)]
    pub directives: Vec<DirectiveSeed>,
}

fn default_owner() -> String {
    "seed".to_string()
}

/// What a seed load wrote
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SeedReport {
    pub topics: usize,
    pub participants: usize,
    pub knowledge: usize,
    pub steering: usize,
}

impl SeedFile {
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse seed file")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "SeedFile::load: called");
        let content = std::fs::read_to_string(path).context(format!("Failed to read seed file {}", path.display()))?;
        Self::parse(&content)
    }

    /// Write everything in one batch; records with explicit IDs are upserted
    pub async fn apply(self, state: &StateManager) -> Result<SeedReport> {
        debug!(
            topics = self.topics.len(),
            participants = self.participants.len(),
            "SeedFile::apply: called"
        );
        let mut report = SeedReport::default();
        let mut batch = WriteBatch::new();

        for seed in self.topics {
            let topic = match seed.id {
                Some(id) => Topic::with_id(id, seed.title, seed.description),
                None => Topic::new(seed.title, seed.description),
            };
            batch.upsert(&topic)?;
            report.topics += 1;
        }

        for seed in self.participants {
            let persona = Persona::from(seed.persona);
            let mut participant = match seed.id {
                Some(id) => Participant::with_id(id, seed.owner, seed.name, persona),
                None => Participant::new(seed.owner, seed.name, persona),
            };
            if seed.reserve {
                participant.set_status(ParticipantStatus::Reserve);
            }
            batch.upsert(&participant)?;
            report.participants += 1;

            for item in seed.knowledge {
                batch.insert(&KnowledgeItem::new(&participant.id, item.title, item.content))?;
                report.knowledge += 1;
            }
            if let Some(strategy) = seed.strategy {
                batch.insert(&SteeringInput::new(&participant.id, SteeringKind::Strategy, strategy))?;
                report.steering += 1;
            }
            for feedback in seed.feedback {
                batch.insert(&SteeringInput::new(&participant.id, SteeringKind::Feedback, feedback))?;
                report.steering += 1;
            }
            for directive in seed.directives {
                let input = SteeringInput::new(&participant.id, SteeringKind::Directive, directive.content)
                    .targeting(directive.session, directive.round);
                batch.insert(&input)?;
                report.steering += 1;
            }
        }

        state.commit(batch).await?;
        info!(?report, "Seed applied");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"
topics:
  - id: t-ubi
    title: Universal basic income
    description: Should every adult receive one?
  - title: Nuclear power
participants:
  - id: p-ada
    name: Ada
    persona:
      core-values: [rigor, honesty]
      thinking-style: analytical
    knowledge:
      - title: Pilot results
        content: Employment effects were small.
    strategy: Lead with data
    feedback: [Shorter openings]
    directives:
      - session: s-1
        round: 2
        content: Concede one point
  - name: Grace
    reserve: true
"#;

    #[tokio::test]
    async fn test_seed_roundtrip_into_store() {
        let state = StateManager::spawn_in_memory().unwrap();
        let report = SeedFile::parse(SEED).unwrap().apply(&state).await.unwrap();
        assert_eq!(
            report,
            SeedReport {
                topics: 2,
                participants: 2,
                knowledge: 1,
                steering: 3,
            }
        );

        let topic: Topic = state.require("t-ubi").await.unwrap();
        assert_eq!(topic.title, "Universal basic income");
        assert_eq!(state.active_topics().await.unwrap().len(), 2);

        let ada: Participant = state.require("p-ada").await.unwrap();
        assert_eq!(ada.persona.core_values, vec!["rigor".to_string(), "honesty".to_string()]);
        assert_eq!(ada.persona.version, 1);
        assert_eq!(state.knowledge_for("p-ada").await.unwrap().len(), 1);
        assert_eq!(state.unapplied_feedback("p-ada").await.unwrap().len(), 1);

        let directives = state.steering_for("p-ada", SteeringKind::Directive).await.unwrap();
        assert!(directives[0].targets("s-1", 2));

        let reserve = state.list_participants(Some(ParticipantStatus::Reserve)).await.unwrap();
        assert_eq!(reserve.len(), 1);
        assert_eq!(reserve[0].name, "Grace");
    }

    #[tokio::test]
    async fn test_reseeding_explicit_ids_upserts() {
        let state = StateManager::spawn_in_memory().unwrap();
        let yaml = "topics:\n  - id: t-1\n    title: First\n";
        SeedFile::parse(yaml).unwrap().apply(&state).await.unwrap();
        let yaml = "topics:\n  - id: t-1\n    title: Renamed\n";
        SeedFile::parse(yaml).unwrap().apply(&state).await.unwrap();

        let topics = state.active_topics().await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "Renamed");
    }

    #[test]
    fn test_parse_rejects_missing_title() {
        assert!(SeedFile::parse("topics:\n  - description: no title\n").is_err());
    }
}
