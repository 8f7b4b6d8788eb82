//! Prompt Loader
//!
//! Loads prompt templates from an override directory or falls back to the
//! embedded defaults.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Loads and renders prompt templates
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    /// Directory with `{name}.pmt` overrides
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a loader that prefers `{dir}/{name}.pmt` when present
    pub fn new(dir: Option<&Path>) -> Self {
        let override_dir = dir.filter(|d| d.exists()).map(Path::to_path_buf);
        debug!(?override_dir, "PromptLoader::new: called");
        Self {
            hbs: Self::engine(),
            override_dir,
        }
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Self {
        Self {
            hbs: Self::engine(),
            override_dir: None,
        }
    }

    fn engine() -> Handlebars<'static> {
        let mut hbs = Handlebars::new();
        // Prompts are plain text, not HTML
        hbs.register_escape_fn(handlebars::no_escape);
        hbs
    }

    /// Load a template by name
    ///
    /// Checks in order:
    /// 1. Override: `{override_dir}/{name}.pmt`
    /// 2. Embedded fallback
    fn load_template(&self, name: &str) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!("Loading prompt from override: {:?}", path);
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
        }

        if let Some(content) = embedded::get_embedded(name) {
            debug!("Using embedded prompt: {}", name);
            return Ok(content.to_string());
        }

        Err(eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> Result<String> {
        debug!(%template_name, "render: called");
        let template = self.load_template(template_name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }
}

impl Default for PromptLoader {
    fn default() -> Self {
        Self::embedded_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Persona;
    use crate::prompts::{HistoryContext, KnowledgeNote, PersonaContext, StatementContext};
    use std::fs;
    use tempfile::tempdir;

    fn statement_context() -> StatementContext {
        StatementContext {
            name: "Ada".to_string(),
            persona: Persona {
                core_values: vec!["rigor".to_string(), "candor".to_string()],
                thinking_style: "analytical".to_string(),
                ..Default::default()
            },
            topic_title: "Should cities ban cars?".to_string(),
            topic_description: String::new(),
            round_number: 2,
            max_rounds: 5,
            phase: "rebuttal".to_string(),
            phase_guidance: "Respond.".to_string(),
            knowledge: vec![KnowledgeNote {
                title: "Traffic data".to_string(),
                content: "Congestion fell 20% in <city>".to_string(),
            }],
            strategy: None,
            directive: Some("Press on costs & benefits".to_string()),
        }
    }

    #[test]
    fn test_render_statement_system() {
        let loader = PromptLoader::embedded_only();
        let text = loader.render("statement-system", &statement_context()).unwrap();

        assert!(text.contains("You are Ada"));
        assert!(text.contains("Core values: rigor, candor"));
        assert!(text.contains("round 2 of 5, the rebuttal phase"));
        assert!(text.contains("Congestion fell 20% in <city>"));
        assert!(text.contains("Press on costs & benefits"));
        assert!(!text.contains("standing strategy"));
    }

    #[test]
    fn test_render_statement_user_without_history() {
        let loader = PromptLoader::embedded_only();
        let text = loader
            .render(
                "statement-user",
                &HistoryContext {
                    name: "Ada".to_string(),
                    history: String::new(),
                },
            )
            .unwrap();
        assert!(text.contains("You open the debate"));
    }

    #[test]
    fn test_render_persona_update() {
        let loader = PromptLoader::embedded_only();
        let text = loader
            .render(
                "persona-update",
                &PersonaContext {
                    name: "Ada".to_string(),
                    persona: Persona::default(),
                    summary: None,
                    feedback: vec!["Be more concise".to_string()],
                },
            )
            .unwrap();
        assert!(text.contains("- Be more concise"));
    }

    #[test]
    fn test_override_dir_wins() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("statement-user.pmt"), "custom {{name}}").unwrap();

        let loader = PromptLoader::new(Some(temp.path()));
        let text = loader
            .render(
                "statement-user",
                &HistoryContext {
                    name: "Ada".to_string(),
                    history: String::new(),
                },
            )
            .unwrap();
        assert_eq!(text, "custom Ada");

        // Templates without an override still come from the binary
        assert!(loader.load_template("verdict").unwrap().contains("impartial judge"));
    }

    #[test]
    fn test_unknown_template() {
        let loader = PromptLoader::embedded_only();
        assert!(loader.load_template("nonexistent-template").is_err());
    }
}
