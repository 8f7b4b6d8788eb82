//! Domain ID generation and resolution
//!
//! Generated IDs use the format: `{8-char-hex}-{type}-{slug}`
//! Example: `3fa1c07e-session-universal-basic-income`
//!
//! Child records derive their IDs from their parents so that the same logical
//! record always maps to the same key (see [`round_id`], [`roster_id`],
//! [`statement_id`]).

use std::collections::HashMap;

/// Longest slug kept in a generated ID
const MAX_SLUG_LEN: usize = 40;

/// Generate a domain ID from type and title
pub fn generate_id(domain_type: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    // v7 leads with the timestamp; the tail is random
    let hex = &uuid[uuid.len() - 8..];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}-{}", hex, domain_type)
    } else {
        format!("{}-{}-{}", hex, domain_type, slug)
    }
}

/// ID of the round `round_number` of a session
pub fn round_id(session_id: &str, round_number: u32) -> String {
    format!("{}:r{}", session_id, round_number)
}

/// ID of a participant's seat in a session
pub fn roster_id(session_id: &str, participant_id: &str) -> String {
    format!("{}:{}", session_id, participant_id)
}

/// ID of a participant's statement in a round
pub fn statement_id(round_id: &str, participant_id: &str) -> String {
    format!("{}:{}", round_id, participant_id)
}

/// Slugify a title for use in IDs
fn slugify(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    slug.chars()
        .take(MAX_SLUG_LEN)
        .collect::<String>()
        .trim_end_matches('-')
        .to_string()
}

/// ID resolution for partial matches
pub struct IdResolver<'a> {
    ids: &'a HashMap<String, String>, // id -> display name
}

impl<'a> IdResolver<'a> {
    pub fn new(ids: &'a HashMap<String, String>) -> Self {
        Self { ids }
    }

    /// Resolve a partial reference to a full ID
    ///
    /// Returns:
    /// - Ok(Some(id)) if exactly one match
    /// - Ok(None) if no matches
    /// - Err with candidates if ambiguous
    pub fn resolve(&self, reference: &str) -> Result<Option<String>, Vec<String>> {
        if self.ids.contains_key(reference) {
            return Ok(Some(reference.to_string()));
        }

        let mut matches: Vec<String> = self
            .ids
            .keys()
            .filter(|id| Self::matches(id, reference))
            .cloned()
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => {
                matches.sort();
                Err(matches)
            }
        }
    }

    /// Check if an ID matches a reference
    fn matches(id: &str, reference: &str) -> bool {
        // Hex prefix match
        if id.starts_with(reference) {
            return true;
        }

        // Slug contains match
        if let Some(slug_start) = id.find('-') {
            return id[slug_start + 1..].contains(reference);
        }

        false
    }
}
