//! Embedded fallback prompts
//!
//! Compiled into the binary from .pmt files at build time and used when no
//! override file exists in the configured prompts directory. Only the JSON
//! shapes requested in each template are relied upon by the decoders.

use tracing::debug;

/// Framing for one participant's statement
pub const STATEMENT_SYSTEM: &str = include_str!("../../prompts/statement-system.pmt");

/// User turn carrying the debate so far
pub const STATEMENT_USER: &str = include_str!("../../prompts/statement-user.pmt");

/// Cumulative digest stored on a round for later compression
pub const ROLLING_SUMMARY: &str = include_str!("../../prompts/rolling-summary.pmt");

/// Whole-session summary written when the session closes
pub const SESSION_SUMMARY: &str = include_str!("../../prompts/session-summary.pmt");

/// Multi-axis scoring of a closed session
pub const VERDICT: &str = include_str!("../../prompts/verdict.pmt");

/// Persona revision after a session
pub const PERSONA_UPDATE: &str = include_str!("../../prompts/persona-update.pmt");

/// Get an embedded template by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "statement-system" => Some(STATEMENT_SYSTEM),
        "statement-user" => Some(STATEMENT_USER),
        "rolling-summary" => Some(ROLLING_SUMMARY),
        "session-summary" => Some(SESSION_SUMMARY),
        "verdict" => Some(VERDICT),
        "persona-update" => Some(PERSONA_UPDATE),
        _ => None,
    }
}

/// Names of every embedded template
pub const TEMPLATE_NAMES: &[&str] = &[
    "statement-system",
    "statement-user",
    "rolling-summary",
    "session-summary",
    "verdict",
    "persona-update",
];
