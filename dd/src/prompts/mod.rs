//! Prompt templates and reply decoding

mod context;
mod decode;
mod embedded;
mod loader;

pub use context::{
    HistoryContext, KnowledgeNote, PersonaContext, RollingSummaryContext, SeatNote, SessionSummaryContext,
    StatementContext, VerdictContext,
};
pub use decode::{DecodeError, GeneratedStatement, extract_json_block, parse_persona, parse_statement, parse_verdict};
pub use embedded::{TEMPLATE_NAMES, get_embedded};
pub use loader::PromptLoader;
