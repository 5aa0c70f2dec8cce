//! Dialog layer
//!
//! Data model, intent parsing, conversation context and response composition.

pub mod composer;
mod context;
mod parser;
mod remote;
mod types;

pub use context::{ContextManager, DEFAULT_MAX_ENTITIES, DEFAULT_MAX_INTENTS, DEFAULT_PAGE, DialogContext};
pub use parser::{
    IntentParser, PetDirectory, PetRecord, RuleBasedIntentParser, StaticPetDirectory,
    match_candidate, parse_yes_no,
};
pub use remote::HttpIntentParser;
pub use types::{
    Ambiguity, CONFIRMATION_THRESHOLD, CommandResult, Confidence, Entity, EntityKind, EntityRef,
    Intent, IntentAction, IntentBuilder, IntentId, Priority, Response, Transcript,
};
