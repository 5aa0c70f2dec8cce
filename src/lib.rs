//! Paw Voice - voice dialog pipeline for the Paw pet-care app
//!
//! This library provides the voice layer between a user and the host app:
//! - Speech capture, wake word monitoring, cloud STT and TTS
//! - Intent parsing with confidence gating and conversation context
//! - Command dispatch to host-registered handlers
//! - A session orchestrator with hands-free mode and inactivity handling
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Host application                     │
//! │  Presentation  │  Command handlers  │  Activity      │
//! └────────▲───────────────────┬──────────────┬─────────┘
//!          │ events            │ registry     │ input
//! ┌────────┴───────────────────▼──────────────▼─────────┐
//! │                 Session orchestrator                 │
//! │  Wake word │ Capture │ Parse │ Gate │ Dispatch │ TTS │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │            Speech backends (STT / TTS / NLU)         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod commands;
pub mod config;
pub mod daemon;
pub mod dialog;
pub mod error;
pub mod preferences;
pub mod session;
pub mod voice;

pub use commands::{
    CommandDispatcher, CommandHandler, CommandRegistry, CommandRequest, CommandTarget,
    ConfirmedIntent, handler_fn,
};
pub use config::Config;
pub use daemon::{Daemon, logging_registry};
pub use dialog::{
    CommandResult, Confidence, DialogContext, Intent, IntentAction, IntentParser, Response,
    Transcript,
};
pub use error::{Error, Result};
pub use preferences::{JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore};
pub use session::{
    ConfirmationAnswer, DialogState, PresentationEvent, SessionHandle, SessionOrchestrator,
    SessionParts, SessionSettings, SessionSnapshot,
};
