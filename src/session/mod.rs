//! Voice session orchestration
//!
//! A [`SessionOrchestrator`] sequences wake-word monitoring, speech capture,
//! intent parsing, confirmation, dispatch and spoken responses for one user
//! session, and owns the hands-free lifecycle. It runs as a single task;
//! everything else talks to it through a cloneable [`SessionHandle`].
//!
//! ```text
//!  Idle ──activate / wake──▶ Listening ──final──▶ Processing ──▶ Speaking ──▶ Idle
//!                                                    │
//!                                                    ├─▶ AwaitingConfirmation ──yes──▶ Processing
//!                                                    └─▶ AwaitingClarification ──choice──▶ gating
//! ```

mod hands_free;
mod orchestrator;
mod state;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

pub use hands_free::{ActivityTracker, HandsFreeSession, InactivityAction};
pub use orchestrator::SessionOrchestrator;
pub use state::{
    ConfirmationAnswer, DialogState, Gate, HandsFreeMode, PendingTurn, VisualState, gate,
};

use self::orchestrator::Command;
use crate::commands::CommandDispatcher;
use crate::config::{Config, HandsFreeConfig};
use crate::dialog::{
    DEFAULT_MAX_ENTITIES, DEFAULT_MAX_INTENTS, DialogContext, EntityRef, IntentParser, Response,
    Transcript,
};
use crate::preferences::PreferenceStore;
use crate::voice::{RecognitionOptions, SpeechRecognizer, SpeechSynthesizer, WakeWordMonitor};
use crate::{Error, Result};

/// Everything a session is assembled from
pub struct SessionParts {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub parser: Arc<dyn IntentParser>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub monitor: Arc<dyn WakeWordMonitor>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub settings: SessionSettings,
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Recognition parameters; the language is also the synthesis locale
    pub recognition: RecognitionOptions,
    pub speech_rate: f32,
    pub speech_pitch: f32,
    pub max_previous_intents: usize,
    pub max_recent_entities: usize,
    pub hands_free: HandsFreeConfig,
    /// Set when voice is not permitted, with the reason shown to the user
    pub voice_denied: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            recognition: RecognitionOptions::default(),
            speech_rate: 1.0,
            speech_pitch: 1.0,
            max_previous_intents: DEFAULT_MAX_INTENTS,
            max_recent_entities: DEFAULT_MAX_ENTITIES,
            hands_free: HandsFreeConfig::default(),
            voice_denied: None,
        }
    }
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            recognition: RecognitionOptions {
                language: config.voice.locale.clone(),
                continuous: false,
                max_duration: config.voice.max_utterance,
                device: config.voice.input_device.clone(),
            },
            speech_rate: config.voice.tts_rate,
            speech_pitch: config.voice.tts_pitch,
            max_previous_intents: config.dialog.max_previous_intents,
            max_recent_entities: config.dialog.max_recent_entities,
            hands_free: config.hands_free,
            voice_denied: (!config.voice.enabled)
                .then(|| "voice is turned off in settings".to_string()),
        }
    }
}

/// Output stream for whatever renders the session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PresentationEvent {
    StateChanged(VisualState),
    /// Input level for the waveform, `[0, 1]`
    Amplitude(f32),
    /// Display-only partial transcript
    InterimTranscript(String),
    Response(Response),
    /// Dismissible notice; the session carries on
    Alert(Response),
    HandsFreeChanged(bool),
    InactivityPrompt(Response),
    InactivityResolved { kept_enabled: bool },
}

/// Point-in-time view of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: DialogState,
    pub visual: VisualState,
    pub hands_free: HandsFreeMode,
    /// Whether the wake-word monitor is running
    pub monitor_active: bool,
    pub inactivity_prompt_open: bool,
    /// Current stage generation; results from older ones are discarded
    pub generation: u64,
    pub turn_count: u64,
    pub voice_available: bool,
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<PresentationEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    activity: ActivityTracker,
}

impl SessionHandle {
    /// Start listening (push-to-talk)
    ///
    /// While a confirmation or clarification is open, this listens for the
    /// answer instead of starting a new turn.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] when voice is not permitted, or
    /// [`Error::SessionClosed`]
    pub async fn activate(&self) -> Result<()> {
        self.request(Command::Activate).await?
    }

    /// Feed a final transcript as if it had been heard
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn submit_transcript(&self, transcript: Transcript) -> Result<()> {
        self.request(|reply| Command::SubmitTranscript(transcript, reply))
            .await
    }

    /// Stop or mute: cancel capture, parsing and speech and go idle
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Answer the open confirmation prompt
    ///
    /// Returns `false` if no confirmation was pending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn confirm(&self, answer: ConfirmationAnswer) -> Result<bool> {
        self.request(|reply| Command::Confirm(answer, reply)).await
    }

    /// Answer the open clarification prompt with one of its candidates
    ///
    /// Returns `false` if no clarification was pending or `choice` was not
    /// offered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn choose(&self, choice: EntityRef) -> Result<bool> {
        self.request(|reply| Command::Choose(choice, reply)).await
    }

    /// Turn hands-free mode on or off, returning the resulting state
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if the microphone cannot be
    /// opened (hands-free stays off), [`Error::PermissionDenied`], or
    /// [`Error::SessionClosed`]
    pub async fn set_hands_free(&self, enabled: bool) -> Result<bool> {
        self.request(|reply| Command::SetHandsFree(enabled, reply))
            .await?
    }

    /// Answer the inactivity prompt
    ///
    /// Returns `false` if no prompt was open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn respond_to_inactivity(&self, keep_enabled: bool) -> Result<bool> {
        self.request(|reply| Command::RespondToInactivity(keep_enabled, reply))
            .await
    }

    /// Tell the session which screen is showing
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn set_current_page(&self, page: impl Into<String>) -> Result<()> {
        self.send(Command::SetCurrentPage(page.into())).await
    }

    /// Pin the pet the conversation is about
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn set_active_pet(&self, pet: EntityRef) -> Result<()> {
        self.send(Command::SetActivePet(pet)).await
    }

    /// Cancel the current turn and forget the conversation
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn clear_conversation(&self) -> Result<()> {
        self.request(Command::ClearConversation).await
    }

    /// Snapshot of the dialog context
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn context(&self) -> Result<DialogContext> {
        self.request(Command::Context).await
    }

    /// Snapshot taken after every earlier request has been handled
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended
    pub async fn status(&self) -> Result<SessionSnapshot> {
        self.request(Command::Status).await
    }

    /// Latest published snapshot, without a round trip
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.borrow()
    }

    /// Watch snapshots as they change
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to presentation events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PresentationEvent> {
        self.events.subscribe()
    }

    /// Activity tracker to hand to host input listeners
    #[must_use]
    pub fn activity(&self) -> ActivityTracker {
        self.activity.clone()
    }

    /// End the session
    ///
    /// Stops the wake-word monitor without changing the persisted
    /// preference, so the next session restores it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session had already ended
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| Error::SessionClosed)
    }
}
