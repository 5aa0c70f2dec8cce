//! Daemon - runs a voice session from configuration
//!
//! Builds the recognizer, synthesizer, wake-word monitor, intent parser and
//! preference store from [`Config`], then drives the session from the
//! terminal until shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::{CommandDispatcher, CommandRegistry, handler_fn};
use crate::dialog::{
    CommandResult, EntityRef, HttpIntentParser, IntentAction, IntentParser, PetRecord,
    RuleBasedIntentParser, StaticPetDirectory, Transcript,
};
use crate::preferences::{JsonPreferenceStore, PreferenceStore};
use crate::session::{
    ConfirmationAnswer, PresentationEvent, SessionHandle, SessionOrchestrator, SessionParts,
    SessionSettings,
};
use crate::voice::{
    DeviceArbiter, MicRecognizer, MicWakeWordMonitor, SilentOutput, SpeechSynthesizer,
    SpeechToText, SpokenOutput, SttProvider, TextToSpeech, Transcriber, TtsProvider,
};
use crate::{Config, Error, Result};

/// Actions the logging host answers
const HOST_ACTIONS: [IntentAction; 10] = [
    IntentAction::Navigate,
    IntentAction::Show,
    IntentAction::Create,
    IntentAction::Update,
    IntentAction::Delete,
    IntentAction::Schedule,
    IntentAction::Cancel,
    IntentAction::Log,
    IntentAction::Remind,
    IntentAction::Help,
];

/// The paw daemon - one voice session on this machine
pub struct Daemon {
    config: Config,
    pets: Arc<StaticPetDirectory>,
}

impl Daemon {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let pets = Arc::new(StaticPetDirectory::new(config.pets.clone()));
        Self { config, pets }
    }

    /// Pet directory the rule-based parser resolves names against
    #[must_use]
    pub fn pets(&self) -> Arc<StaticPetDirectory> {
        Arc::clone(&self.pets)
    }

    /// Remote NLU when configured, local rules otherwise
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn intent_parser(&self) -> Result<Arc<dyn IntentParser>> {
        if let Some(url) = &self.config.dialog.nlu_url {
            tracing::info!(url = %url, "using remote intent parser");
            let parser = HttpIntentParser::new(url.clone(), self.config.api_keys.nlu.clone())?;
            return Ok(Arc::new(parser));
        }
        Ok(Arc::new(RuleBasedIntentParser::new(self.pets())))
    }

    /// Assemble every session component
    ///
    /// Without a speech-to-text key the session is built with voice denied,
    /// so typed transcripts still work. Without a text-to-speech key
    /// responses are only displayed.
    ///
    /// # Errors
    ///
    /// Returns error if a client, the wake-word monitor or the preference
    /// store cannot be created
    pub fn assemble(&self, registry: CommandRegistry) -> Result<SessionParts> {
        let devices = DeviceArbiter::new();
        let mut settings = SessionSettings::from_config(&self.config);

        let transcriber: Arc<dyn Transcriber> = match self.speech_to_text()? {
            Some(stt) => Arc::new(stt),
            None => {
                let reason = "no speech-to-text API key is configured";
                tracing::warn!("{reason}; voice input disabled");
                settings.voice_denied.get_or_insert_with(|| reason.to_string());
                Arc::new(MissingTranscriber(reason))
            }
        };

        let synthesizer: Arc<dyn SpeechSynthesizer> = match self.text_to_speech()? {
            Some(tts) => Arc::new(SpokenOutput::new(tts, devices.clone())),
            None => {
                tracing::info!("no text-to-speech API key configured; responses are text only");
                Arc::new(SilentOutput)
            }
        };

        let preferences = Arc::new(JsonPreferenceStore::open(self.config.preferences_path())?);
        let microphone = match preferences.preferred_microphone() {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read preferred microphone");
                None
            }
        };
        if let Some(device) = &microphone {
            tracing::debug!(device = %device, "using preferred microphone");
            settings.recognition.device = Some(device.clone());
        }

        let monitor = MicWakeWordMonitor::new(
            self.config.voice.wake_words.clone(),
            Arc::clone(&transcriber),
            devices.clone(),
            self.config.voice.locale.clone(),
        )?;
        monitor.set_preferred_device(settings.recognition.device.clone());

        let dispatcher =
            CommandDispatcher::new(registry).with_timeout(self.config.dialog.dispatch_timeout);

        Ok(SessionParts {
            recognizer: Arc::new(MicRecognizer::new(transcriber, devices)),
            parser: self.intent_parser()?,
            dispatcher: Arc::new(dispatcher),
            synthesizer,
            monitor: Arc::new(monitor),
            preferences,
            settings,
        })
    }

    /// Run a session driven from stdin until `/quit`, EOF or ctrl-c
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be assembled
    pub async fn run(self, registry: CommandRegistry, typed_confidence: f32) -> Result<()> {
        let parts = self.assemble(registry)?;
        let handle = SessionOrchestrator::new(parts).spawn();

        let printer = tokio::spawn(print_events(handle.clone()));

        tracing::info!(
            wake_words = ?self.config.voice.wake_words,
            pets = self.config.pets.len(),
            "session running; type a request, or /help"
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    handle.activity().record_activity();
                    let command = TerminalCommand::parse(&line);
                    if command == TerminalCommand::Quit {
                        break;
                    }
                    if let Err(e) = self.apply(&handle, command, typed_confidence).await {
                        if matches!(e, Error::SessionClosed) {
                            break;
                        }
                        println!("! {e}");
                    }
                }
            }
        }

        if let Err(e) = handle.shutdown().await {
            tracing::debug!(error = %e, "session already closed");
        }
        printer.abort();
        tracing::info!("daemon stopped");
        Ok(())
    }

    async fn apply(
        &self,
        handle: &SessionHandle,
        command: TerminalCommand,
        typed_confidence: f32,
    ) -> Result<()> {
        match command {
            TerminalCommand::Say(text) => {
                handle
                    .submit_transcript(Transcript::final_result(text, typed_confidence))
                    .await?;
            }
            TerminalCommand::Listen => handle.activate().await?,
            TerminalCommand::Stop => handle.stop().await?,
            TerminalCommand::Answer(answer) => {
                if !handle.confirm(answer).await? {
                    println!("! nothing to confirm");
                }
            }
            TerminalCommand::Choose(name) => {
                let pet = self
                    .config
                    .pets
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(&name))
                    .map_or_else(|| EntityRef::pet(name.clone(), name.clone()), PetRecord::to_ref);
                if !handle.choose(pet).await? {
                    println!("! {name} was not one of the choices");
                }
            }
            TerminalCommand::HandsFree(enabled) => {
                let now = handle.set_hands_free(enabled).await?;
                println!("hands-free {}", if now { "on" } else { "off" });
            }
            TerminalCommand::KeepHandsFree(keep) => {
                if !handle.respond_to_inactivity(keep).await? {
                    println!("! no inactivity prompt is open");
                }
            }
            TerminalCommand::Page(page) => handle.set_current_page(page).await?,
            TerminalCommand::Pet(name) => {
                let Some(pet) = self
                    .config
                    .pets
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(&name))
                else {
                    println!("! unknown pet: {name}");
                    return Ok(());
                };
                handle.set_active_pet(pet.to_ref()).await?;
            }
            TerminalCommand::Clear => handle.clear_conversation().await?,
            TerminalCommand::Status => {
                println!("{}", serde_json::to_string_pretty(&handle.status().await?)?);
            }
            TerminalCommand::Context => {
                println!("{}", serde_json::to_string_pretty(&handle.context().await?)?);
            }
            TerminalCommand::Help => println!("{TERMINAL_HELP}"),
            TerminalCommand::Unknown(input) => println!("! unknown command: {input} (try /help)"),
            TerminalCommand::Quit => {}
        }
        Ok(())
    }

    fn speech_to_text(&self) -> Result<Option<SpeechToText>> {
        let voice = &self.config.voice;
        let keys = &self.config.api_keys;
        match voice.stt_provider {
            SttProvider::Whisper => keys
                .openai
                .clone()
                .map(|key| SpeechToText::new_whisper(key, voice.stt_model.clone()))
                .transpose(),
            SttProvider::Deepgram => keys
                .deepgram
                .clone()
                .map(|key| SpeechToText::new_deepgram(key, voice.stt_model.clone()))
                .transpose(),
        }
    }

    fn text_to_speech(&self) -> Result<Option<TextToSpeech>> {
        let voice = &self.config.voice;
        let keys = &self.config.api_keys;
        match voice.tts_provider {
            TtsProvider::OpenAI => keys
                .openai
                .clone()
                .map(|key| {
                    TextToSpeech::new_openai(key, voice.tts_voice.clone(), voice.tts_model.clone())
                })
                .transpose(),
            TtsProvider::ElevenLabs => keys
                .elevenlabs
                .clone()
                .map(|key| {
                    TextToSpeech::new_elevenlabs(
                        key,
                        voice.tts_voice.clone(),
                        voice.tts_model.clone(),
                    )
                })
                .transpose(),
        }
    }
}

/// Host commands that only log what they were asked to do
#[must_use]
pub fn logging_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    for action in HOST_ACTIONS {
        registry.register_action(
            action,
            handler_fn(|request| async move {
                tracing::info!(
                    action = %request.action,
                    target = %request.target,
                    parameters = ?request.parameters,
                    "host command"
                );
                let names: Vec<_> = request
                    .entities
                    .iter()
                    .filter_map(|e| e.reference.as_ref().map(|r| r.name.clone()))
                    .collect();
                let subject = if names.is_empty() {
                    request.target.to_string()
                } else {
                    format!("{} for {}", request.target, names.join(" and "))
                };
                Ok(CommandResult::ok(format!(
                    "Done, I would {} {subject} now.",
                    request.action.verb()
                ))
                .with_data(serde_json::to_value(&request)?))
            }),
        );
    }
    registry
}

/// Stand-in transcriber when no speech-to-text backend is configured
struct MissingTranscriber(&'static str);

#[async_trait]
impl Transcriber for MissingTranscriber {
    async fn transcribe(&self, _wav: &[u8], _language: &str) -> Result<Transcript> {
        Err(Error::PermissionDenied(self.0.to_string()))
    }
}

async fn print_events(handle: SessionHandle) {
    let mut events = handle.subscribe();
    loop {
        match events.recv().await {
            Ok(PresentationEvent::Response(response)) => println!("paw: {}", response.display_text),
            Ok(PresentationEvent::Alert(response)) => println!("paw (!): {}", response.display_text),
            Ok(PresentationEvent::InactivityPrompt(response)) => {
                println!("paw: {} (/keep on|off)", response.display_text);
            }
            Ok(PresentationEvent::InterimTranscript(text)) => println!("  ... {text}"),
            Ok(PresentationEvent::HandsFreeChanged(enabled)) => {
                tracing::info!(enabled, "hands-free changed");
            }
            Ok(PresentationEvent::StateChanged(state)) => {
                tracing::debug!(state = ?state, "visual state");
            }
            Ok(PresentationEvent::InactivityResolved { kept_enabled }) => {
                tracing::debug!(kept_enabled, "inactivity prompt closed");
            }
            Ok(PresentationEvent::Amplitude(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "presentation events dropped");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

const TERMINAL_HELP: &str = "\
  <text>             say something
  /listen            speak into the microphone
  /yes, /no          answer a confirmation
  /choose <pet>      answer a clarification
  /stop              stop listening or speaking
  /hands-free on|off toggle wake-word mode
  /keep on|off       answer the inactivity prompt
  /page <name>       set the current screen
  /pet <name>        set the active pet
  /clear             forget the conversation
  /status, /context  show session state
  /quit              exit";

/// One line of terminal input
#[derive(Debug, Clone, PartialEq, Eq)]
enum TerminalCommand {
    Say(String),
    Listen,
    Stop,
    Answer(ConfirmationAnswer),
    Choose(String),
    HandsFree(bool),
    KeepHandsFree(bool),
    Page(String),
    Pet(String),
    Clear,
    Status,
    Context,
    Help,
    Quit,
    Unknown(String),
}

impl TerminalCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return if line.is_empty() {
                Self::Listen
            } else {
                Self::Say(line.to_string())
            };
        };

        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(n, a)| (n, a.trim()));
        let switch = |arg: &str| match arg {
            "on" => Some(true),
            "off" => Some(false),
            _ => None,
        };

        match (name, arg) {
            ("listen", _) => Self::Listen,
            ("stop", _) => Self::Stop,
            ("yes", _) => Self::Answer(ConfirmationAnswer::Affirm),
            ("no", _) => Self::Answer(ConfirmationAnswer::Deny),
            ("choose", pet) if !pet.is_empty() => Self::Choose(pet.to_string()),
            ("hands-free", arg) => {
                switch(arg).map_or_else(|| Self::Unknown(line.to_string()), Self::HandsFree)
            }
            ("keep", arg) => {
                switch(arg).map_or_else(|| Self::Unknown(line.to_string()), Self::KeepHandsFree)
            }
            ("page", page) if !page.is_empty() => Self::Page(page.to_string()),
            ("pet", pet) if !pet.is_empty() => Self::Pet(pet.to_string()),
            ("clear", _) => Self::Clear,
            ("status", _) => Self::Status,
            ("context", _) => Self::Context,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandKey, CommandRequest, CommandTarget};
    use crate::dialog::{Entity, IntentId};

    #[test]
    fn plain_text_is_said_and_blank_listens() {
        assert_eq!(
            TerminalCommand::parse("show me my pets"),
            TerminalCommand::Say("show me my pets".to_string())
        );
        assert_eq!(TerminalCommand::parse("   "), TerminalCommand::Listen);
    }

    #[test]
    fn slash_commands_parse() {
        assert_eq!(
            TerminalCommand::parse("/yes"),
            TerminalCommand::Answer(ConfirmationAnswer::Affirm)
        );
        assert_eq!(TerminalCommand::parse("/hands-free on"), TerminalCommand::HandsFree(true));
        assert_eq!(TerminalCommand::parse("/keep off"), TerminalCommand::KeepHandsFree(false));
        assert_eq!(
            TerminalCommand::parse("/choose  Bella "),
            TerminalCommand::Choose("Bella".to_string())
        );
        assert_eq!(TerminalCommand::parse("/exit"), TerminalCommand::Quit);
        assert_eq!(
            TerminalCommand::parse("/hands-free maybe"),
            TerminalCommand::Unknown("/hands-free maybe".to_string())
        );
    }

    #[tokio::test]
    async fn logging_host_answers_every_action() {
        let registry = logging_registry();
        for action in HOST_ACTIONS {
            assert!(registry.contains(CommandKey::new(action, CommandTarget::Pets)));
        }
        assert!(!registry.contains(CommandKey::new(
            IntentAction::ClearConversation,
            CommandTarget::Conversation
        )));

        let handler = registry
            .resolve(CommandKey::new(IntentAction::Show, CommandTarget::Health))
            .unwrap();
        let result = handler
            .execute(CommandRequest {
                intent_id: IntentId::new(),
                action: IntentAction::Show,
                target: CommandTarget::Health,
                parameters: std::collections::BTreeMap::new(),
                entities: vec![Entity::resolved(EntityRef::pet("p1", "Rex"))],
                transcript: "how is rex".to_string(),
            })
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.message, "Done, I would show health for Rex now.");
    }

    #[tokio::test]
    async fn missing_transcriber_denies_voice() {
        let result = MissingTranscriber("no key").transcribe(&[], "en-US").await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }
}
