//! Session orchestrator actor
//!
//! One task owns every piece of session state. Callers talk to it through a
//! [`SessionHandle`]; stage tasks report back over an internal channel with
//! the generation they were started under, and anything from an older
//! generation is dropped on arrival.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::hands_free::{ActivityTracker, HandsFreeSession, InactivityAction};
use super::state::{
    ConfirmationAnswer, DialogState, Gate, HandsFreeMode, PendingTurn, VisualState, gate,
};
use super::{PresentationEvent, SessionHandle, SessionParts, SessionSettings, SessionSnapshot};
use crate::commands::{CommandDispatcher, ConfirmedIntent};
use crate::dialog::composer::{
    compose_clarification, compose_confirmation, compose_conversation_cleared, compose_declined,
    compose_error_response, compose_inactivity_prompt, compose_response, compose_voice_unavailable,
};
use crate::dialog::{
    CommandResult, ContextManager, DialogContext, EntityRef, Intent, IntentAction, IntentParser,
    Response, Transcript, match_candidate, parse_yes_no,
};
use crate::preferences::PreferenceStore;
use crate::voice::{
    RecognitionEvent, SpeechCapture, SpeechSynthesizer, SynthesisRequest, WakeEvent,
    WakeWordMonitor,
};
use crate::{Error, Result};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Requests from a [`SessionHandle`]
pub(super) enum Command {
    Activate(oneshot::Sender<Result<()>>),
    SubmitTranscript(Transcript, oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Confirm(ConfirmationAnswer, oneshot::Sender<bool>),
    Choose(EntityRef, oneshot::Sender<bool>),
    SetHandsFree(bool, oneshot::Sender<Result<bool>>),
    RespondToInactivity(bool, oneshot::Sender<bool>),
    SetCurrentPage(String),
    SetActivePet(EntityRef),
    ClearConversation(oneshot::Sender<()>),
    Context(oneshot::Sender<DialogContext>),
    Status(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// What to do once a response has been spoken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterSpeech {
    Idle,
    /// The result asked a follow-up question
    Listen,
    /// A confirmation or clarification prompt wants an answer
    AwaitAnswer,
}

/// Reports from stage tasks and the wake-word monitor
enum StageEvent {
    Wake(WakeEvent),
    Recognition {
        generation: u64,
        event: RecognitionEvent,
    },
    IntentParsed {
        generation: u64,
        transcript: Transcript,
        result: Result<Intent>,
    },
    CommandCompleted {
        generation: u64,
        context_epoch: u64,
        intent: Intent,
        result: CommandResult,
    },
    SpeechFinished {
        generation: u64,
        result: Result<()>,
        then: AfterSpeech,
    },
}

/// How a spoken reply relates to a parked turn
enum Answer {
    Affirm,
    Deny,
    Choose(EntityRef),
    NewCommand,
}

/// The single owner of a voice session
pub struct SessionOrchestrator {
    capture: SpeechCapture,
    parser: Arc<dyn IntentParser>,
    dispatcher: Arc<CommandDispatcher>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    monitor: Arc<dyn WakeWordMonitor>,
    preferences: Arc<dyn PreferenceStore>,
    settings: SessionSettings,

    context: ContextManager,
    /// Bumped on every context reset; older dispatches must not write back
    context_epoch: u64,
    hands_free: HandsFreeSession,
    activity: ActivityTracker,
    state: DialogState,
    visual: VisualState,
    pending: Option<PendingTurn>,
    wake_turn: bool,
    generation: u64,
    stage_cancel: CancellationToken,

    stage_tx: mpsc::UnboundedSender<StageEvent>,
    stage_rx: mpsc::UnboundedReceiver<StageEvent>,
    events: broadcast::Sender<PresentationEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionOrchestrator {
    /// Assemble a session from its parts
    #[must_use]
    pub fn new(parts: SessionParts) -> Self {
        let SessionParts {
            recognizer,
            parser,
            dispatcher,
            synthesizer,
            monitor,
            preferences,
            settings,
        } = parts;

        let (stage_tx, stage_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (snapshot, _) = watch::channel(SessionSnapshot {
            voice_available: settings.voice_denied.is_none(),
            ..SessionSnapshot::default()
        });

        Self {
            capture: SpeechCapture::new(recognizer),
            parser,
            dispatcher,
            synthesizer,
            monitor,
            preferences,
            context: ContextManager::new(settings.max_previous_intents, settings.max_recent_entities),
            context_epoch: 0,
            hands_free: HandsFreeSession::new(settings.hands_free),
            settings,
            activity: ActivityTracker::new(),
            state: DialogState::Idle,
            visual: VisualState::Idle,
            pending: None,
            wake_turn: false,
            generation: 0,
            stage_cancel: CancellationToken::new(),
            stage_tx,
            stage_rx,
            events,
            snapshot,
        }
    }

    /// Run the session on the tokio runtime
    ///
    /// The persisted hands-free preference is restored before any request is
    /// served. The session ends on [`SessionHandle::shutdown`] or when every
    /// handle is dropped.
    #[must_use]
    pub fn spawn(self) -> SessionHandle {
        let stage_tx = self.stage_tx.clone();
        self.monitor.on_wake(Box::new(move |event| {
            if stage_tx.send(StageEvent::Wake(event)).is_err() {
                tracing::debug!("wake word heard after session ended");
            }
        }));

        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let handle = SessionHandle {
            commands: commands_tx,
            events: self.events.clone(),
            snapshot: self.snapshot.subscribe(),
            activity: self.activity.clone(),
        };

        tokio::spawn(self.run(commands));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.restore_hands_free().await;

        let mut poll = tokio::time::interval(self.hands_free.config().poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(event) = self.stage_rx.recv() => self.handle_stage(event).await,
                _ = poll.tick() => self.check_inactivity().await,
            }
            self.publish();
        }

        tracing::info!("voice session ended");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Activate(reply) => {
                let _ = reply.send(self.activate());
            }
            Command::SubmitTranscript(transcript, reply) => {
                self.submit_transcript(transcript);
                let _ = reply.send(());
            }
            Command::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            Command::Confirm(answer, reply) => {
                let _ = reply.send(self.confirm(answer));
            }
            Command::Choose(choice, reply) => {
                let _ = reply.send(self.choose(&choice));
            }
            Command::SetHandsFree(enabled, reply) => {
                let _ = reply.send(self.set_hands_free(enabled).await);
            }
            Command::RespondToInactivity(keep_enabled, reply) => {
                let _ = reply.send(self.respond_to_inactivity(keep_enabled).await);
            }
            Command::SetCurrentPage(page) => self.context.set_current_page(page),
            Command::SetActivePet(pet) => self.context.set_active_pet(pet),
            Command::ClearConversation(reply) => {
                self.stop();
                self.reset_context();
                let _ = reply.send(());
            }
            Command::Context(reply) => {
                let _ = reply.send(self.context.context());
            }
            Command::Status(reply) => {
                let _ = reply.send(self.current_snapshot());
            }
            Command::Shutdown(_) => {}
        }
    }

    async fn handle_stage(&mut self, event: StageEvent) {
        match event {
            StageEvent::Wake(event) => self.on_wake(event),
            StageEvent::Recognition { generation, event } => {
                if self.is_current(generation, "recognition") {
                    self.on_recognition(generation, event);
                }
            }
            StageEvent::IntentParsed {
                generation,
                transcript,
                result,
            } => {
                if self.is_current(generation, "parse") {
                    self.on_intent_parsed(generation, transcript, result);
                }
            }
            StageEvent::CommandCompleted {
                generation,
                context_epoch,
                intent,
                result,
            } => self.on_command_completed(generation, context_epoch, &intent, &result),
            StageEvent::SpeechFinished {
                generation,
                result,
                then,
            } => {
                if self.is_current(generation, "speech") {
                    self.on_speech_finished(generation, result, then).await;
                }
            }
        }
    }

    // Turn entry points

    fn activate(&mut self) -> Result<()> {
        if let Some(reason) = self.settings.voice_denied.clone() {
            self.present(PresentationEvent::Response(compose_voice_unavailable(&reason)));
            return Err(Error::PermissionDenied(reason));
        }

        self.activity.record_activity();
        let generation = self.advance_generation();

        if self.state.is_awaiting() {
            // Listen for the answer to the open prompt
            self.show(VisualState::Listening);
            self.start_capture(generation);
        } else {
            self.begin_turn(false);
            self.listen(generation);
        }
        Ok(())
    }

    fn submit_transcript(&mut self, transcript: Transcript) {
        self.activity.record_activity();
        let generation = self.advance_generation();
        if !self.state.is_awaiting() {
            self.begin_turn(false);
        }
        self.handle_transcript(generation, transcript);
    }

    fn on_wake(&mut self, event: WakeEvent) {
        if self.settings.voice_denied.is_some()
            || self.mode() != HandsFreeMode::Armed
            || self.state != DialogState::Idle
        {
            tracing::debug!(
                state = %self.state,
                mode = ?self.mode(),
                "ignoring wake word"
            );
            return;
        }

        tracing::info!(phrase = %event.phrase, command = ?event.command, "wake word activation");
        self.activity.record_activity();
        let generation = self.advance_generation();
        self.begin_turn(true);

        match event.command_transcript() {
            Some(transcript) => self.handle_transcript(generation, transcript),
            None => self.listen(generation),
        }
    }

    /// Cancel everything in flight and return to idle
    fn stop(&mut self) {
        self.advance_generation();
        self.pending = None;
        self.finish_turn();
    }

    fn confirm(&mut self, answer: ConfirmationAnswer) -> bool {
        let Some(PendingTurn::Confirmation(intent)) = self.pending.take() else {
            tracing::debug!("no confirmation pending");
            return false;
        };

        self.activity.record_activity();
        let generation = self.advance_generation();
        match answer {
            ConfirmationAnswer::Affirm => self.proceed_confirmed(generation, intent),
            ConfirmationAnswer::Deny => self.decline(generation, &intent),
        }
        true
    }

    fn choose(&mut self, choice: &EntityRef) -> bool {
        let offered = self
            .pending
            .as_ref()
            .is_some_and(|p| p.candidates().iter().any(|c| c == choice));
        if !offered {
            tracing::debug!(choice = %choice.name, "choice does not answer a pending clarification");
            return false;
        }
        let Some(pending) = self.pending.take() else {
            return false;
        };

        self.activity.record_activity();
        let generation = self.advance_generation();
        let resolved = pending.intent().resolve(choice);
        tracing::info!(choice = %choice.name, intent = %resolved.id(), "clarification answered");
        self.route(generation, resolved);
        true
    }

    // Stage steps

    fn listen(&mut self, generation: u64) {
        self.transition(DialogState::Listening, VisualState::Listening);
        self.start_capture(generation);
    }

    fn start_capture(&self, generation: u64) {
        let mut session = self.capture.start_recognition(self.settings.recognition.clone());
        let tx = self.stage_tx.clone();

        tokio::spawn(async move {
            while let Some(event) = session.next_event().await {
                let terminal = event.is_terminal();
                if tx.send(StageEvent::Recognition { generation, event }).is_err() || terminal {
                    break;
                }
            }
        });
    }

    fn on_recognition(&mut self, generation: u64, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Interim(text) => {
                self.present(PresentationEvent::InterimTranscript(text));
            }
            RecognitionEvent::Level(level) => self.present(PresentationEvent::Amplitude(level)),
            RecognitionEvent::Final(transcript) => self.handle_transcript(generation, transcript),
            RecognitionEvent::Error(Error::Cancelled) => {}
            RecognitionEvent::Error(e) => self.on_recognition_error(e),
        }
    }

    fn on_recognition_error(&mut self, error: Error) {
        if let Error::PermissionDenied(reason) = &error {
            tracing::warn!(reason, "voice permission revoked");
            self.settings.voice_denied = Some(reason.clone());
            self.present(PresentationEvent::Response(compose_voice_unavailable(reason)));
            self.pending = None;
            self.finish_turn();
            return;
        }

        if let Some(pending) = self.pending.as_ref().filter(|_| self.state.is_awaiting()) {
            // The prompt stays open for an on-screen answer
            tracing::debug!(error = %error, "no spoken answer");
            let prompt = match pending {
                PendingTurn::Confirmation(intent) => compose_confirmation(intent),
                PendingTurn::Clarification(intent) => compose_clarification(intent),
            };
            self.present(PresentationEvent::Response(prompt));
            self.show(VisualState::Idle);
            return;
        }

        tracing::warn!(error = %error, "recognition failed");
        let alert = compose_error_response(&error, &self.context.context());
        self.present(PresentationEvent::Alert(alert));
        self.finish_turn();
    }

    fn handle_transcript(&mut self, generation: u64, transcript: Transcript) {
        self.activity.record_activity();
        tracing::debug!(
            text = %transcript.text,
            confidence = %transcript.confidence,
            "final transcript"
        );

        if let Some(pending) = self.pending.take() {
            match interpret_answer(&pending, &transcript.text) {
                Answer::Affirm => {
                    if let PendingTurn::Confirmation(intent) = pending {
                        self.proceed_confirmed(generation, intent);
                    }
                    return;
                }
                Answer::Deny => {
                    self.decline(generation, pending.intent());
                    return;
                }
                Answer::Choose(choice) => {
                    let resolved = pending.intent().resolve(&choice);
                    self.route(generation, resolved);
                    return;
                }
                Answer::NewCommand => {
                    tracing::debug!("reply is not an answer, treating it as a new command");
                }
            }
        }

        self.parse(generation, transcript);
    }

    fn parse(&mut self, generation: u64, transcript: Transcript) {
        self.transition(DialogState::Processing, VisualState::Thinking);

        let parser = Arc::clone(&self.parser);
        let context = self.context.context();
        let cancel = self.stage_cancel.clone();
        let tx = self.stage_tx.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                result = parser.parse_intent(&transcript, &context) => result,
            };
            let _ = tx.send(StageEvent::IntentParsed {
                generation,
                transcript,
                result,
            });
        });
    }

    fn on_intent_parsed(&mut self, generation: u64, transcript: Transcript, result: Result<Intent>) {
        let intent = match result {
            Ok(intent) => intent,
            Err(e) => {
                tracing::info!(error = %e, text = %transcript.text, "could not parse, asking to rephrase");
                Intent::unrecognized(transcript.text)
            }
        };

        tracing::info!(
            intent = %intent.id(),
            action = %intent.action(),
            target = %intent.target(),
            confidence = %intent.confidence(),
            "intent parsed"
        );
        self.route(generation, intent);
    }

    fn route(&mut self, generation: u64, intent: Intent) {
        match gate(intent) {
            Gate::Dispatch(confirmed) => self.dispatch(generation, confirmed),
            Gate::Confirm(intent) => {
                let response = compose_confirmation(&intent);
                self.park(generation, PendingTurn::Confirmation(intent), response);
            }
            Gate::Clarify(intent) => {
                let response = compose_clarification(&intent);
                self.park(generation, PendingTurn::Clarification(intent), response);
            }
            Gate::ClearConversation => self.clear_conversation(generation),
        }
    }

    fn park(&mut self, generation: u64, pending: PendingTurn, prompt: Response) {
        tracing::debug!(state = %pending.state(), intent = %pending.intent().id(), "turn parked");
        self.state = pending.state();
        self.pending = Some(pending);
        self.speak(generation, prompt, AfterSpeech::AwaitAnswer);
    }

    fn proceed_confirmed(&mut self, generation: u64, intent: Intent) {
        if intent.action() == IntentAction::ClearConversation {
            self.clear_conversation(generation);
            return;
        }
        match ConfirmedIntent::user_confirmed(intent) {
            Ok(confirmed) => self.dispatch(generation, confirmed),
            Err(intent) => {
                let response = compose_clarification(&intent);
                self.park(generation, PendingTurn::Clarification(intent), response);
            }
        }
    }

    fn decline(&mut self, generation: u64, intent: &Intent) {
        tracing::info!(intent = %intent.id(), "user declined");
        self.state = DialogState::Speaking;
        self.speak(generation, compose_declined(intent), AfterSpeech::Idle);
    }

    fn clear_conversation(&mut self, generation: u64) {
        self.reset_context();
        self.state = DialogState::Speaking;
        self.speak(generation, compose_conversation_cleared(), AfterSpeech::Idle);
    }

    fn dispatch(&mut self, generation: u64, confirmed: ConfirmedIntent) {
        self.transition(DialogState::Processing, VisualState::Thinking);

        let dispatcher = Arc::clone(&self.dispatcher);
        let intent = confirmed.intent().clone();
        let context_epoch = self.context_epoch;
        let tx = self.stage_tx.clone();

        tracing::info!(
            intent = %intent.id(),
            clearance = ?confirmed.clearance(),
            "dispatching command"
        );

        // Host commands run to completion even if the turn is cancelled
        tokio::spawn(async move {
            let result = dispatcher.execute_command(confirmed).await;
            let _ = tx.send(StageEvent::CommandCompleted {
                generation,
                context_epoch,
                intent,
                result,
            });
        });
    }

    fn on_command_completed(
        &mut self,
        generation: u64,
        context_epoch: u64,
        intent: &Intent,
        result: &CommandResult,
    ) {
        // The command ran, so the conversation remembers it unless it was
        // cleared in the meantime
        if context_epoch == self.context_epoch {
            self.context.update_context(intent);
        } else {
            tracing::debug!(intent = %intent.id(), "conversation cleared before command finished");
        }

        if !self.is_current(generation, "command") {
            return;
        }

        let context = self.context.context();
        let response = compose_response(result, &context);
        let then = if result.requires_follow_up {
            AfterSpeech::Listen
        } else {
            AfterSpeech::Idle
        };

        tracing::info!(
            intent = %intent.id(),
            success = result.success,
            follow_up = result.requires_follow_up,
            "command completed"
        );
        self.state = DialogState::Speaking;
        self.speak(generation, response, then);
    }

    fn speak(&mut self, generation: u64, response: Response, then: AfterSpeech) {
        if !self.state.is_awaiting() {
            self.state = DialogState::Speaking;
        }
        self.show(VisualState::Speaking);
        self.present(PresentationEvent::Response(response.clone()));

        let request = SynthesisRequest {
            rate: self.settings.speech_rate,
            pitch: self.settings.speech_pitch,
            ..SynthesisRequest::new(response.text, self.settings.recognition.language.clone())
        };
        let synthesizer = Arc::clone(&self.synthesizer);
        let cancel = self.stage_cancel.clone();
        let tx = self.stage_tx.clone();

        tokio::spawn(async move {
            let result = synthesizer.speak(request, cancel).await;
            let _ = tx.send(StageEvent::SpeechFinished {
                generation,
                result,
                then,
            });
        });
    }

    async fn on_speech_finished(&mut self, generation: u64, result: Result<()>, then: AfterSpeech) {
        match result {
            Ok(()) | Err(Error::Cancelled) => {}
            Err(e) => tracing::warn!(error = %e, "speech synthesis failed, response shown only"),
        }

        let can_listen = self.settings.voice_denied.is_none();
        match then {
            AfterSpeech::Listen if can_listen => self.listen(generation),
            AfterSpeech::AwaitAnswer if can_listen => {
                self.show(VisualState::Listening);
                self.start_capture(generation);
            }
            AfterSpeech::AwaitAnswer => self.show(VisualState::Idle),
            AfterSpeech::Idle | AfterSpeech::Listen => self.finish_turn(),
        }

        if self.state == DialogState::Idle {
            self.check_inactivity().await;
        }
    }

    // Hands-free lifecycle

    async fn restore_hands_free(&mut self) {
        match self.preferences.hands_free_enabled() {
            Ok(true) => {
                tracing::info!("restoring hands-free mode");
                if let Err(e) = self.set_hands_free(true).await {
                    tracing::warn!(error = %e, "could not restore hands-free mode");
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "failed to read hands-free preference"),
        }
        self.publish();
    }

    async fn set_hands_free(&mut self, enabled: bool) -> Result<bool> {
        if enabled == self.hands_free.is_enabled() && enabled == self.monitor.is_active() {
            return Ok(enabled);
        }

        if enabled {
            self.enable_hands_free().await
        } else {
            self.disable_hands_free("requested").await;
            Ok(false)
        }
    }

    async fn enable_hands_free(&mut self) -> Result<bool> {
        if let Some(reason) = self.settings.voice_denied.clone() {
            self.present(PresentationEvent::Response(compose_voice_unavailable(&reason)));
            return Err(Error::PermissionDenied(reason));
        }

        let started = on_monitor(&self.monitor, |m| m.start()).await.and_then(|r| r);
        if let Err(e) = started {
            tracing::warn!(error = %e, "hands-free unavailable, staying disabled");
            let was_enabled = self.hands_free.is_enabled();
            self.hands_free.disable();
            self.persist_hands_free(false);
            let alert = compose_error_response(&e, &self.context.context());
            self.present(PresentationEvent::Alert(alert));
            if was_enabled {
                self.present(PresentationEvent::HandsFreeChanged(false));
            }
            return Err(e);
        }

        if self.state != DialogState::Idle {
            self.monitor.suspend();
        }
        self.hands_free.enable(&self.activity);
        self.persist_hands_free(true);
        self.present(PresentationEvent::HandsFreeChanged(true));
        tracing::info!("hands-free enabled");
        Ok(true)
    }

    async fn disable_hands_free(&mut self, reason: &'static str) {
        if let Err(e) = on_monitor(&self.monitor, |m| m.stop()).await {
            tracing::error!(error = %e, "failed to stop wake word monitor");
        }
        let prompt_was_open = self.hands_free.inactivity_prompt_open();
        self.hands_free.disable();
        self.wake_turn = false;
        self.persist_hands_free(false);

        if prompt_was_open {
            self.present(PresentationEvent::InactivityResolved { kept_enabled: false });
        }
        self.present(PresentationEvent::HandsFreeChanged(false));
        tracing::info!(reason, "hands-free disabled");
    }

    fn persist_hands_free(&self, enabled: bool) {
        if let Err(e) = self.preferences.set_hands_free_enabled(enabled) {
            tracing::warn!(error = %e, enabled, "failed to persist hands-free preference");
        }
    }

    async fn check_inactivity(&mut self) {
        match self.hands_free.check(&self.activity, Instant::now()) {
            InactivityAction::None => {}
            InactivityAction::Prompt => {
                let prompt = compose_inactivity_prompt(self.hands_free.config().auto_disable_after);
                tracing::info!(idle = ?self.activity.idle_for(), "raising inactivity prompt");
                self.present(PresentationEvent::InactivityPrompt(prompt.clone()));
                if self.state == DialogState::Idle {
                    let generation = self.advance_generation();
                    self.speak(generation, prompt, AfterSpeech::Idle);
                }
            }
            // An unanswered prompt is abandoned along with hands-free
            InactivityAction::AutoDisable if self.state.is_awaiting() => {
                tracing::info!(state = %self.state, "dropping unanswered prompt");
                self.stop();
                self.disable_hands_free("inactivity").await;
            }
            // A running stage finishes first; the check repeats once it has
            InactivityAction::AutoDisable if self.state != DialogState::Idle => {}
            InactivityAction::AutoDisable => self.disable_hands_free("inactivity").await,
        }
    }

    async fn respond_to_inactivity(&mut self, keep_enabled: bool) -> bool {
        if !self.hands_free.inactivity_prompt_open() {
            return false;
        }

        if keep_enabled {
            self.hands_free.resolve_prompt(&self.activity);
            self.present(PresentationEvent::InactivityResolved { kept_enabled: true });
            tracing::info!("hands-free kept on");
        } else {
            self.disable_hands_free("declined at inactivity prompt").await;
        }
        true
    }

    async fn teardown(&mut self) {
        self.stop();
        // Stopping without persisting keeps the preference for the next session
        if self.monitor.is_active()
            && let Err(e) = on_monitor(&self.monitor, |m| m.stop()).await
        {
            tracing::error!(error = %e, "failed to stop wake word monitor");
        }
        self.hands_free.disable();
        self.reset_context();
        self.publish();
    }

    // Bookkeeping

    fn reset_context(&mut self) {
        self.context.clear_context();
        self.context_epoch += 1;
    }

    fn advance_generation(&mut self) -> u64 {
        self.stage_cancel.cancel();
        self.capture.stop_recognition();
        self.stage_cancel = CancellationToken::new();
        self.generation += 1;
        self.generation
    }

    fn is_current(&self, generation: u64, stage: &'static str) -> bool {
        let current = generation == self.generation;
        if !current {
            tracing::debug!(
                stage,
                generation,
                current = self.generation,
                "discarding superseded result"
            );
        }
        current
    }

    fn begin_turn(&mut self, wake: bool) {
        self.pending = None;
        self.wake_turn = wake && self.hands_free.is_enabled();
        if self.monitor.is_active() {
            self.monitor.suspend();
        }
    }

    fn finish_turn(&mut self) {
        self.transition(DialogState::Idle, VisualState::Idle);
        self.wake_turn = false;
        if self.hands_free.is_enabled() {
            self.monitor.resume();
        }
    }

    fn transition(&mut self, state: DialogState, visual: VisualState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "dialog state");
        }
        self.state = state;
        self.show(visual);
    }

    fn show(&mut self, visual: VisualState) {
        if self.visual != visual {
            self.visual = visual;
            self.present(PresentationEvent::StateChanged(visual));
        }
    }

    fn present(&self, event: PresentationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    const fn mode(&self) -> HandsFreeMode {
        match (self.hands_free.is_enabled(), self.wake_turn) {
            (false, _) => HandsFreeMode::Disabled,
            (true, false) => HandsFreeMode::Armed,
            (true, true) => HandsFreeMode::Active,
        }
    }

    fn current_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            visual: self.visual,
            hands_free: self.mode(),
            monitor_active: self.monitor.is_active(),
            inactivity_prompt_open: self.hands_free.inactivity_prompt_open(),
            generation: self.generation,
            turn_count: self.context.turn_count(),
            voice_available: self.settings.voice_denied.is_none(),
        }
    }

    fn publish(&self) {
        let next = self.current_snapshot();
        self.snapshot.send_if_modified(|current| {
            let changed = *current != next;
            if changed {
                *current = next;
            }
            changed
        });
    }
}

fn interpret_answer(pending: &PendingTurn, text: &str) -> Answer {
    match pending {
        PendingTurn::Confirmation(_) => match parse_yes_no(text) {
            Some(true) => Answer::Affirm,
            Some(false) => Answer::Deny,
            None => Answer::NewCommand,
        },
        PendingTurn::Clarification(_) => match match_candidate(text, pending.candidates()) {
            Some(choice) => Answer::Choose(choice.clone()),
            None if parse_yes_no(text) == Some(false) => Answer::Deny,
            None => Answer::NewCommand,
        },
    }
}

/// Run a monitor call off the async workers; start and stop may block
async fn on_monitor<T, F>(monitor: &Arc<dyn WakeWordMonitor>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn WakeWordMonitor) -> T + Send + 'static,
{
    let monitor = Arc::clone(monitor);
    tokio::task::spawn_blocking(move || f(monitor.as_ref()))
        .await
        .map_err(|e| Error::Audio(format!("wake word task failed: {e}")))
}
