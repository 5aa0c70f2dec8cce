//! Shared test utilities
//!
//! In-process fakes for every session seam: a scripted recognizer, a
//! recording synthesizer, a controllable wake-word monitor and a recording
//! host.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use paw_voice::commands::{CommandDispatcher, CommandRegistry, CommandRequest, handler_fn};
use paw_voice::dialog::{
    CommandResult, IntentAction, PetRecord, RuleBasedIntentParser, StaticPetDirectory, Transcript,
};
use paw_voice::preferences::{MemoryPreferenceStore, PreferenceStore};
use paw_voice::session::{
    PresentationEvent, SessionHandle, SessionOrchestrator, SessionParts, SessionSettings,
    SessionSnapshot,
};
use paw_voice::voice::{
    EventSink, RecognitionOptions, SpeechRecognizer, SpeechSynthesizer, SynthesisRequest,
    WakeEvent, WakeListener, WakeWordMonitor,
};
use paw_voice::{Error, Result};

/// How long a test waits for the session to settle
pub const WAIT: Duration = Duration::from_secs(5);

/// One scripted recognition outcome
pub enum Utterance {
    Heard(&'static str, f32),
    Fail(Error),
}

/// Recognizer that replays a script, then waits to be cancelled
#[derive(Default)]
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<Utterance>>,
    calls: AtomicUsize,
    cancelled: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn push(&self, utterance: Utterance) {
        self.script.lock().unwrap().push_back(utterance);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn recognize(
        &self,
        _options: RecognitionOptions,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Utterance::Heard(text, confidence)) => {
                sink.level(0.4);
                sink.interim(text);
                Ok(Transcript::final_result(text, confidence))
            }
            Some(Utterance::Fail(error)) => Err(error),
            None => {
                cancel.cancelled().await;
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(Error::Cancelled)
            }
        }
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Default)]
pub struct RecordingSynthesizer {
    spoken: Mutex<Vec<SynthesisRequest>>,
    hold: AtomicBool,
    cancelled: AtomicUsize,
}

impl RecordingSynthesizer {
    /// Keep speaking until cancelled
    pub fn hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.text.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn speak(&self, request: SynthesisRequest, cancel: CancellationToken) -> Result<()> {
        self.spoken.lock().unwrap().push(request);
        if self.hold.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Wake-word monitor driven by the test
#[derive(Default)]
pub struct FakeMonitor {
    active: AtomicBool,
    suspended: AtomicBool,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    listener: Mutex<Option<WakeListener>>,
}

impl FakeMonitor {
    /// Make `start` fail as if the microphone were missing
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Deliver a wake event as the audio thread would
    pub fn hear(&self, phrase: &str, command: Option<&str>, confidence: f32) {
        let event = WakeEvent {
            phrase: phrase.to_string(),
            transcript: command.map_or_else(|| phrase.to_string(), |c| format!("{phrase} {c}")),
            command: command.map(str::to_string),
            confidence: confidence.into(),
        };
        if let Some(listener) = self.listener.lock().unwrap().as_ref() {
            listener(event);
        }
    }
}

impl WakeWordMonitor for FakeMonitor {
    fn start(&self) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable("no input device available".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        self.suspended.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        self.suspended.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn on_wake(&self, listener: WakeListener) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }
}

/// Host that records every command it receives
#[derive(Default)]
pub struct RecordingHost {
    requests: Mutex<Vec<CommandRequest>>,
}

impl RecordingHost {
    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Registry answering every host action after `delay`
    pub fn registry(
        self: &Arc<Self>,
        delay: Duration,
        follow_up: Option<&'static str>,
    ) -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        for action in [
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
        ] {
            let host = Arc::clone(self);
            registry.register_action(
                action,
                handler_fn(move |request| {
                    let host = Arc::clone(&host);
                    async move {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        let message = format!("Here is your {}", request.target);
                        host.requests.lock().unwrap().push(request);
                        let result = CommandResult::ok(message);
                        Ok(match follow_up {
                            Some(prompt) => result.with_follow_up(prompt),
                            None => result,
                        })
                    }
                }),
            );
        }
        registry
    }
}

/// Knobs for [`start_session`]
pub struct TestOptions {
    pub settings: SessionSettings,
    pub preferences: Arc<MemoryPreferenceStore>,
    pub monitor: Arc<FakeMonitor>,
    pub host_delay: Duration,
    pub follow_up: Option<&'static str>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            settings: SessionSettings::default(),
            preferences: Arc::new(MemoryPreferenceStore::new()),
            monitor: Arc::new(FakeMonitor::default()),
            host_delay: Duration::ZERO,
            follow_up: None,
        }
    }
}

/// A running session with handles on every fake
pub struct TestSession {
    pub handle: SessionHandle,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub monitor: Arc<FakeMonitor>,
    pub host: Arc<RecordingHost>,
    pub preferences: Arc<MemoryPreferenceStore>,
}

/// The household every session test uses: two dogs
pub fn pets() -> Vec<PetRecord> {
    vec![
        PetRecord::new("p1", "Rex", Some("dog")),
        PetRecord::new("p2", "Bella", Some("dog")),
    ]
}

pub fn start_session(options: TestOptions) -> TestSession {
    let recognizer = Arc::new(ScriptedRecognizer::default());
    let synthesizer = Arc::new(RecordingSynthesizer::default());
    let host = Arc::new(RecordingHost::default());

    let parts = SessionParts {
        recognizer: Arc::clone(&recognizer) as Arc<dyn SpeechRecognizer>,
        parser: Arc::new(RuleBasedIntentParser::new(Arc::new(StaticPetDirectory::new(
            pets(),
        )))),
        dispatcher: Arc::new(CommandDispatcher::new(
            host.registry(options.host_delay, options.follow_up),
        )),
        synthesizer: Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>,
        monitor: Arc::clone(&options.monitor) as Arc<dyn WakeWordMonitor>,
        preferences: Arc::clone(&options.preferences) as Arc<dyn PreferenceStore>,
        settings: options.settings,
    };

    TestSession {
        handle: SessionOrchestrator::new(parts).spawn(),
        recognizer,
        synthesizer,
        monitor: options.monitor,
        host,
        preferences: options.preferences,
    }
}

/// Wait until the published snapshot satisfies `pred`
pub async fn wait_for(
    handle: &SessionHandle,
    what: &str,
    pred: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = handle.watch();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("session ended");
    *snapshot
}

/// Everything emitted so far
pub fn drain(events: &mut broadcast::Receiver<PresentationEvent>) -> Vec<PresentationEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Display text of every spoken response
pub fn responses(events: &[PresentationEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            PresentationEvent::Response(r) => Some(r.display_text.clone()),
            _ => None,
        })
        .collect()
}
