//! Speech capture engine
//!
//! Brackets one recognition session at a time. Every session gets a
//! generation number; events from any generation other than the current one
//! are dropped, so a stopped or superseded session can never surface a late
//! result.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::capture::{AudioCapture, SAMPLE_RATE, calculate_energy, samples_to_wav};
use super::device::{AudioDevice, DeviceArbiter};
use super::stt::Transcriber;
use super::wake_word::SpeechSegmenter;
use crate::dialog::Transcript;
use crate::{Error, Result};

/// Default upper bound on a single utterance
pub const DEFAULT_MAX_UTTERANCE: Duration = Duration::from_secs(15);

/// How long capture waits for the wake-word monitor to release the microphone
const MIC_WAIT: Duration = Duration::from_secs(1);

/// How often the microphone buffer is drained
const CAPTURE_POLL: Duration = Duration::from_millis(50);

/// Recognition parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    /// BCP-47 language tag
    pub language: String,
    /// Keep listening through pauses until `max_duration`
    pub continuous: bool,
    pub max_duration: Duration,
    /// Input device; the default device when `None`
    pub device: Option<String>,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            continuous: false,
            max_duration: DEFAULT_MAX_UTTERANCE,
            device: None,
        }
    }
}

/// Something a capture session reports
#[derive(Debug)]
pub enum RecognitionEvent {
    /// Partial text for display only
    Interim(String),
    /// Input level for the waveform, `[0, 1]`
    Level(f32),
    /// The utterance; terminal
    Final(Transcript),
    /// Recognition failed; terminal
    Error(Error),
}

impl RecognitionEvent {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Final(_) | Self::Error(_))
    }
}

/// Non-terminal event sink handed to a recognizer
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    current: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<RecognitionEvent>,
}

impl EventSink {
    /// Whether this session is still the current one
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    pub fn interim(&self, text: impl Into<String>) {
        self.send(RecognitionEvent::Interim(text.into()));
    }

    pub fn level(&self, level: f32) {
        self.send(RecognitionEvent::Level(level.clamp(0.0, 1.0)));
    }

    fn send(&self, event: RecognitionEvent) {
        if self.is_current() {
            let _ = self.tx.send(event);
        }
    }
}

/// Streaming recognition backend
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize one utterance
    ///
    /// Interim text and levels go to `sink`; the final transcript is the
    /// return value. Should return promptly once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`], [`Error::Recognition`] or
    /// [`Error::Cancelled`]
    async fn recognize(
        &self,
        options: RecognitionOptions,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<Transcript>;
}

/// One started recognition session
#[derive(Debug)]
pub struct CaptureSession {
    generation: u64,
    current: Arc<AtomicU64>,
    events: mpsc::UnboundedReceiver<RecognitionEvent>,
}

impl CaptureSession {
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Next event, or `None` once the session is over or superseded
    pub async fn next_event(&mut self) -> Option<RecognitionEvent> {
        if self.current.load(Ordering::SeqCst) != self.generation {
            return None;
        }
        let event = self.events.recv().await?;
        (self.current.load(Ordering::SeqCst) == self.generation).then_some(event)
    }
}

/// Runs recognition sessions one at a time
pub struct SpeechCapture {
    recognizer: Arc<dyn SpeechRecognizer>,
    current: Arc<AtomicU64>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SpeechCapture {
    #[must_use]
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer,
            current: Arc::new(AtomicU64::new(0)),
            cancel: Mutex::new(None),
        }
    }

    /// Start a new session, cancelling any session still running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_recognition(&self, options: RecognitionOptions) -> CaptureSession {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        if let Some(previous) = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(cancel.clone())
        {
            previous.cancel();
        }

        let (tx, events) = mpsc::unbounded_channel();
        let sink = EventSink {
            generation,
            current: Arc::clone(&self.current),
            tx: tx.clone(),
        };
        let recognizer = Arc::clone(&self.recognizer);
        let current = Arc::clone(&self.current);

        tracing::debug!(generation, language = %options.language, "recognition started");

        tokio::spawn(async move {
            let outcome = recognizer.recognize(options, sink, cancel).await;

            // Exactly one terminal event, and only for the live session
            if current.load(Ordering::SeqCst) != generation {
                tracing::debug!(generation, "discarding result of superseded recognition");
                return;
            }
            let terminal = match outcome {
                Ok(transcript) => RecognitionEvent::Final(Transcript {
                    is_final: true,
                    ..transcript
                }),
                Err(e) => RecognitionEvent::Error(e),
            };
            let _ = tx.send(terminal);
        });

        CaptureSession {
            generation,
            current: Arc::clone(&self.current),
            events,
        }
    }

    /// Stop the current session; nothing more from it will be delivered
    pub fn stop_recognition(&self) {
        let generation = self.current.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
            tracing::debug!(generation, "recognition stopped");
        }
    }

    /// Generation of the live session
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

/// Microphone recognizer: record until the utterance ends, then transcribe
pub struct MicRecognizer {
    transcriber: Arc<dyn Transcriber>,
    devices: DeviceArbiter,
}

impl MicRecognizer {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, devices: DeviceArbiter) -> Self {
        Self {
            transcriber,
            devices,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for MicRecognizer {
    async fn recognize(
        &self,
        options: RecognitionOptions,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<Transcript> {
        let lease = self
            .devices
            .acquire(AudioDevice::Microphone, "speech capture", MIC_WAIT)
            .await?;

        let record_cancel = cancel.clone();
        let record_options = options.clone();
        let samples = tokio::task::spawn_blocking(move || {
            let _lease = lease;
            record_utterance(&record_options, &sink, &record_cancel)
        })
        .await
        .map_err(|e| Error::Recognition(format!("capture task failed: {e}")))??;

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;

        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            transcript = self.transcriber.transcribe(&wav, &options.language) => transcript,
        }
    }
}

/// Blocking capture loop, returns the recorded utterance
fn record_utterance(
    options: &RecognitionOptions,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<Vec<f32>> {
    let mut capture = AudioCapture::open(options.device.as_deref())?;
    capture.start()?;

    let started = std::time::Instant::now();
    let mut segmenter = SpeechSegmenter::new();
    let mut utterance = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        std::thread::sleep(CAPTURE_POLL);
        let chunk = capture.take_buffer();
        sink.level((calculate_energy(&chunk) * 4.0).min(1.0));

        if let Some(segment) = segmenter.process(&chunk) {
            utterance.extend(segment);
            if !options.continuous {
                break;
            }
        }

        if started.elapsed() >= options.max_duration {
            utterance.extend(segmenter.take_speech_buffer());
            break;
        }
    }

    if utterance.is_empty() {
        return Err(Error::Recognition("no speech detected".to_string()));
    }

    tracing::debug!(samples = utterance.len(), device = %capture.device_name(), "utterance recorded");
    Ok(utterance)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        interim: Vec<&'static str>,
        result: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl SpeechRecognizer for Scripted {
        async fn recognize(
            &self,
            _options: RecognitionOptions,
            sink: EventSink,
            cancel: CancellationToken,
        ) -> Result<Transcript> {
            for text in &self.interim {
                sink.interim(*text);
            }
            tokio::select! {
                () = cancel.cancelled() => Err(Error::Cancelled),
                () = tokio::time::sleep(self.delay) => Ok(Transcript::final_result(self.result, 0.9)),
            }
        }
    }

    fn engine(delay: Duration) -> SpeechCapture {
        SpeechCapture::new(Arc::new(Scripted {
            interim: vec!["show", "show me"],
            result: "show me my pets",
            delay,
        }))
    }

    #[tokio::test]
    async fn interim_then_single_final() {
        let capture = engine(Duration::from_millis(10));
        let mut session = capture.start_recognition(RecognitionOptions::default());

        let mut interim = Vec::new();
        let mut finals = 0;
        while let Some(event) = session.next_event().await {
            match event {
                RecognitionEvent::Interim(text) => interim.push(text),
                RecognitionEvent::Final(t) => {
                    assert_eq!(t.text, "show me my pets");
                    finals += 1;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(interim, vec!["show", "show me"]);
        assert_eq!(finals, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_suppresses_everything() {
        let capture = engine(Duration::from_secs(5));
        let mut session = capture.start_recognition(RecognitionOptions::default());
        tokio::task::yield_now().await;

        capture.stop_recognition();

        assert!(session.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_session_supersedes_older() {
        let capture = engine(Duration::from_secs(1));
        let mut first = capture.start_recognition(RecognitionOptions::default());
        let mut second = capture.start_recognition(RecognitionOptions::default());

        assert!(second.generation() > first.generation());
        assert!(first.next_event().await.is_none());

        let mut got_final = false;
        while let Some(event) = second.next_event().await {
            got_final |= matches!(event, RecognitionEvent::Final(_));
        }
        assert!(got_final);
    }
}
