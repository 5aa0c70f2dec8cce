//! Wake word detection
//!
//! Local energy gating splits the microphone stream into speech segments;
//! each segment is transcribed and checked for a configured wake phrase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use super::capture::{AudioCapture, SAMPLE_RATE, calculate_energy, samples_to_wav};
use super::device::{AudioDevice, DeviceArbiter, DeviceLease};
use super::stt::Transcriber;
use crate::dialog::{Confidence, Transcript};
use crate::{Error, Result};

/// Minimum audio energy threshold to consider speech
pub const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to count as a segment (in samples at 16kHz)
pub const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
pub const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// How long the monitor thread waits between buffer reads
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long `start` waits for the audio thread to open the device
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// State of the speech segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Speech detected, accumulating
    Listening,
}

/// Energy-gated speech segmenter
#[derive(Debug)]
pub struct SpeechSegmenter {
    state: DetectorState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl Default for SpeechSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSegmenter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: DetectorState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed a chunk; returns a complete segment once speech is followed by silence
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected");
                }
            }
            DetectorState::Listening => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > SILENCE_SAMPLES
                    && self.speech_buffer.len() > MIN_SPEECH_SAMPLES + self.silence_counter
                {
                    tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
                    let segment = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    return Some(segment);
                }

                // Too much silence without enough speech
                if self.silence_counter > SILENCE_SAMPLES * 2 {
                    tracing::trace!("segment timeout, resetting");
                    self.reset();
                }
            }
        }

        None
    }

    /// Speech heard so far, even if the segment has not closed
    #[must_use]
    pub fn has_speech(&self) -> bool {
        self.state == DetectorState::Listening
    }

    /// Take whatever has been accumulated
    pub fn take_speech_buffer(&mut self) -> Vec<f32> {
        let buffer = std::mem::take(&mut self.speech_buffer);
        self.reset();
        buffer
    }

    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

/// A recognized wake phrase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WakeEvent {
    /// Configured phrase that matched
    pub phrase: String,
    /// Full transcript of the segment
    pub transcript: String,
    /// Whatever followed the phrase, if anything ("hey paw show my pets")
    pub command: Option<String>,
    /// Transcription confidence of the segment
    pub confidence: Confidence,
}

impl WakeEvent {
    /// The trailing command as a final transcript
    #[must_use]
    pub fn command_transcript(&self) -> Option<Transcript> {
        self.command
            .as_ref()
            .map(|text| Transcript::final_result(text.clone(), self.confidence))
    }
}

/// Matches transcripts against the configured wake phrases
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    wake_words: Vec<String>,
}

impl WakeWordDetector {
    /// Create a detector for the given phrases
    ///
    /// # Errors
    ///
    /// Returns error if no non-empty phrase is configured
    pub fn new(wake_words: Vec<String>) -> Result<Self> {
        let normalized: Vec<String> = wake_words
            .into_iter()
            .map(|w| normalize_phrase(&w))
            .filter(|w| !w.is_empty())
            .collect();

        if normalized.is_empty() {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }

        tracing::debug!(wake_words = ?normalized, "wake word detector initialized");
        Ok(Self {
            wake_words: normalized,
        })
    }

    /// Check a transcript for a wake phrase
    #[must_use]
    pub fn check_wake_word(&self, transcript: &str) -> Option<WakeEvent> {
        let padded = format!(" {} ", normalize_phrase(transcript));

        self.wake_words.iter().find_map(|phrase| {
            let needle = format!(" {phrase} ");
            let at = padded.find(&needle)?;
            let rest = padded[at + needle.len()..].trim();
            tracing::info!(wake_word = %phrase, transcript, "wake word detected");
            Some(WakeEvent {
                phrase: phrase.clone(),
                transcript: transcript.trim().to_string(),
                command: (!rest.is_empty()).then(|| rest.to_string()),
                confidence: Confidence::CERTAIN,
            })
        })
    }

    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }
}

/// Lower-case, punctuation-free, single-spaced
fn normalize_phrase(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Called whenever the wake phrase is heard
pub type WakeListener = Box<dyn Fn(WakeEvent) + Send + Sync>;

/// Continuous low-power wake phrase monitoring
pub trait WakeWordMonitor: Send + Sync {
    /// Begin monitoring
    ///
    /// Idempotent while active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if the microphone cannot be opened
    fn start(&self) -> Result<()>;

    /// Stop monitoring and release the microphone
    fn stop(&self);

    fn is_active(&self) -> bool;

    /// Register the wake callback, replacing any previous one
    fn on_wake(&self, listener: WakeListener);

    /// Release the microphone while a capture session owns it
    ///
    /// Does not change [`WakeWordMonitor::is_active`].
    fn suspend(&self);

    /// Reacquire the microphone after [`WakeWordMonitor::suspend`]
    fn resume(&self);
}

struct MonitorShared {
    detector: WakeWordDetector,
    transcriber: Arc<dyn Transcriber>,
    runtime: tokio::runtime::Handle,
    devices: DeviceArbiter,
    language: String,
    preferred_device: Mutex<Option<String>>,
    listener: Mutex<Option<Arc<WakeListener>>>,
    suspended: AtomicBool,
}

struct MonitorThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Wake-word monitor on the local microphone
///
/// Audio runs on a dedicated thread; segments are verified with the
/// transcriber on the tokio runtime.
pub struct MicWakeWordMonitor {
    shared: Arc<MonitorShared>,
    thread: Mutex<Option<MonitorThread>>,
}

impl MicWakeWordMonitor {
    /// Create a stopped monitor
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if no wake phrase is configured
    pub fn new(
        wake_words: Vec<String>,
        transcriber: Arc<dyn Transcriber>,
        devices: DeviceArbiter,
        language: impl Into<String>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("wake word monitor needs a tokio runtime: {e}")))?;

        Ok(Self {
            shared: Arc::new(MonitorShared {
                detector: WakeWordDetector::new(wake_words)?,
                transcriber,
                runtime,
                devices,
                language: language.into(),
                preferred_device: Mutex::new(None),
                listener: Mutex::new(None),
                suspended: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        })
    }

    /// Use a specific input device from the next start
    pub fn set_preferred_device(&self, device: Option<String>) {
        *self
            .shared
            .preferred_device
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = device;
    }
}

impl WakeWordMonitor for MicWakeWordMonitor {
    fn start(&self) -> Result<()> {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Ok(());
        }

        self.shared.suspended.store(false, Ordering::SeqCst);
        let stop = Arc::new(AtomicBool::new(false));
        let (opened_tx, opened_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("wake-word".to_string())
            .spawn(move || run_monitor(&shared, &thread_stop, &opened_tx))
            .map_err(Error::Io)?;

        let opened = opened_rx
            .recv_timeout(OPEN_TIMEOUT)
            .unwrap_or_else(|_| Err(Error::DeviceUnavailable("microphone open timed out".to_string())));

        if let Err(e) = opened {
            stop.store(true, Ordering::SeqCst);
            let _ = handle.join();
            tracing::warn!(error = %e, "wake word monitor failed to start");
            return Err(e);
        }

        *thread = Some(MonitorThread { stop, handle });
        tracing::info!(wake_words = ?self.shared.detector.wake_words(), "wake word monitor started");
        Ok(())
    }

    fn stop(&self) {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            thread.stop.store(true, Ordering::SeqCst);
            if thread.handle.join().is_err() {
                tracing::error!("wake word thread panicked");
            }
            tracing::info!("wake word monitor stopped");
        }
        self.shared.suspended.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    fn on_wake(&self, listener: WakeListener) {
        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
    }

    fn suspend(&self) {
        self.shared.suspended.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.shared.suspended.store(false, Ordering::SeqCst);
    }
}

impl Drop for MicWakeWordMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Audio thread body
fn run_monitor(
    shared: &MonitorShared,
    stop: &AtomicBool,
    opened: &mpsc::Sender<Result<()>>,
) {
    let preferred = shared
        .preferred_device
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    let mut capture = match AudioCapture::open(preferred.as_deref()) {
        Ok(capture) => capture,
        Err(e) => {
            let _ = opened.send(Err(e));
            return;
        }
    };
    let mut lease = match acquire_and_start(shared, &mut capture) {
        Ok(lease) => lease,
        Err(e) => {
            let _ = opened.send(Err(e));
            return;
        }
    };
    let _ = opened.send(Ok(()));

    let mut segmenter = SpeechSegmenter::new();

    while !stop.load(Ordering::SeqCst) {
        if shared.suspended.load(Ordering::SeqCst) {
            if lease.take().is_some() {
                capture.stop();
                segmenter.reset();
                tracing::debug!("wake word monitor suspended");
            }
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

        if lease.is_none() {
            match acquire_and_start(shared, &mut capture) {
                Ok(new_lease) => {
                    lease = new_lease;
                    tracing::debug!("wake word monitor resumed");
                }
                Err(e) => {
                    tracing::trace!(error = %e, "microphone still busy");
                    std::thread::sleep(POLL_INTERVAL);
                    continue;
                }
            }
        }

        std::thread::sleep(POLL_INTERVAL);
        let samples = capture.take_buffer();
        let Some(segment) = segmenter.process(&samples) else {
            continue;
        };

        if let Some(event) = verify_segment(shared, &segment) {
            let listener = shared
                .listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            match listener {
                Some(listener) => listener(event),
                None => tracing::debug!("wake word heard with no listener registered"),
            }
        }
    }

    capture.stop();
}

fn acquire_and_start(
    shared: &MonitorShared,
    capture: &mut AudioCapture,
) -> Result<Option<DeviceLease>> {
    let lease = shared
        .devices
        .try_acquire(AudioDevice::Microphone, "wake word")?;
    capture.start()?;
    Ok(Some(lease))
}

fn verify_segment(shared: &MonitorShared, segment: &[f32]) -> Option<WakeEvent> {
    let wav = samples_to_wav(segment, SAMPLE_RATE)
        .map_err(|e| tracing::warn!(error = %e, "failed to encode wake segment"))
        .ok()?;

    let transcript = shared
        .runtime
        .block_on(shared.transcriber.transcribe(&wav, &shared.language))
        .map_err(|e| tracing::warn!(error = %e, "wake segment transcription failed"))
        .ok()?;

    shared
        .detector
        .check_wake_word(&transcript.text)
        .map(|event| WakeEvent {
            confidence: transcript.confidence,
            ..event
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_word_with_trailing_command() {
        let detector = WakeWordDetector::new(vec!["Hey Paw".to_string()]).unwrap();

        assert!(detector.check_wake_word("hello world").is_none());

        let event = detector.check_wake_word("Hey, Paw! Show my pets.").unwrap();
        assert_eq!(event.phrase, "hey paw");
        assert_eq!(event.command.as_deref(), Some("show my pets"));
    }

    #[test]
    fn bare_wake_word_has_no_command() {
        let detector = WakeWordDetector::new(vec!["hey paw".to_string()]).unwrap();
        let event = detector.check_wake_word("hey paw").unwrap();
        assert!(event.command.is_none());
    }

    #[test]
    fn phrase_must_match_whole_words() {
        let detector = WakeWordDetector::new(vec!["hey paw".to_string()]).unwrap();
        assert!(detector.check_wake_word("they pawned it").is_none());
    }

    #[test]
    fn empty_phrase_list_is_rejected() {
        assert!(WakeWordDetector::new(vec!["  ".to_string()]).is_err());
    }
}
