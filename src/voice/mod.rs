//! Voice processing module
//!
//! Microphone capture, wake word monitoring, recognition sessions, cloud
//! STT/TTS and playback. Devices are shared through a [`DeviceArbiter`].

mod capture;
mod device;
mod playback;
mod recognition;
mod stt;
mod tts;
mod wake_word;

pub use capture::{AudioCapture, InputDevice, SAMPLE_RATE, calculate_energy, list_input_devices, samples_to_wav};
pub use device::{AudioDevice, DeviceArbiter, DeviceLease};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use recognition::{
    CaptureSession, DEFAULT_MAX_UTTERANCE, EventSink, MicRecognizer, RecognitionEvent,
    RecognitionOptions, SpeechCapture, SpeechRecognizer,
};
pub use stt::{SpeechToText, SttProvider, Transcriber};
pub use tts::{
    SilentOutput, SpeechSynthesizer, SpokenOutput, SynthesisRequest, TextToSpeech, TtsProvider,
};
pub use wake_word::{
    DetectorState, ENERGY_THRESHOLD, MIN_SPEECH_SAMPLES, MicWakeWordMonitor, SILENCE_SAMPLES,
    SpeechSegmenter, WakeEvent, WakeListener, WakeWordDetector, WakeWordMonitor,
};
